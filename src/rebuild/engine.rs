//! Three-phase rebuild: metadata load, four-way parallel event collection,
//! parallel per-user replay.

use super::{
    ConditionInfo, EventType, RawEvent, RebuildProgress, ReplayState, Snapshot,
    UserConditionHistory, UserState, ALL_OUTCOMES, MAX_OUTCOMES,
};
use crate::db::Store;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::Instant;
use tracing::info;

/// Phase-3 worker count, capped by available parallelism.
pub const REBUILD_WORKERS: usize = 16;

/// The engine's complete in-memory object graph. Built whole by a rebuild
/// or a persist load, then swapped in; readers never observe a partial
/// state.
#[derive(Default)]
pub struct EngineState {
    pub conditions: Vec<ConditionInfo>,
    pub cond_ids: Vec<String>,
    pub cond_map: HashMap<String, u32>,
    pub token_map: HashMap<String, (u32, u8)>,
    pub users: Vec<String>,
    pub user_map: HashMap<String, u32>,
    pub user_states: Vec<UserState>,
    pub total_events: i64,
}

impl EngineState {
    pub fn find_user(&self, user_id: &str) -> Option<&UserState> {
        self.user_map
            .get(user_id)
            .map(|&idx| &self.user_states[idx as usize])
    }
}

pub struct RebuildEngine {
    pub(crate) store: Arc<Store>,
    pub(crate) persist_dir: PathBuf,
    pub(crate) state: RwLock<EngineState>,

    pub(crate) running: AtomicBool,
    pub(crate) phase: AtomicI32,
    pub(crate) total_conditions: AtomicI64,
    pub(crate) total_tokens: AtomicI64,
    pub(crate) total_events: AtomicI64,
    pub(crate) total_users: AtomicI64,
    pub(crate) processed_users: AtomicI64,
    pub(crate) phase1_ms: AtomicI64,
    pub(crate) phase2_ms: AtomicI64,
    pub(crate) phase3_ms: AtomicI64,
    eof_rows: AtomicI64,
    eof_events: AtomicI64,
    split_rows: AtomicI64,
    split_events: AtomicI64,
    merge_rows: AtomicI64,
    merge_events: AtomicI64,
    redemption_rows: AtomicI64,
    redemption_events: AtomicI64,
    eof_done: AtomicBool,
    split_done: AtomicBool,
    merge_done: AtomicBool,
    redemption_done: AtomicBool,
}

pub(crate) struct Metadata {
    pub conditions: Vec<ConditionInfo>,
    pub cond_ids: Vec<String>,
    pub cond_map: HashMap<String, u32>,
    pub token_map: HashMap<String, (u32, u8)>,
}

impl RebuildEngine {
    pub fn new(store: Arc<Store>, persist_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            persist_dir: persist_dir.into(),
            state: RwLock::new(EngineState::default()),
            running: AtomicBool::new(false),
            phase: AtomicI32::new(0),
            total_conditions: AtomicI64::new(0),
            total_tokens: AtomicI64::new(0),
            total_events: AtomicI64::new(0),
            total_users: AtomicI64::new(0),
            processed_users: AtomicI64::new(0),
            phase1_ms: AtomicI64::new(0),
            phase2_ms: AtomicI64::new(0),
            phase3_ms: AtomicI64::new(0),
            eof_rows: AtomicI64::new(0),
            eof_events: AtomicI64::new(0),
            split_rows: AtomicI64::new(0),
            split_events: AtomicI64::new(0),
            merge_rows: AtomicI64::new(0),
            merge_events: AtomicI64::new(0),
            redemption_rows: AtomicI64::new(0),
            redemption_events: AtomicI64::new(0),
            eof_done: AtomicBool::new(false),
            split_done: AtomicBool::new(false),
            merge_done: AtomicBool::new(false),
            redemption_done: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn persist_dir(&self) -> &Path {
        &self.persist_dir
    }

    /// Read access to the current state for the replay serialisers.
    pub fn state(&self) -> RwLockReadGuard<'_, EngineState> {
        self.state.read().unwrap()
    }

    /// Full recompute from the event tables. Panics if a rebuild or load is
    /// already in flight.
    pub fn rebuild_all(&self) {
        let claimed = self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst);
        assert!(claimed.is_ok(), "rebuild already running");
        self.reset_progress();

        self.phase.store(1, Ordering::Relaxed);
        let t0 = Instant::now();
        let meta = self.load_metadata();
        self.phase1_ms
            .store(t0.elapsed().as_millis() as i64, Ordering::Relaxed);

        let t1 = Instant::now();
        let (users, user_map, mut user_events) = self.collect_events(&meta);
        self.phase2_ms
            .store(t1.elapsed().as_millis() as i64, Ordering::Relaxed);

        self.phase.store(6, Ordering::Relaxed);
        let t2 = Instant::now();
        let user_states = self.replay_all(&meta.conditions, &mut user_events);
        self.phase3_ms
            .store(t2.elapsed().as_millis() as i64, Ordering::Relaxed);

        let total_events = self.total_events.load(Ordering::Relaxed);
        {
            let mut state = self.state.write().unwrap();
            *state = EngineState {
                conditions: meta.conditions,
                cond_ids: meta.cond_ids,
                cond_map: meta.cond_map,
                token_map: meta.token_map,
                users,
                user_map,
                user_states,
                total_events,
            };
        }

        self.phase.store(7, Ordering::Relaxed);
        self.running.store(false, Ordering::SeqCst);
        info!(
            "[rebuild] done: {} users, {} events | p1={}ms p2={}ms p3={}ms",
            self.total_users.load(Ordering::Relaxed),
            total_events,
            self.phase1_ms.load(Ordering::Relaxed),
            self.phase2_ms.load(Ordering::Relaxed),
            self.phase3_ms.load(Ordering::Relaxed),
        );
    }

    pub fn get_progress(&self) -> RebuildProgress {
        RebuildProgress {
            running: self.running.load(Ordering::Relaxed),
            phase: self.phase.load(Ordering::Relaxed),
            total_conditions: self.total_conditions.load(Ordering::Relaxed),
            total_tokens: self.total_tokens.load(Ordering::Relaxed),
            total_events: self.total_events.load(Ordering::Relaxed),
            total_users: self.total_users.load(Ordering::Relaxed),
            processed_users: self.processed_users.load(Ordering::Relaxed),
            eof_rows: self.eof_rows.load(Ordering::Relaxed),
            eof_events: self.eof_events.load(Ordering::Relaxed),
            split_rows: self.split_rows.load(Ordering::Relaxed),
            split_events: self.split_events.load(Ordering::Relaxed),
            merge_rows: self.merge_rows.load(Ordering::Relaxed),
            merge_events: self.merge_events.load(Ordering::Relaxed),
            redemption_rows: self.redemption_rows.load(Ordering::Relaxed),
            redemption_events: self.redemption_events.load(Ordering::Relaxed),
            eof_done: self.eof_done.load(Ordering::Relaxed),
            split_done: self.split_done.load(Ordering::Relaxed),
            merge_done: self.merge_done.load(Ordering::Relaxed),
            redemption_done: self.redemption_done.load(Ordering::Relaxed),
            phase1_ms: self.phase1_ms.load(Ordering::Relaxed),
            phase2_ms: self.phase2_ms.load(Ordering::Relaxed),
            phase3_ms: self.phase3_ms.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn reset_progress(&self) {
        for counter in [
            &self.total_conditions,
            &self.total_tokens,
            &self.total_events,
            &self.total_users,
            &self.processed_users,
            &self.phase1_ms,
            &self.phase2_ms,
            &self.phase3_ms,
            &self.eof_rows,
            &self.eof_events,
            &self.split_rows,
            &self.split_events,
            &self.merge_rows,
            &self.merge_events,
            &self.redemption_rows,
            &self.redemption_events,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        for flag in [
            &self.eof_done,
            &self.split_done,
            &self.merge_done,
            &self.redemption_done,
        ] {
            flag.store(false, Ordering::Relaxed);
        }
    }

    // ======================================================================
    // Phase 1: condition metadata and token mapping
    // ======================================================================

    fn load_metadata(&self) -> Metadata {
        let mut meta = Metadata {
            conditions: Vec::new(),
            cond_ids: Vec::new(),
            cond_map: HashMap::new(),
            token_map: HashMap::new(),
        };

        let reader = self.store.reader().expect("scan connection failed");
        reader
            .scan(
                "SELECT id, outcomeSlotCount, positionIds, payoutNumerators, payoutDenominator \
                 FROM condition",
                |chunk| {
                    for row in 0..chunk.len() {
                        let cond_id = chunk.str_at(0, row).expect("condition id").to_string();
                        let outcome_count = chunk.i32_at(1, row).expect("outcomeSlotCount");
                        assert!(
                            (1..=MAX_OUTCOMES as i32).contains(&outcome_count),
                            "outcome count {} out of range for {}",
                            outcome_count,
                            cond_id
                        );

                        let idx = meta.conditions.len() as u32;
                        let mut info = ConditionInfo {
                            outcome_count: outcome_count as u8,
                            ..ConditionInfo::default()
                        };

                        // positionIds: JSON array of token ids, indexed by outcome.
                        if let Some(raw) = chunk.str_at(2, row) {
                            if !raw.is_empty() {
                                let tokens: Value =
                                    serde_json::from_str(raw).expect("malformed positionIds");
                                for (outcome, token) in
                                    tokens.as_array().into_iter().flatten().enumerate()
                                {
                                    if let Some(token_id) = token.as_str() {
                                        meta.token_map.insert(
                                            token_id.to_string(),
                                            (idx, outcome as u8),
                                        );
                                    }
                                }
                            }
                        }

                        // payoutNumerators: JSON array of ints or numeric strings.
                        if let Some(raw) = chunk.str_at(3, row) {
                            if !raw.is_empty() && raw != "NULL" {
                                let numerators: Value =
                                    serde_json::from_str(raw).expect("malformed payoutNumerators");
                                for n in numerators.as_array().into_iter().flatten() {
                                    let v = match n {
                                        Value::String(s) => {
                                            s.parse::<i64>().expect("malformed payout numerator")
                                        }
                                        other => other.as_i64().unwrap_or(0),
                                    };
                                    info.payout_numerators.push(v);
                                }
                            }
                        }

                        info.payout_denominator = chunk.i64_at(4, row).unwrap_or(0);

                        meta.cond_map.insert(cond_id.clone(), idx);
                        meta.conditions.push(info);
                        meta.cond_ids.push(cond_id);
                    }
                },
            )
            .expect("condition scan failed");

        self.total_conditions
            .store(meta.conditions.len() as i64, Ordering::Relaxed);
        self.total_tokens
            .store(meta.token_map.len() as i64, Ordering::Relaxed);
        info!(
            "[rebuild] p1: {} conditions, {} tokens",
            meta.conditions.len(),
            meta.token_map.len()
        );
        meta
    }

    // ======================================================================
    // Phase 2: four parallel event scans into per-user buckets
    // ======================================================================

    #[allow(clippy::type_complexity)]
    fn collect_events(
        &self,
        meta: &Metadata,
    ) -> (Vec<String>, HashMap<String, u32>, Vec<Vec<RawEvent>>) {
        self.phase.store(2, Ordering::Relaxed);

        let (eof, split, merge, redemption) = std::thread::scope(|scope| {
            let h_eof = scope.spawn(|| self.scan_order_filled(&meta.token_map));
            let h_split = scope.spawn(|| {
                self.scan_condition_events(
                    "SELECT timestamp, stakeholder, condition, amount FROM split ORDER BY timestamp",
                    EventType::Split,
                    &meta.cond_map,
                    &self.split_rows,
                    &self.split_events,
                    &self.split_done,
                )
            });
            let h_merge = scope.spawn(|| {
                self.scan_condition_events(
                    "SELECT timestamp, stakeholder, condition, amount FROM merge ORDER BY timestamp",
                    EventType::Merge,
                    &meta.cond_map,
                    &self.merge_rows,
                    &self.merge_events,
                    &self.merge_done,
                )
            });
            let h_redemption = scope.spawn(|| {
                self.scan_condition_events(
                    "SELECT timestamp, redeemer, condition, payout FROM redemption ORDER BY timestamp",
                    EventType::Redemption,
                    &meta.cond_map,
                    &self.redemption_rows,
                    &self.redemption_events,
                    &self.redemption_done,
                )
            });
            (
                h_eof.join().expect("order-filled scan panicked"),
                h_split.join().expect("split scan panicked"),
                h_merge.join().expect("merge scan panicked"),
                h_redemption.join().expect("redemption scan panicked"),
            )
        });

        let mut users: Vec<String> = Vec::new();
        let mut user_map: HashMap<String, u32> = HashMap::new();
        let mut user_events: Vec<Vec<RawEvent>> = Vec::new();

        for scan in [eof, split, merge, redemption] {
            // Deterministic interning order, so repeated rebuilds assign the
            // same user indices and persist identically.
            let mut entries: Vec<(String, Vec<RawEvent>)> = scan.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            for (user_id, events) in entries {
                let idx = intern_user(&mut users, &mut user_map, &mut user_events, user_id);
                let bucket = &mut user_events[idx as usize];
                if bucket.is_empty() {
                    *bucket = events;
                } else {
                    bucket.extend(events);
                }
            }
        }

        let total_events = self.eof_events.load(Ordering::Relaxed)
            + self.split_events.load(Ordering::Relaxed)
            + self.merge_events.load(Ordering::Relaxed)
            + self.redemption_events.load(Ordering::Relaxed);
        self.total_events.store(total_events, Ordering::Relaxed);
        self.total_users.store(users.len() as i64, Ordering::Relaxed);

        info!(
            "[rebuild]   eof: {} rows -> {} events",
            self.eof_rows.load(Ordering::Relaxed),
            self.eof_events.load(Ordering::Relaxed)
        );
        info!(
            "[rebuild]   split: {} rows -> {} events",
            self.split_rows.load(Ordering::Relaxed),
            self.split_events.load(Ordering::Relaxed)
        );
        info!(
            "[rebuild]   merge: {} rows -> {} events",
            self.merge_rows.load(Ordering::Relaxed),
            self.merge_events.load(Ordering::Relaxed)
        );
        info!(
            "[rebuild]   redemption: {} rows -> {} events",
            self.redemption_rows.load(Ordering::Relaxed),
            self.redemption_events.load(Ordering::Relaxed)
        );
        info!(
            "[rebuild] p2: {} events -> {} users",
            total_events,
            users.len()
        );

        (users, user_map, user_events)
    }

    fn scan_order_filled(
        &self,
        token_map: &HashMap<String, (u32, u8)>,
    ) -> HashMap<String, Vec<RawEvent>> {
        let reader = self.store.reader().expect("scan connection failed");
        let mut by_user: HashMap<String, Vec<RawEvent>> = HashMap::new();
        let mut rows = 0i64;
        let mut events = 0i64;

        reader
            .scan(
                "SELECT timestamp, maker, taker, market, side, size, price \
                 FROM enriched_order_filled ORDER BY timestamp",
                |chunk| {
                    rows += chunk.len() as i64;
                    for row in 0..chunk.len() {
                        let Some(market) = chunk.str_at(3, row) else {
                            continue;
                        };
                        let Some(&(cond_idx, token_idx)) = token_map.get(market) else {
                            continue;
                        };
                        let (Some(maker), Some(taker)) =
                            (chunk.str_at(1, row), chunk.str_at(2, row))
                        else {
                            continue;
                        };

                        let timestamp = chunk.i64_at(0, row).unwrap_or(0);
                        let amount = chunk
                            .str_at(5, row)
                            .and_then(|s| s.parse::<i64>().ok())
                            .expect("malformed order size");
                        let price = (chunk.f64_at(6, row).unwrap_or(0.0) * 1_000_000.0) as i64;

                        // side is the taker's direction; the maker takes the
                        // other side. maker == taker still emits both events.
                        let taker_buys =
                            chunk.str_at(4, row).is_some_and(|s| s.starts_with('B'));
                        let (taker_ty, maker_ty) = if taker_buys {
                            (EventType::Buy, EventType::Sell)
                        } else {
                            (EventType::Sell, EventType::Buy)
                        };

                        push_event(
                            &mut by_user,
                            taker,
                            RawEvent {
                                timestamp,
                                cond_idx,
                                ty: taker_ty,
                                token_idx,
                                amount,
                                price,
                            },
                        );
                        push_event(
                            &mut by_user,
                            maker,
                            RawEvent {
                                timestamp,
                                cond_idx,
                                ty: maker_ty,
                                token_idx,
                                amount,
                                price,
                            },
                        );
                        events += 2;
                    }
                    self.eof_rows.store(rows, Ordering::Relaxed);
                },
            )
            .expect("order-filled scan failed");

        self.eof_events.store(events, Ordering::Relaxed);
        self.eof_done.store(true, Ordering::Relaxed);
        by_user
    }

    /// Shared scan for split / merge / redemption: all three project
    /// `(timestamp, user, condition, amount)` and emit one all-outcome event.
    fn scan_condition_events(
        &self,
        sql: &str,
        ty: EventType,
        cond_map: &HashMap<String, u32>,
        rows_counter: &AtomicI64,
        events_counter: &AtomicI64,
        done_flag: &AtomicBool,
    ) -> HashMap<String, Vec<RawEvent>> {
        let reader = self.store.reader().expect("scan connection failed");
        let mut by_user: HashMap<String, Vec<RawEvent>> = HashMap::new();
        let mut rows = 0i64;
        let mut events = 0i64;

        reader
            .scan(sql, |chunk| {
                rows += chunk.len() as i64;
                for row in 0..chunk.len() {
                    let Some(condition) = chunk.str_at(2, row) else {
                        continue;
                    };
                    let Some(&cond_idx) = cond_map.get(condition) else {
                        continue;
                    };
                    let Some(user) = chunk.str_at(1, row) else {
                        continue;
                    };
                    let timestamp = chunk.i64_at(0, row).unwrap_or(0);
                    let amount = chunk
                        .str_at(3, row)
                        .and_then(|s| s.parse::<i64>().ok())
                        .expect("malformed event amount");

                    push_event(
                        &mut by_user,
                        user,
                        RawEvent {
                            timestamp,
                            cond_idx,
                            ty,
                            token_idx: ALL_OUTCOMES,
                            amount,
                            price: 0,
                        },
                    );
                    events += 1;
                }
                rows_counter.store(rows, Ordering::Relaxed);
            })
            .expect("event scan failed");

        events_counter.store(events, Ordering::Relaxed);
        done_flag.store(true, Ordering::Relaxed);
        by_user
    }

    // ======================================================================
    // Phase 3: parallel replay
    // ======================================================================

    fn replay_all(
        &self,
        conditions: &[ConditionInfo],
        user_events: &mut Vec<Vec<RawEvent>>,
    ) -> Vec<UserState> {
        let user_count = user_events.len();
        let mut user_states = vec![UserState::default(); user_count];
        self.processed_users.store(0, Ordering::Relaxed);

        let workers = REBUILD_WORKERS
            .min(
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1),
            )
            .max(1);
        let chunk_size = user_count.div_ceil(workers).max(1);

        std::thread::scope(|scope| {
            for (states, events) in user_states
                .chunks_mut(chunk_size)
                .zip(user_events.chunks_mut(chunk_size))
            {
                scope.spawn(move || {
                    for (state, events) in states.iter_mut().zip(events.iter_mut()) {
                        *state = replay_user(events, conditions);
                        self.processed_users.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
        });

        user_events.clear();
        user_events.shrink_to_fit();

        info!("[rebuild] p3: {} users, {} workers", user_count, workers);
        user_states
    }
}

fn intern_user(
    users: &mut Vec<String>,
    user_map: &mut HashMap<String, u32>,
    user_events: &mut Vec<Vec<RawEvent>>,
    id: String,
) -> u32 {
    if let Some(&idx) = user_map.get(&id) {
        return idx;
    }
    let idx = users.len() as u32;
    users.push(id.clone());
    user_map.insert(id, idx);
    user_events.push(Vec::new());
    idx
}

fn push_event(map: &mut HashMap<String, Vec<RawEvent>>, user: &str, event: RawEvent) {
    if let Some(events) = map.get_mut(user) {
        events.push(event);
    } else {
        map.insert(user.to_string(), vec![event]);
    }
}

/// Replay one user's events into per-condition snapshot chains. Frees the
/// user's raw event vector afterwards.
fn replay_user(events: &mut Vec<RawEvent>, conditions: &[ConditionInfo]) -> UserState {
    events.sort_by_key(|e| e.timestamp);

    let mut states: HashMap<u32, ReplayState> = HashMap::new();
    let mut chains: HashMap<u32, Vec<Snapshot>> = HashMap::new();

    for event in events.iter() {
        let state = states.entry(event.cond_idx).or_default();
        let cond = &conditions[event.cond_idx as usize];

        apply_event(event, state, cond);

        let mut total_cost = 0i64;
        for k in 0..cond.outcome_count as usize {
            total_cost += state.cost[k];
        }

        chains.entry(event.cond_idx).or_default().push(Snapshot {
            timestamp: event.timestamp,
            delta: event.amount,
            price: event.price,
            positions: state.positions,
            cost_basis: total_cost / 1_000_000,
            realized_pnl: state.realized_pnl,
            event_type: event.ty as u8,
            token_idx: event.token_idx,
            outcome_count: cond.outcome_count,
        });
    }

    let mut histories: Vec<UserConditionHistory> = chains
        .into_iter()
        .map(|(cond_idx, snapshots)| UserConditionHistory {
            cond_idx,
            snapshots,
        })
        .collect();
    // Deterministic chain order, so repeated rebuilds persist identically.
    histories.sort_by_key(|history| history.cond_idx);

    events.clear();
    events.shrink_to_fit();

    UserState {
        conditions: histories,
    }
}

// ==========================================================================
// Event application
// ==========================================================================

fn apply_event(event: &RawEvent, state: &mut ReplayState, cond: &ConditionInfo) {
    match event.ty {
        EventType::Buy => apply_buy(event, state),
        EventType::Sell => apply_sell(event, state),
        EventType::Split => apply_split(event, state, cond),
        EventType::Merge => apply_merge(event, state, cond),
        EventType::Redemption => apply_redemption(state, cond),
    }
}

fn apply_buy(event: &RawEvent, state: &mut ReplayState) {
    let i = event.token_idx as usize;
    assert!(i < MAX_OUTCOMES);
    state.cost[i] += event.amount * event.price;
    state.positions[i] += event.amount;
}

// Selling against an empty position is a no-op; proceeds from the owned
// part are realized proportionally to cost.
fn apply_sell(event: &RawEvent, state: &mut ReplayState) {
    let i = event.token_idx as usize;
    assert!(i < MAX_OUTCOMES);

    let pos = state.positions[i];
    if pos <= 0 {
        return;
    }
    let cost_removed = state.cost[i] * event.amount / pos;
    state.realized_pnl += (event.amount * event.price - cost_removed) / 1_000_000;
    state.cost[i] -= cost_removed;
    state.positions[i] -= event.amount;
}

// Split: pay `amount` collateral, receive `amount` of every outcome token.
// Each token's implied cost is 1e6 / outcome_count.
fn apply_split(event: &RawEvent, state: &mut ReplayState, cond: &ConditionInfo) {
    let implied_price = 1_000_000 / cond.outcome_count as i64;
    for i in 0..cond.outcome_count as usize {
        state.cost[i] += event.amount * implied_price;
        state.positions[i] += event.amount;
    }
}

// Merge: destroy `amount` of every outcome token, receive collateral back
// at the same implied price.
fn apply_merge(event: &RawEvent, state: &mut ReplayState, cond: &ConditionInfo) {
    let implied_price = 1_000_000 / cond.outcome_count as i64;
    for i in 0..cond.outcome_count as usize {
        let pos = state.positions[i];
        if pos <= 0 {
            continue;
        }
        let cost_removed = state.cost[i] * event.amount / pos;
        state.realized_pnl += (event.amount * implied_price - cost_removed) / 1_000_000;
        state.cost[i] -= cost_removed;
        state.positions[i] -= event.amount;
    }
}

// Redemption clears every held outcome at its payout price; unresolved
// conditions (denominator 0) are a no-op.
fn apply_redemption(state: &mut ReplayState, cond: &ConditionInfo) {
    if cond.payout_denominator == 0 {
        return;
    }
    let outcomes = (cond.outcome_count as usize).min(cond.payout_numerators.len());
    for i in 0..outcomes {
        let pos = state.positions[i];
        if pos <= 0 {
            continue;
        }
        let payout_price = cond.payout_numerators[i] * 1_000_000 / cond.payout_denominator;
        state.realized_pnl += (pos * payout_price - state.cost[i]) / 1_000_000;
        state.cost[i] = 0;
        state.positions[i] = 0;
    }
}
