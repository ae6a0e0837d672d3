//! Replay serialisers over the rebuild engine's in-memory state.

use crate::rebuild::{EngineState, Snapshot, MAX_OUTCOMES};
use serde_json::{json, Value};

/// Positions whose absolute face value sums below this are hidden.
pub const DUST_THRESHOLD: i64 = 50 * 1_000_000;

const DEFAULT_TRADE_RADIUS: usize = 20;

struct TimelineEntry {
    timestamp: i64,
    cond_idx: u32,
    event_type: u8,
    outcome_count: u8,
    cond_rpnl: i64,
    positions: [i64; MAX_OUTCOMES],
}

fn abs_position_sum(positions: &[i64], outcome_count: u8) -> i64 {
    positions[..outcome_count as usize]
        .iter()
        .map(|p| p.abs())
        .sum()
}

/// Full event timeline for one user, slimmed to the PnL curve and the
/// non-dust condition count.
///
/// The array body is concatenated by hand: at millions of events a
/// tree-building JSON serialiser spends all its time on small allocations.
pub fn serialize_user_timeline(state: &EngineState, user_id: &str) -> Option<String> {
    let user = state.find_user(user_id)?;

    let mut timeline: Vec<TimelineEntry> = Vec::new();
    for history in &user.conditions {
        for snapshot in &history.snapshots {
            timeline.push(TimelineEntry {
                timestamp: snapshot.timestamp,
                cond_idx: history.cond_idx,
                event_type: snapshot.event_type,
                outcome_count: snapshot.outcome_count,
                cond_rpnl: snapshot.realized_pnl,
                positions: snapshot.positions,
            });
        }
    }
    timeline.sort_by_key(|entry| entry.timestamp);

    let mut cond_rpnl: std::collections::HashMap<u32, i64> = std::collections::HashMap::new();
    let mut cond_non_dust: std::collections::HashMap<u32, bool> =
        std::collections::HashMap::new();
    let mut global_rpnl = 0i64;
    let mut non_dust_conditions = 0i64;

    let mut body = String::with_capacity(timeline.len() * 40 + 256);
    body.push('[');
    let mut first = true;
    for entry in &timeline {
        let previous = cond_rpnl.insert(entry.cond_idx, entry.cond_rpnl).unwrap_or(0);
        global_rpnl += entry.cond_rpnl - previous;

        let was_non_dust = cond_non_dust
            .insert(
                entry.cond_idx,
                abs_position_sum(&entry.positions, entry.outcome_count) >= DUST_THRESHOLD,
            )
            .unwrap_or(false);
        let is_non_dust = cond_non_dust[&entry.cond_idx];
        if is_non_dust && !was_non_dust {
            non_dust_conditions += 1;
        } else if !is_non_dust && was_non_dust {
            non_dust_conditions -= 1;
        }

        if !first {
            body.push(',');
        }
        first = false;
        body.push_str("{\"ts\":");
        body.push_str(&entry.timestamp.to_string());
        body.push_str(",\"ty\":");
        body.push_str(&entry.event_type.to_string());
        body.push_str(",\"rpnl\":");
        body.push_str(&global_rpnl.to_string());
        body.push_str(",\"tk\":");
        body.push_str(&non_dust_conditions.to_string());
        body.push('}');
    }
    body.push(']');

    let first_ts = timeline.first().map(|e| e.timestamp).unwrap_or(0);
    let last_ts = timeline.last().map(|e| e.timestamp).unwrap_or(0);

    Some(format!(
        "{{\"user\":\"{}\",\"total_events\":{},\"first_ts\":{},\"last_ts\":{},\"dust_threshold\":{},\"timeline\":{}}}",
        user_id,
        timeline.len(),
        first_ts,
        last_ts,
        DUST_THRESHOLD,
        body
    ))
}

/// Snapshot window of `radius` events either side of the event nearest `ts`.
pub fn serialize_trades_at(
    state: &EngineState,
    user_id: &str,
    ts: i64,
    radius: Option<usize>,
) -> Option<Value> {
    let user = state.find_user(user_id)?;
    let radius = radius.unwrap_or(DEFAULT_TRADE_RADIUS);

    struct TradeEntry {
        timestamp: i64,
        cond_idx: u32,
        event_type: u8,
        token_idx: u8,
        delta: i64,
        price: i64,
    }

    let mut trades: Vec<TradeEntry> = Vec::new();
    for history in &user.conditions {
        for snapshot in &history.snapshots {
            trades.push(TradeEntry {
                timestamp: snapshot.timestamp,
                cond_idx: history.cond_idx,
                event_type: snapshot.event_type,
                token_idx: snapshot.token_idx,
                delta: snapshot.delta,
                price: snapshot.price,
            });
        }
    }
    trades.sort_by_key(|trade| trade.timestamp);

    if trades.is_empty() {
        return Some(json!({ "ts": ts, "center": 0, "events": [] }));
    }

    // Nearest event to ts, preferring the earlier of two equidistant ones.
    let mut center = trades.partition_point(|trade| trade.timestamp < ts);
    if center > 0 && center < trades.len() {
        if (trades[center - 1].timestamp - ts).abs() <= (trades[center].timestamp - ts).abs() {
            center -= 1;
        }
    } else if center >= trades.len() {
        center = trades.len() - 1;
    }

    let start = center.saturating_sub(radius);
    let end = (center + radius).min(trades.len() - 1);

    let events: Vec<Value> = trades[start..=end]
        .iter()
        .map(|trade| {
            json!({
                "ts": trade.timestamp,
                "ty": trade.event_type,
                "ti": trade.token_idx,
                "ci": trade.cond_idx,
                "cid": state.cond_ids[trade.cond_idx as usize],
                "d": trade.delta,
                "p": trade.price,
            })
        })
        .collect();

    Some(json!({
        "ts": ts,
        "center": center - start,
        "events": events,
    }))
}

/// Per-condition position snapshot at `ts`: the last snapshot at or before
/// the timestamp, dust-filtered, sorted by |realized pnl| descending.
pub fn serialize_positions_at(state: &EngineState, user_id: &str, ts: i64) -> Option<Value> {
    let user = state.find_user(user_id)?;

    struct PositionEntry<'a> {
        cond_idx: u32,
        snapshot: &'a Snapshot,
    }

    let mut entries: Vec<PositionEntry> = Vec::new();
    for history in &user.conditions {
        let snapshots = &history.snapshots;
        if snapshots.is_empty() {
            continue;
        }
        let at = snapshots.partition_point(|snapshot| snapshot.timestamp <= ts);
        if at == 0 {
            continue;
        }
        let snapshot = &snapshots[at - 1];
        if abs_position_sum(&snapshot.positions, snapshot.outcome_count) < DUST_THRESHOLD {
            continue;
        }
        entries.push(PositionEntry {
            cond_idx: history.cond_idx,
            snapshot,
        });
    }

    entries.sort_by_key(|entry| std::cmp::Reverse(entry.snapshot.realized_pnl.abs()));

    let positions: Vec<Value> = entries
        .iter()
        .map(|entry| {
            let outcome_count = entry.snapshot.outcome_count as usize;
            json!({
                "ci": entry.cond_idx,
                "id": state.cond_ids[entry.cond_idx as usize],
                "oc": outcome_count,
                "pos": entry.snapshot.positions[..outcome_count].to_vec(),
                "cost": entry.snapshot.cost_basis,
                "rpnl": entry.snapshot.realized_pnl,
            })
        })
        .collect();

    Some(json!({
        "ts": ts,
        "count": positions.len(),
        "dust_threshold": DUST_THRESHOLD,
        "positions": positions,
    }))
}

/// Top `limit` users by total snapshot count.
pub fn serialize_user_list(state: &EngineState, limit: usize) -> Value {
    let mut infos: Vec<(usize, usize)> = state
        .user_states
        .iter()
        .enumerate()
        .map(|(idx, user_state)| {
            let count = user_state
                .conditions
                .iter()
                .map(|history| history.snapshots.len())
                .sum();
            (idx, count)
        })
        .collect();

    infos.sort_by_key(|&(_, count)| std::cmp::Reverse(count));

    Value::Array(
        infos
            .iter()
            .take(limit)
            .map(|&(idx, count)| {
                json!({
                    "user_addr": state.users[idx],
                    "event_count": count,
                })
            })
            .collect(),
    )
}
