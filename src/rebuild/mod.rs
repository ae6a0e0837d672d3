//! PnL rebuild engine: a three-phase full recompute of every user's
//! position/PnL history from the event tables.

pub mod engine;
pub mod persist;

pub use engine::{EngineState, RebuildEngine};

use serde::Serialize;

pub const MAX_OUTCOMES: usize = 8;

/// Token index marking an event that touches every outcome of a condition.
pub const ALL_OUTCOMES: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventType {
    Buy = 0,
    Sell = 1,
    Split = 2,
    Merge = 3,
    Redemption = 4,
}

/// Compact event, collected per user during Phase 2.
///
/// `amount` is in raw token units (1e6 = one full token); `price` is the
/// unit price scaled by 1e6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub timestamp: i64,
    pub cond_idx: u32,
    pub ty: EventType,
    pub token_idx: u8,
    pub amount: i64,
    pub price: i64,
}

/// Condition metadata from Phase 1. A zero denominator means unresolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionInfo {
    pub outcome_count: u8,
    pub payout_numerators: Vec<i64>,
    pub payout_denominator: i64,
}

/// Post-event state recorded per replayed event.
///
/// `positions` are raw token units; `cost_basis` and `realized_pnl` are raw
/// USDC (already divided down from amount-times-price units).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub timestamp: i64,
    pub delta: i64,
    pub price: i64,
    pub positions: [i64; MAX_OUTCOMES],
    pub cost_basis: i64,
    pub realized_pnl: i64,
    pub event_type: u8,
    pub token_idx: u8,
    pub outcome_count: u8,
}

/// One condition's chronological snapshot chain for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserConditionHistory {
    pub cond_idx: u32,
    pub snapshots: Vec<Snapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserState {
    pub conditions: Vec<UserConditionHistory>,
}

/// Transient per user-condition replay accumulator. `cost` is kept in
/// amount-times-price-1e6 units for lossless proportional cost removal;
/// `realized_pnl` is raw USDC.
#[derive(Debug, Clone, Copy)]
pub struct ReplayState {
    pub positions: [i64; MAX_OUTCOMES],
    pub cost: [i64; MAX_OUTCOMES],
    pub realized_pnl: i64,
}

impl Default for ReplayState {
    fn default() -> Self {
        Self {
            positions: [0; MAX_OUTCOMES],
            cost: [0; MAX_OUTCOMES],
            realized_pnl: 0,
        }
    }
}

/// Rebuild progress as exposed by the status endpoint.
///
/// phase: 0=idle 1=metadata 2..=5=event scans 6=replay 7=done.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RebuildProgress {
    pub running: bool,
    pub phase: i32,
    pub total_conditions: i64,
    pub total_tokens: i64,
    pub total_events: i64,
    pub total_users: i64,
    pub processed_users: i64,
    pub eof_rows: i64,
    pub eof_events: i64,
    pub split_rows: i64,
    pub split_events: i64,
    pub merge_rows: i64,
    pub merge_events: i64,
    pub redemption_rows: i64,
    pub redemption_events: i64,
    pub eof_done: bool,
    pub split_done: bool,
    pub merge_done: bool,
    pub redemption_done: bool,
    pub phase1_ms: i64,
    pub phase2_ms: i64,
    pub phase3_ms: i64,
}
