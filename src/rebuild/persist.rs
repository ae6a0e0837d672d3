//! Binary persistence of the full engine state.
//!
//! Little-endian layout: a magic/version header, counts, then conditions
//! (id, outcome count, payout data), the token map, and every user's
//! snapshot chains. Snapshots occupy exactly 112 bytes each.

use super::engine::{EngineState, RebuildEngine};
use super::{ConditionInfo, Snapshot, UserConditionHistory, UserState, MAX_OUTCOMES};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::atomic::Ordering;
use tracing::info;

pub const PERSIST_MAGIC: u32 = 0x524C_4E50; // "PNLR"
pub const PERSIST_VERSION: u32 = 1;
pub const PERSIST_FILE_NAME: &str = "rebuild.bin";

impl RebuildEngine {
    pub fn has_persist(dir: &Path) -> bool {
        dir.join(PERSIST_FILE_NAME).exists()
    }

    pub fn persist_file_size(dir: &Path) -> i64 {
        fs::metadata(dir.join(PERSIST_FILE_NAME))
            .map(|m| m.len() as i64)
            .unwrap_or(0)
    }

    /// Dump the current state to `<persist_dir>/rebuild.bin`.
    pub fn save_persist(&self) {
        self.write_persist().expect("persist write failed");
    }

    /// Replace the in-memory state from `<persist_dir>/rebuild.bin`.
    /// Panics if a rebuild or load is already in flight, or on a bad file.
    pub fn load_persist(&self) {
        let claimed = self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst);
        assert!(claimed.is_ok(), "rebuild already running");
        self.reset_progress();
        self.read_persist().expect("persist read failed");
    }

    fn write_persist(&self) -> io::Result<()> {
        let state = self.state.read().unwrap();
        fs::create_dir_all(&self.persist_dir)?;
        let path = self.persist_dir.join(PERSIST_FILE_NAME);
        let mut w = BufWriter::new(File::create(&path)?);

        w_u32(&mut w, PERSIST_MAGIC)?;
        w_u32(&mut w, PERSIST_VERSION)?;
        w_u32(&mut w, state.conditions.len() as u32)?;
        w_u32(&mut w, state.token_map.len() as u32)?;
        w_u32(&mut w, state.users.len() as u32)?;
        w_i64(&mut w, state.total_events)?;

        for (idx, cond) in state.conditions.iter().enumerate() {
            w_str(&mut w, &state.cond_ids[idx])?;
            w.write_all(&[cond.outcome_count])?;
            w_i64(&mut w, cond.payout_denominator)?;
            w_u32(&mut w, cond.payout_numerators.len() as u32)?;
            for numerator in &cond.payout_numerators {
                w_i64(&mut w, *numerator)?;
            }
        }

        // Token order is not part of the format; sort for stable bytes.
        let mut tokens: Vec<(&String, &(u32, u8))> = state.token_map.iter().collect();
        tokens.sort_by(|a, b| a.0.cmp(b.0));
        for (token_id, &(cond_idx, outcome_idx)) in tokens {
            w_str(&mut w, token_id)?;
            w_u32(&mut w, cond_idx)?;
            w.write_all(&[outcome_idx])?;
        }

        for (idx, user_id) in state.users.iter().enumerate() {
            w_str(&mut w, user_id)?;
            let user_state = &state.user_states[idx];
            w_u32(&mut w, user_state.conditions.len() as u32)?;
            for history in &user_state.conditions {
                w_u32(&mut w, history.cond_idx)?;
                w_u32(&mut w, history.snapshots.len() as u32)?;
                for snapshot in &history.snapshots {
                    write_snapshot(&mut w, snapshot)?;
                }
            }
        }

        w.flush()?;
        let size = fs::metadata(&path)?.len();
        info!(
            "[rebuild] persisted to {} ({} MB)",
            path.display(),
            size / 1_048_576
        );
        Ok(())
    }

    fn read_persist(&self) -> io::Result<()> {
        self.phase.store(1, Ordering::Relaxed);
        let path = self.persist_dir.join(PERSIST_FILE_NAME);
        let file = File::open(&path)?;
        let file_size = file.metadata()?.len();
        let mut r = BufReader::new(file);

        let magic = r_u32(&mut r)?;
        assert_eq!(magic, PERSIST_MAGIC, "bad persist magic");
        let version = r_u32(&mut r)?;
        assert_eq!(version, PERSIST_VERSION, "bad persist version");

        let condition_count = r_u32(&mut r)? as usize;
        let token_count = r_u32(&mut r)? as usize;
        let user_count = r_u32(&mut r)? as usize;
        let total_events = r_i64(&mut r)?;

        let mut conditions = Vec::with_capacity(condition_count);
        let mut cond_ids = Vec::with_capacity(condition_count);
        let mut cond_map = HashMap::with_capacity(condition_count);
        for idx in 0..condition_count {
            let id = r_str(&mut r)?;
            let outcome_count = r_u8(&mut r)?;
            let payout_denominator = r_i64(&mut r)?;
            let numerator_count = r_u32(&mut r)? as usize;
            let mut payout_numerators = Vec::with_capacity(numerator_count);
            for _ in 0..numerator_count {
                payout_numerators.push(r_i64(&mut r)?);
            }
            cond_map.insert(id.clone(), idx as u32);
            conditions.push(ConditionInfo {
                outcome_count,
                payout_numerators,
                payout_denominator,
            });
            cond_ids.push(id);
        }

        let mut token_map = HashMap::with_capacity(token_count);
        for _ in 0..token_count {
            let token_id = r_str(&mut r)?;
            let cond_idx = r_u32(&mut r)?;
            let outcome_idx = r_u8(&mut r)?;
            token_map.insert(token_id, (cond_idx, outcome_idx));
        }

        self.phase.store(6, Ordering::Relaxed);
        self.total_conditions
            .store(condition_count as i64, Ordering::Relaxed);
        self.total_tokens.store(token_count as i64, Ordering::Relaxed);
        self.total_users.store(user_count as i64, Ordering::Relaxed);
        self.total_events.store(total_events, Ordering::Relaxed);

        let mut users = Vec::with_capacity(user_count);
        let mut user_map = HashMap::with_capacity(user_count);
        let mut user_states = Vec::with_capacity(user_count);
        for idx in 0..user_count {
            let user_id = r_str(&mut r)?;
            user_map.insert(user_id.clone(), idx as u32);
            users.push(user_id);

            let history_count = r_u32(&mut r)? as usize;
            let mut histories = Vec::with_capacity(history_count);
            for _ in 0..history_count {
                let cond_idx = r_u32(&mut r)?;
                let snapshot_count = r_u32(&mut r)? as usize;
                let mut snapshots = Vec::with_capacity(snapshot_count);
                for _ in 0..snapshot_count {
                    snapshots.push(read_snapshot(&mut r)?);
                }
                histories.push(UserConditionHistory {
                    cond_idx,
                    snapshots,
                });
            }
            user_states.push(UserState {
                conditions: histories,
            });
            self.processed_users.fetch_add(1, Ordering::Relaxed);
        }

        {
            let mut state = self.state.write().unwrap();
            *state = EngineState {
                conditions,
                cond_ids,
                cond_map,
                token_map,
                users,
                user_map,
                user_states,
                total_events,
            };
        }

        self.phase.store(7, Ordering::Relaxed);
        self.running.store(false, Ordering::SeqCst);
        info!(
            "[rebuild] loaded from {} ({} MB): {} users, {} events",
            path.display(),
            file_size / 1_048_576,
            user_count,
            total_events
        );
        Ok(())
    }
}

fn w_u32(w: &mut impl Write, value: u32) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

fn w_i64(w: &mut impl Write, value: i64) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

fn w_str(w: &mut impl Write, value: &str) -> io::Result<()> {
    w_u32(w, value.len() as u32)?;
    w.write_all(value.as_bytes())
}

/// Raw 112-byte snapshot layout: 3 i64, 8 i64 positions, 2 i64, 3 u8, 5 pad.
fn write_snapshot(w: &mut impl Write, snapshot: &Snapshot) -> io::Result<()> {
    w_i64(w, snapshot.timestamp)?;
    w_i64(w, snapshot.delta)?;
    w_i64(w, snapshot.price)?;
    for position in &snapshot.positions {
        w_i64(w, *position)?;
    }
    w_i64(w, snapshot.cost_basis)?;
    w_i64(w, snapshot.realized_pnl)?;
    w.write_all(&[
        snapshot.event_type,
        snapshot.token_idx,
        snapshot.outcome_count,
    ])?;
    w.write_all(&[0u8; 5])
}

fn r_u8(r: &mut impl Read) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn r_u32(r: &mut impl Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn r_i64(r: &mut impl Read) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn r_str(r: &mut impl Read) -> io::Result<String> {
    let len = r_u32(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn read_snapshot(r: &mut impl Read) -> io::Result<Snapshot> {
    let timestamp = r_i64(r)?;
    let delta = r_i64(r)?;
    let price = r_i64(r)?;
    let mut positions = [0i64; MAX_OUTCOMES];
    for position in &mut positions {
        *position = r_i64(r)?;
    }
    let cost_basis = r_i64(r)?;
    let realized_pnl = r_i64(r)?;
    let event_type = r_u8(r)?;
    let token_idx = r_u8(r)?;
    let outcome_count = r_u8(r)?;
    let mut pad = [0u8; 5];
    r.read_exact(&mut pad)?;
    Ok(Snapshot {
        timestamp,
        delta,
        price,
        positions,
        cost_basis,
        realized_pnl,
        event_type,
        token_idx,
        outcome_count,
    })
}
