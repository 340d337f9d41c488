//! Read/ack watermark tracking over outstanding task IDs.
//!
//! `read_level` is the highest task ID the reader has observed; `ack_level`
//! is the highest ID below which every task is known complete. Acks may
//! arrive in any order; the ack level only advances over the contiguous
//! acknowledged prefix. `ack_level <= read_level` always holds - a violation
//! is a programming error, not a runtime fault.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::domain::TaskId;

#[derive(Debug, Default)]
struct AckState {
    read_level: i64,
    ack_level: i64,
    /// Observed-but-unacked IDs, value = acked flag.
    outstanding: BTreeMap<i64, bool>,
}

/// Cursor tracker over one task list's ID space.
///
/// All operations are atomic and self-consistent; no caller ever sees a
/// state where `ack_level > read_level`.
#[derive(Debug, Default)]
pub struct AckManager {
    state: Mutex<AckState>,
}

impl AckManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task observed by the reader and advance the read level.
    pub fn read_item(&self, id: TaskId) {
        let mut state = self.state.lock().expect("ack state poisoned");
        assert!(
            id.value() > state.ack_level,
            "read_item {} at or below ack level {}",
            id,
            state.ack_level
        );
        state.outstanding.insert(id.value(), false);
        if id.value() > state.read_level {
            state.read_level = id.value();
        }
    }

    /// Mark a task complete. Returns the (possibly advanced) ack level.
    /// Acking an ID that was never read is ignored.
    pub fn ack_item(&self, id: TaskId) -> TaskId {
        let mut state = self.state.lock().expect("ack state poisoned");
        if let Some(acked) = state.outstanding.get_mut(&id.value()) {
            *acked = true;
        }
        // Pop the contiguous acked prefix.
        loop {
            let Some((&first, &acked)) = state.outstanding.first_key_value() else {
                break;
            };
            if !acked {
                break;
            }
            state.outstanding.remove(&first);
            state.ack_level = first;
        }
        TaskId::new(state.ack_level)
    }

    /// Seed the read level from persisted state. Never regresses.
    pub fn set_read_level(&self, id: TaskId) {
        let mut state = self.state.lock().expect("ack state poisoned");
        if id.value() > state.read_level {
            state.read_level = id.value();
        }
    }

    /// Seed the ack level from persisted state. Never regresses, and pulls
    /// the read level along so the invariant holds.
    pub fn set_ack_level(&self, id: TaskId) {
        let mut state = self.state.lock().expect("ack state poisoned");
        if id.value() > state.ack_level {
            state.ack_level = id.value();
        }
        if id.value() > state.read_level {
            state.read_level = id.value();
        }
    }

    pub fn read_level(&self) -> TaskId {
        TaskId::new(self.state.lock().expect("ack state poisoned").read_level)
    }

    pub fn ack_level(&self) -> TaskId {
        TaskId::new(self.state.lock().expect("ack state poisoned").ack_level)
    }

    /// Count of read-but-unacked tasks. Used as the backlog hint.
    pub fn backlog_count(&self) -> i64 {
        self.state
            .lock()
            .expect("ack state poisoned")
            .outstanding
            .len() as i64
    }
}
