//! The single in-flight `WAIT` barrier.
//!
//! §9 design note: the source keeps one process-global acknowledgement channel and races
//! concurrent WAITs against it unintentionally. We keep the "only one WAIT in flight"
//! behavior explicit instead of accidental: starting a new WAIT discards whatever slot
//! preceded it, and every `REPLCONF ACK` from a replica session signals whichever slot is
//! currently open.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

struct WaitSlot {
    acked: i64,
}

/// A process-wide barrier that `WAIT` opens and every `REPLCONF ACK` arrival feeds.
pub struct WaitBarrier {
    slot: Mutex<Option<WaitSlot>>,
    signal: Condvar,
}

impl WaitBarrier {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            signal: Condvar::new(),
        }
    }

    /// Opens a fresh slot, discarding any previous one (§4.5.4: "starting a new WAIT
    /// discards any previous pending channel").
    pub fn begin(&self) {
        let mut guard = self.slot.lock().expect("wait barrier lock poisoned");
        *guard = Some(WaitSlot { acked: 0 });
    }

    /// Records one `REPLCONF ACK` arrival against the currently open slot, if any.
    /// Excess signals (beyond what any waiter is blocked on) are simply coalesced into a
    /// higher count; nothing is lost and nothing blocks the reporting connection.
    pub fn notify(&self) {
        let mut guard = self.slot.lock().expect("wait barrier lock poisoned");
        if let Some(slot) = guard.as_mut() {
            slot.acked += 1;
            self.signal.notify_all();
        }
    }

    /// Blocks until `target` acknowledgements have arrived on the currently open slot or
    /// `timeout` elapses, returning the count observed either way.
    pub fn wait_for(&self, target: i64, timeout: Duration) -> i64 {
        let deadline = Instant::now() + timeout;
        let mut guard = self.slot.lock().expect("wait barrier lock poisoned");
        loop {
            let acked = guard.as_ref().map(|s| s.acked).unwrap_or(0);
            if acked >= target {
                return acked;
            }
            let now = Instant::now();
            if now >= deadline {
                return acked;
            }
            let (next_guard, timeout_result) = self
                .signal
                .wait_timeout(guard, deadline - now)
                .expect("wait barrier lock poisoned");
            guard = next_guard;
            if timeout_result.timed_out() {
                return guard.as_ref().map(|s| s.acked).unwrap_or(0);
            }
        }
    }
}

impl Default for WaitBarrier {
    fn default() -> Self {
        Self::new()
    }
}
