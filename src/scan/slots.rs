use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// How often a blocked `acquire` re-checks the cancellation flag.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Scan-wide abort signal. Stops admission and makes in-flight conversations
/// unwind at their next stage boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct SlotState {
    active: usize,
    peak: usize,
}

/// Counting semaphore bounding the number of running scan tasks.
///
/// `active` is only changed under the mutex: incremented by
/// [`Slots::acquire`], decremented when the returned [`Permit`] is dropped.
#[derive(Debug)]
pub struct Slots {
    limit: usize,
    state: Mutex<SlotState>,
    changed: Condvar,
}

impl Slots {
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            limit: limit.max(1),
            state: Mutex::new(SlotState::default()),
            changed: Condvar::new(),
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn active(&self) -> usize {
        self.lock().active
    }

    /// Highest `active` value observed so far.
    pub fn peak(&self) -> usize {
        self.lock().peak
    }

    /// Blocks until a slot is free. Returns `None` if `cancel` fires first.
    pub fn acquire(self: &Arc<Self>, cancel: &CancelToken) -> Option<Permit> {
        let mut state = self.lock();
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            if state.active < self.limit {
                state.active += 1;
                state.peak = state.peak.max(state.active);
                return Some(Permit {
                    slots: Arc::clone(self),
                });
            }
            state = self
                .changed
                .wait_timeout(state, CANCEL_POLL)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    pub fn try_acquire(self: &Arc<Self>) -> Option<Permit> {
        let mut state = self.lock();
        if state.active < self.limit {
            state.active += 1;
            state.peak = state.peak.max(state.active);
            Some(Permit {
                slots: Arc::clone(self),
            })
        } else {
            None
        }
    }

    /// Blocks until every permit has been released.
    pub fn wait_idle(&self) {
        let mut state = self.lock();
        while state.active > 0 {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn release(&self) {
        let mut state = self.lock();
        state.active = state.active.saturating_sub(1);
        drop(state);
        self.changed.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One admitted scan task. Dropping it (normal return or unwinding panic)
/// frees the slot.
#[derive(Debug)]
pub struct Permit {
    slots: Arc<Slots>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.slots.release();
    }
}
