use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct GateState {
    open: bool,
    closed: bool,
}

/// A broadcast boolean flag with a blocking wait.
///
/// Once raised it stays raised, any amount of callers may wait on it concurrently.
#[derive(Default)]
pub struct Gate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl Gate {
    /// Creates a new lowered `Gate`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag and wakes every waiter.
    pub fn set_true(&self) {
        let mut state = self.state.lock();
        state.open = true;
        self.cond.notify_all();
    }

    /// Returns whether the flag is raised.
    pub fn is_true(&self) -> bool {
        self.state.lock().open
    }

    /// Blocks until the flag is raised, the gate is closed or `timeout` elapses.
    ///
    /// # Returns
    /// The flag's value when the wait ended.
    pub fn wait_true(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        while !state.open && !state.closed {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }

        state.open
    }

    /// Releases every current and future waiter without raising the flag.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.cond.notify_all();
    }
}
