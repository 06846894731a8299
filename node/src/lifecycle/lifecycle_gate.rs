use super::{Gate, OnceFlag};

/// The blocking lifecycle state of a node.
///
/// The ready and finished gates are raised by inbound scheduler messages. The stop and
/// finish flags make sure the matching teardown runs at most once.
#[derive(Default)]
pub struct LifecycleGate {
    ready: Gate,
    finished: Gate,
    already_stopped: OnceFlag,
    already_finished: OnceFlag,
}

impl LifecycleGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready(&self) -> &Gate {
        &self.ready
    }

    pub fn finished(&self) -> &Gate {
        &self.finished
    }

    /// Claims the stop teardown, `true` only for the first caller.
    pub fn claim_stop(&self) -> bool {
        self.already_stopped.try_fire()
    }

    /// Claims the finish teardown, `true` only for the first caller.
    pub fn claim_finish(&self) -> bool {
        self.already_finished.try_fire()
    }

    pub fn is_stopped(&self) -> bool {
        self.already_stopped.has_fired()
    }

    /// Releases every waiter on both gates.
    pub fn release_all(&self) {
        self.ready.close();
        self.finished.close();
    }
}
