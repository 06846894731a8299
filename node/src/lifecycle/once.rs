use parking_lot::Mutex;

/// A flag that goes from unset to set exactly once.
#[derive(Default)]
pub struct OnceFlag {
    fired: Mutex<bool>,
}

impl OnceFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag.
    ///
    /// # Returns
    /// `true` only for the single caller that actually set it.
    pub fn try_fire(&self) -> bool {
        let mut fired = self.fired.lock();
        !std::mem::replace(&mut *fired, true)
    }

    pub fn has_fired(&self) -> bool {
        *self.fired.lock()
    }
}
