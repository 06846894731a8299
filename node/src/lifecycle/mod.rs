mod gate;
mod lifecycle_gate;
mod once;

pub use gate::Gate;
pub use lifecycle_gate::LifecycleGate;
pub use once::OnceFlag;
