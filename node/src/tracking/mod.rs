mod tracker;

pub use tracker::{MessageCallback, MessageTracker};
