pub mod register;

pub use register::{RegisterAck, RegisterSpec};
