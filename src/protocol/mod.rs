//! Wire formats: topic layout and message payloads

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
