//! Testing utilities and mock implementations
//!
//! Mocks for exercising the session, publisher and monitor loop without a
//! broker or sensor hardware.

pub mod mocks;

pub use mocks::*;
