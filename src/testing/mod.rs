//! Testing utilities and mock implementations
//!
//! Doubles for agent services, the message broker and live client connections,
//! usable from unit tests and from the integration tests under `tests/`.

pub mod mocks;

pub use mocks::*;
