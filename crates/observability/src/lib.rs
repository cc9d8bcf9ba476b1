//! Process-wide tracing setup for the identity core.

pub mod tracing;

pub use tracing::{LogFormat, init, init_with};
