//! Bus provider implementations.

mod memory;

pub use memory::{DeadLetteredMessage, InMemoryProvider};
