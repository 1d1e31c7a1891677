//! Event bus port.
//!
//! The bus delivers events to subscribers after they have been written to
//! the event store. It is not a source of truth: the store is.

pub mod bus;
pub mod error;
pub mod memory;

pub use bus::EventBus;
pub use error::{EventBusError, Result};
pub use memory::InMemoryEventBus;
