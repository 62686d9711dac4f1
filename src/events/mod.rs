//! Domain event system
//!
//! This module provides:
//! - `DomainEvent` / `EventKind`: typed events published after every operation
//! - `EventBus`: synchronous subscriber fan-out plus a broadcast stream for observers

mod bus;
mod types;

pub use bus::{install_debug_logging, EventBus, EventHandler, SubscriptionId};
pub use types::{DomainEvent, EventKind, EventPayload};
