//! Neo4j access layer: backend seam, connection lifecycle and transactions

pub mod client;
pub mod connection;
pub mod executor;
pub mod models;
pub mod traits;

pub use client::Neo4jConnector;
pub use connection::{ConnectionManager, Session};
pub use executor::TransactionExecutor;
pub use models::*;
pub use traits::{GraphConnector, GraphPool, GraphTransaction};

#[cfg(test)]
pub(crate) mod mock;
