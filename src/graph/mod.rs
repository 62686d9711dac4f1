//! Graph consistency rules.
//!
//! ## Modules
//!
//! - [`dependency`]: `DependencyValidator`, BFS cycle detection over DEPENDS_ON edges

pub mod dependency;

pub use dependency::{path_exists, DependencyEdges, DependencyValidator, TransactionEdges};
