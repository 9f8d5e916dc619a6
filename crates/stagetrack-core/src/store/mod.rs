//! In-memory implementations of the persistence ports.
//!
//! Used when no database DSN is configured and throughout the test
//! suites. Production deployments use the `stagetrack-postgres` crate.

mod memory;

pub use memory::{MemoryClientStore, MemoryMetricCache, MemoryMetricStore, MemoryUserStore};
