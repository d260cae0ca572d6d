//! Repositories consumed by the monitoring core
//!
//! The core never talks to a database directly. It works against the traits in
//! [`backend`], so the pipeline can run on top of any storage layer that honors
//! the indicator, schedule, alert and execution-result contracts.
//!
//! ## Backends
//!
//! - **In-Memory** ([`memory::MemoryStore`]): all repositories, no persistence.
//!   Used for tests and as the source of indicators/schedules loaded from the
//!   configuration file.
//! - **SQLite** (`storage-sqlite` feature): alerts and execution history in an
//!   embedded database.
//!
//! ## Usage
//!
//! ```no_run
//! use indicator_monitoring::storage::sqlite::SqliteStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SqliteStore::new("./alerts.db").await?;
//!     // Hand it to the IndicatorMonitor as alert repository and execution log
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{AlertRepository, ExecutionLog, IndicatorRepository, ScheduleRepository};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
