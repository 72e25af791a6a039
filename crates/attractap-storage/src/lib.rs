//! Storage layer for the Attractap reader gateway.
//!
//! This crate provides SQLite-backed implementations of the collaborator
//! traits in [`attractap_core::services`], plus a filesystem firmware
//! catalog.
//!
//! # Architecture
//!
//! - [`Database`] - Connection pool manager with automatic migrations
//! - [`repositories`] - One repository per table group, each implementing
//!   the matching core trait (`ReaderStore`, `CardStore`, `UserDirectory`,
//!   `UsageService`, `MaintenanceService`)
//! - [`FsFirmwareCatalog`] - `FirmwareCatalog` over a directory of binaries
//!
//! Repositories expose their own `StorageResult` methods for provisioning
//! and tests; the trait implementations convert into `attractap_core::Error`.
//!
//! # Example
//!
//! ```no_run
//! use attractap_core::services::ReaderStore;
//! use attractap_core::ReaderId;
//! use attractap_storage::{Database, DatabaseConfig, SqliteReaderRepository};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(DatabaseConfig::new("attractap.db")).await?;
//! let readers = SqliteReaderRepository::new(db.pool().clone());
//!
//! if let Some(reader) = readers.find_by_id(ReaderId::new(1)).await? {
//!     println!("{} serves {} resources", reader.name, reader.resources.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # SQL Injection Prevention
//!
//! All queries use parameterized statements via SQLx.

pub mod connection;
pub mod error;
pub mod firmware;
pub mod models;
pub mod repositories;

pub use connection::{Database, DatabaseConfig};
pub use error::{StorageError, StorageResult};
pub use firmware::FsFirmwareCatalog;
pub use repositories::{
    SqliteCardRepository, SqliteMaintenanceRepository, SqliteReaderRepository,
    SqliteResourceRepository, SqliteUsageRepository, SqliteUserRepository,
};
