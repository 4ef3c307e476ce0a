//! Metadata source abstraction consumed by the profiling engine.
//!
//! The engine never talks to a database directly. Everything it knows about
//! the live schema comes through a [`MetadataSource`]: a cheap listing of
//! table descriptors used for change detection, and an expensive per-table
//! profiling call used only for tables that need it.
//!
//! # Module Structure
//! - `sqlite`: SQLite implementation backed by an `sqlx` pool (feature `sqlite`)

use crate::Result;
use crate::models::{TableDescriptor, TableProfile};
use async_trait::async_trait;

#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Source of schema metadata and table profiles.
///
/// # Object Safety
/// This trait is object-safe; the scheduler shares one source between its
/// workers as `Arc<dyn MetadataSource>`.
///
/// # Security
/// - All operations are read-only
/// - Implementations must not put credentials into error messages
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Lists every user table with its ordered columns and a row count
    /// estimate.
    ///
    /// # Errors
    /// Returns error if the tables cannot be enumerated at all. An empty list
    /// is not an error here.
    async fn list_tables(&self) -> Result<Vec<TableDescriptor>>;

    /// Builds the full profile of one table.
    ///
    /// # Errors
    /// Returns error if this table cannot be profiled. The failure is
    /// recorded against the table and never affects other tables.
    async fn profile_table(&self, table: &str) -> Result<TableProfile>;
}
