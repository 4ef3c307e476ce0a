//! SQLite metadata source.
//!
//! # Module Structure
//! - `connection`: Connection string validation and pool creation
//! - `schema_collection`: Table descriptors and profile metadata via `sqlite_master` and PRAGMAs
//! - `sampling`: Sample row collection and JSON conversion
//!
//! # Security Guarantees
//! - All operations are read-only (SELECT/PRAGMA only)
//! - Identifiers are quoted before being interpolated into SQL
//! - Connection strings are never logged unredacted

pub mod connection;
pub mod sampling;
pub mod schema_collection;

#[cfg(test)]
mod tests;

use super::MetadataSource;
use crate::Result;
use crate::config::SamplingConfig;
use crate::models::{TableDescriptor, TableProfile};
use async_trait::async_trait;
use sqlx::SqlitePool;

/// [`MetadataSource`] backed by a SQLite database.
///
/// Profiling calls share one `sqlx` pool; the pool size is the hard limit on
/// concurrent queries against the file.
#[derive(Clone)]
pub struct SqliteSource {
    pool: SqlitePool,
    sampling: SamplingConfig,
}

impl std::fmt::Debug for SqliteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSource")
            .field("sampling", &self.sampling)
            .field("pool_size", &self.pool.size())
            .finish_non_exhaustive()
    }
}

impl SqliteSource {
    /// Opens a read-only pool on the given database.
    ///
    /// # Connection String Formats
    /// - `sqlite:///path/to/database.db` - Absolute file path
    /// - `sqlite://./relative/path.db` - Relative file path
    /// - `/path/to/database.db` - Bare file path
    ///
    /// # Errors
    /// Returns a configuration error for an unrecognized connection string
    /// and a source error if the database cannot be opened.
    pub async fn connect(
        connection_string: &str,
        max_connections: u32,
        sampling: SamplingConfig,
    ) -> Result<Self> {
        let pool = connection::create_pool(connection_string, max_connections).await?;
        Ok(Self::from_pool(pool, sampling))
    }

    /// Wraps an existing pool.
    pub const fn from_pool(pool: SqlitePool, sampling: SamplingConfig) -> Self {
        Self { pool, sampling }
    }

    /// The underlying pool.
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes the pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl MetadataSource for SqliteSource {
    async fn list_tables(&self) -> Result<Vec<TableDescriptor>> {
        schema_collection::list_tables(&self.pool).await
    }

    async fn profile_table(&self, table: &str) -> Result<TableProfile> {
        let mut profile = schema_collection::profile_structure(&self.pool, table).await?;
        profile.sample_rows =
            sampling::sample_rows(&self.pool, table, &profile.primary_keys, &self.sampling).await?;
        Ok(profile)
    }
}
