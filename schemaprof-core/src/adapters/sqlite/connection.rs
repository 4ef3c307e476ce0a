//! SQLite connection handling.
//!
//! # Connection Modes
//! - File-based: `sqlite:///path/to/database.db` or `sqlite://./relative.db`
//! - In-memory: `sqlite::memory:` or `:memory:` (each pooled connection sees
//!   its own empty database, so tests build pools by hand)

use crate::Result;
use crate::error::{ProfilerError, redact_database_url};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Validates SQLite connection string format.
///
/// # Errors
/// Returns a configuration error if the string is not a SQLite URL, a
/// database file path or `:memory:`.
pub fn validate_sqlite_connection_string(connection_string: &str) -> Result<()> {
    if connection_string == ":memory:" {
        return Ok(());
    }

    if has_sqlite_extension(connection_string) {
        return Ok(());
    }

    if connection_string.starts_with("sqlite:") {
        if connection_string.contains(":memory:") || connection_string.contains("mode=memory") {
            return Ok(());
        }

        if let Ok(url) = Url::parse(connection_string) {
            if url.scheme() != "sqlite" {
                return Err(ProfilerError::configuration(
                    "Connection string must use sqlite:// scheme",
                ));
            }
            return Ok(());
        }

        if connection_string.starts_with("sqlite://") {
            return Ok(());
        }
    }

    Err(ProfilerError::configuration(
        "Invalid SQLite connection string format: expected sqlite:// URL, file path, or :memory:",
    ))
}

fn has_sqlite_extension(path: &str) -> bool {
    path.ends_with(".db") || path.ends_with(".sqlite") || path.ends_with(".sqlite3")
}

/// Derives a database name from a connection string: the file name, or
/// `:memory:` for in-memory databases.
///
/// Directories are not part of the name, so `/a/app.db` and `/b/app.db` both
/// yield `app.db`. Profiling both from one working directory needs distinct
/// state and report paths.
pub fn database_name_from_url(connection_string: &str) -> String {
    if connection_string.contains(":memory:") {
        return ":memory:".to_string();
    }

    let path = connection_string
        .strip_prefix("sqlite://")
        .or_else(|| connection_string.strip_prefix("sqlite:"))
        .unwrap_or(connection_string);
    let path = path.split('?').next().unwrap_or(path);

    path.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map_or_else(|| "main".to_string(), ToString::to_string)
}

/// Normalizes connection string to SQLite URL format.
fn normalize_connection_string(connection_string: &str) -> String {
    if connection_string == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    if connection_string.starts_with("sqlite:") {
        return connection_string.to_string();
    }

    format!("sqlite://{connection_string}")
}

/// Opens a read-only pool with at most `max_connections` connections.
pub(crate) async fn create_pool(connection_string: &str, max_connections: u32) -> Result<SqlitePool> {
    validate_sqlite_connection_string(connection_string)?;

    let options = SqliteConnectOptions::from_str(&normalize_connection_string(connection_string))
        .map_err(|e| {
            ProfilerError::configuration(format!("Invalid SQLite connection string: {e}"))
        })?
        .read_only(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await
        .map_err(|e| {
            ProfilerError::source_failed(
                format!(
                    "Failed to open SQLite database {}",
                    redact_database_url(connection_string)
                ),
                e,
            )
        })?;

    tracing::debug!(
        "Opened SQLite pool on '{}' with up to {} connection(s)",
        database_name_from_url(connection_string),
        max_connections.max(1)
    );

    Ok(pool)
}
