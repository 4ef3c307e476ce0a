//! Persisted profiling state.
//!
//! The state file records the fingerprint of every table as it was last
//! profiled. Loading never fails hard: a missing file is [`StateLoad::NotFound`]
//! and anything unreadable, unparseable or inconsistent is
//! [`StateLoad::Invalid`]. Both lead the orchestrator to a full reconciliation.
//!
//! Document shape (version 1):
//!
//! ```json
//! {
//!   "version": 1,
//!   "database_name": "app",
//!   "schema_name": null,
//!   "generated_at": "2024-05-01T12:00:00Z",
//!   "tables": {
//!     "users": { "structure_hash": "<hex>", "row_count": 100, "last_profiled": "2024-05-01T12:00:00Z" }
//!   }
//! }
//! ```

use crate::error::{ProfilerError, Result};
use crate::fingerprint::{StructureHash, TableFingerprint};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// The only state document version this build reads and writes.
pub const STATE_FORMAT_VERSION: u32 = 1;

/// Last-known fingerprint set for one database/schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaState {
    pub database_name: String,
    pub schema_name: Option<String>,
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    /// Fingerprints keyed by table name
    pub tables: BTreeMap<String, TableFingerprint>,
}

impl SchemaState {
    /// Creates an empty state stamped with the current time.
    pub fn new(database_name: impl Into<String>, schema_name: Option<String>) -> Self {
        Self {
            database_name: database_name.into(),
            schema_name,
            version: STATE_FORMAT_VERSION,
            generated_at: Utc::now(),
            tables: BTreeMap::new(),
        }
    }

    /// Inserts or replaces a table fingerprint.
    pub fn insert(&mut self, fingerprint: TableFingerprint) {
        self.tables.insert(fingerprint.name.clone(), fingerprint);
    }

    /// Looks up the fingerprint recorded for a table.
    pub fn get(&self, table: &str) -> Option<&TableFingerprint> {
        self.tables.get(table)
    }

    /// Number of tables recorded.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns true if no tables are recorded.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Parses and validates a state document.
    ///
    /// # Errors
    /// Returns the reason the document cannot be trusted.
    pub fn from_json(json: &str) -> std::result::Result<Self, InvalidStateReason> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| InvalidStateReason::Malformed(e.to_string()))?;

        let version = value.get("version");
        if version.and_then(serde_json::Value::as_u64) != Some(u64::from(STATE_FORMAT_VERSION)) {
            return Err(InvalidStateReason::UnsupportedVersion(
                version.map_or_else(|| "missing".to_string(), ToString::to_string),
            ));
        }

        let Some(tables) = value.get("tables").and_then(serde_json::Value::as_object) else {
            return Err(InvalidStateReason::TablesNotObject);
        };

        for (name, record) in tables {
            if record
                .get("row_count")
                .and_then(serde_json::Value::as_i64)
                .is_some_and(|count| count < 0)
            {
                return Err(InvalidStateReason::NegativeRowCount(name.clone()));
            }
        }

        // Typed pass over the raw text: `serde_json::Value` silently drops
        // duplicate keys, the typed visitor does not.
        let document: StateDocument = serde_json::from_str(json).map_err(|e| {
            let message = e.to_string();
            match message.strip_prefix(DUPLICATE_TABLE_PREFIX) {
                Some(rest) => InvalidStateReason::DuplicateTable(
                    rest.split('`').next().unwrap_or_default().to_string(),
                ),
                None => InvalidStateReason::Malformed(message),
            }
        })?;

        document.into_state()
    }

    /// Serializes the state as a pretty-printed version 1 document.
    ///
    /// # Errors
    /// Returns a serialization error if a row count does not fit the on-disk
    /// integer type.
    pub fn to_json(&self) -> Result<String> {
        let document = StateDocument::from_state(self)?;
        serde_json::to_string_pretty(&document).map_err(|e| ProfilerError::Serialization {
            context: "state document".to_string(),
            source: e,
        })
    }
}

/// Why a persisted state was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidStateReason {
    #[error("state file could not be read: {0}")]
    Unreadable(String),
    #[error("state document is malformed: {0}")]
    Malformed(String),
    #[error("unsupported state version {0}")]
    UnsupportedVersion(String),
    #[error("`tables` is not an object")]
    TablesNotObject,
    #[error("negative row count for table '{0}'")]
    NegativeRowCount(String),
    #[error("duplicate entry for table '{0}'")]
    DuplicateTable(String),
    #[error("state belongs to {found}, expected {expected}")]
    DatabaseMismatch { expected: String, found: String },
}

/// Outcome of loading persisted state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateLoad {
    /// A valid state document
    Loaded(SchemaState),
    /// No state has been persisted yet
    NotFound,
    /// A state document exists but cannot be trusted
    Invalid(InvalidStateReason),
}

impl StateLoad {
    /// The loaded state, if any. `NotFound` and `Invalid` both yield `None`.
    pub fn into_state(self) -> Option<SchemaState> {
        match self {
            Self::Loaded(state) => Some(state),
            Self::NotFound | Self::Invalid(_) => None,
        }
    }
}

/// Storage for the last-known fingerprint set.
///
/// Implementations never retry internally; the orchestrator decides what a
/// failed load or save means for the run.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the persisted state.
    async fn load(&self) -> StateLoad;

    /// Atomically replaces the persisted state.
    ///
    /// # Errors
    /// Returns [`ProfilerError::StoreWrite`] if the state could not be written.
    /// A failed save leaves the previous state in place.
    async fn save(&self, state: &SchemaState) -> Result<()>;
}

/// JSON file backed state store.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    /// Creates a store for the given file path. Nothing is touched on disk
    /// until the first load or save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map_or_else(|| "state".into(), |name| name.to_string_lossy().into_owned());
        self.path
            .with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> StateLoad {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No existing state found at {}", self.path.display());
                return StateLoad::NotFound;
            }
            Err(e) => {
                tracing::warn!("Failed to read state file {}: {}", self.path.display(), e);
                return StateLoad::Invalid(InvalidStateReason::Unreadable(e.to_string()));
            }
        };

        match SchemaState::from_json(&contents) {
            Ok(state) => {
                tracing::info!(
                    "Loaded state for {} table(s) from {}",
                    state.len(),
                    self.path.display()
                );
                StateLoad::Loaded(state)
            }
            Err(reason) => {
                tracing::warn!(
                    "Ignoring invalid state at {}: {}",
                    self.path.display(),
                    reason
                );
                StateLoad::Invalid(reason)
            }
        }
    }

    async fn save(&self, state: &SchemaState) -> Result<()> {
        let json = state
            .to_json()
            .map_err(|e| ProfilerError::store_write(&self.path, e))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ProfilerError::store_write(&self.path, e))?;
        }

        // Write to a sibling temp file, flush it to disk, then rename over the
        // target so readers only ever observe a complete document.
        let temp_path = self.temp_path();
        let write_result: std::io::Result<()> = async {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(json.as_bytes()).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&temp_path, &self.path).await
        }
        .await;

        if let Err(e) = write_result {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(ProfilerError::store_write(&self.path, e));
        }

        tracing::debug!(
            "Saved state for {} table(s) to {}",
            state.len(),
            self.path.display()
        );
        Ok(())
    }
}

const DUPLICATE_TABLE_PREFIX: &str = "duplicate table entry `";

/// On-disk representation of [`SchemaState`].
#[derive(Debug, Serialize, Deserialize)]
struct StateDocument {
    version: u32,
    database_name: String,
    schema_name: Option<String>,
    generated_at: DateTime<Utc>,
    #[serde(deserialize_with = "deserialize_unique_tables")]
    tables: BTreeMap<String, FingerprintRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FingerprintRecord {
    structure_hash: StructureHash,
    row_count: i64,
    last_profiled: DateTime<Utc>,
}

impl StateDocument {
    fn from_state(state: &SchemaState) -> Result<Self> {
        let mut tables = BTreeMap::new();
        for (name, fingerprint) in &state.tables {
            let row_count = i64::try_from(fingerprint.row_count_estimate).map_err(|_| {
                ProfilerError::configuration(format!(
                    "row count {} for table '{}' exceeds the state format range",
                    fingerprint.row_count_estimate, name
                ))
            })?;
            tables.insert(
                name.clone(),
                FingerprintRecord {
                    structure_hash: fingerprint.structure_hash,
                    row_count,
                    last_profiled: fingerprint.last_profiled_at,
                },
            );
        }

        Ok(Self {
            version: state.version,
            database_name: state.database_name.clone(),
            schema_name: state.schema_name.clone(),
            generated_at: state.generated_at,
            tables,
        })
    }

    fn into_state(self) -> std::result::Result<SchemaState, InvalidStateReason> {
        let mut tables = BTreeMap::new();
        for (name, record) in self.tables {
            let row_count_estimate = u64::try_from(record.row_count)
                .map_err(|_| InvalidStateReason::NegativeRowCount(name.clone()))?;
            tables.insert(
                name.clone(),
                TableFingerprint {
                    name,
                    structure_hash: record.structure_hash,
                    row_count_estimate,
                    last_profiled_at: record.last_profiled,
                },
            );
        }

        Ok(SchemaState {
            database_name: self.database_name,
            schema_name: self.schema_name,
            version: self.version,
            generated_at: self.generated_at,
            tables,
        })
    }
}

fn deserialize_unique_tables<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, FingerprintRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    struct UniqueTables;

    impl<'de> Visitor<'de> for UniqueTables {
        type Value = BTreeMap<String, FingerprintRecord>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("an object of table fingerprints")
        }

        fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut tables = BTreeMap::new();
            while let Some((name, record)) = map.next_entry::<String, FingerprintRecord>()? {
                if tables.contains_key(&name) {
                    return Err(serde::de::Error::custom(format!(
                        "{DUPLICATE_TABLE_PREFIX}{name}`"
                    )));
                }
                tables.insert(name, record);
            }
            Ok(tables)
        }
    }

    deserializer.deserialize_map(UniqueTables)
}

#[cfg(test)]
mod tests;
