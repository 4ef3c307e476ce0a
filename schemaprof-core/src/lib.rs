//! Incremental schema profiling engine.
//!
//! Profiles a relational database's tables without re-scanning everything on
//! every run. Each run compares the live schema against the fingerprints
//! persisted by the previous run, profiles only what changed, and serves the
//! rest from a bounded profile cache.
//!
//! # Guarantees
//! - Persisted state is replaced atomically; a failed save keeps the old state
//! - One table's failure or timeout never aborts the others
//! - Results are keyed by table name and independent of completion order
//! - Connection strings are redacted before they reach logs or errors
//!
//! # Architecture
//! - [`fingerprint`]: structural digests of table columns
//! - [`state`]: persisted fingerprint set and its file store
//! - [`cache`]: memory-bounded LRU of table profiles
//! - [`detector`]: unchanged / changed / added / removed classification
//! - [`scheduler`]: sequential, parallel and adaptive job execution
//! - [`orchestrator`]: the incremental run itself
//! - [`adapters`]: the [`MetadataSource`] seam and its SQLite implementation

pub mod adapters;
pub mod cache;
pub mod config;
pub mod detector;
pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod scheduler;
pub mod state;

// Re-export commonly used types
pub use adapters::MetadataSource;
pub use cache::{CacheStats, ProfileCache};
pub use config::{ProcessingStrategy, ProfilerConfig, SamplingConfig};
pub use detector::{ChangeDetector, ChangeSet};
pub use error::{JobError, ProfilerError, Result};
pub use fingerprint::{StructureHash, TableFingerprint};
pub use models::{ColumnDescriptor, TableDescriptor, TableProfile};
pub use orchestrator::{IncrementalProfiler, IncrementalReport, RunMode, RunStats};
pub use scheduler::{ExecutionPlan, SchedulerConfig, TableScheduler};
pub use state::{FileStateStore, InvalidStateReason, SchemaState, StateLoad, StateStore};
