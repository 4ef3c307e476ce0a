//! Incremental orchestrator.
//!
//! One call to [`IncrementalProfiler::profile`] walks the run through
//! load state, detect changes, schedule changed tables, merge with the cache
//! and persist. A missing, invalid or foreign state puts the run into full
//! mode: the change detector then sees no previous state and marks every
//! table as added, so no other phase special-cases a first run.
//!
//! The profile cache and state are written only during merge and persist,
//! after the scheduler has finished.

use crate::adapters::MetadataSource;
use crate::cache::ProfileCache;
use crate::config::ProfilerConfig;
use crate::detector::{ChangeDetector, ChangeSet};
use crate::error::{JobError, ProfilerError, Result};
use crate::fingerprint::TableFingerprint;
use crate::models::{TableDescriptor, TableProfile};
use crate::scheduler::{ExecutionPlan, TableScheduler};
use crate::state::{InvalidStateReason, SchemaState, StateLoad, StateStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

/// Whether a run could build on a trusted previous state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Incremental,
    Full,
}

/// Counters for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub tables_total: usize,
    /// Tables profiled successfully during this run
    pub tables_profiled: usize,
    /// Unchanged tables served from the cache
    pub tables_reused: usize,
    pub tables_failed: usize,
    pub duration_ms: u64,
    /// Plan the scheduler used, if anything was scheduled
    pub execution: Option<ExecutionPlan>,
}

/// Merged result of one incremental profiling run.
///
/// `profiles` and `failures` are keyed by table name, so two runs over the
/// same inputs produce identical reports regardless of job completion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementalReport {
    pub database_name: String,
    pub schema_name: Option<String>,
    pub mode: RunMode,
    pub changes: ChangeSet,
    pub profiles: BTreeMap<String, TableProfile>,
    /// Fingerprint each profile was taken under, as persisted for this run
    #[serde(default)]
    pub fingerprints: BTreeMap<String, TableFingerprint>,
    pub failures: BTreeMap<String, JobError>,
    /// Unchanged tables re-profiled because their cache entry was missing
    pub forced_reprofiles: BTreeSet<String>,
    pub state_persisted: bool,
    pub persist_error: Option<String>,
    pub stats: RunStats,
}

impl IncrementalReport {
    /// Returns true if every current table has a profile.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Profiles from this report that are still current for `state`.
    ///
    /// A profile is kept only if the report belongs to the same database and
    /// schema and recorded exactly the fingerprint `state` now holds for the
    /// table. Anything else was superseded by a later run whose report was
    /// never written.
    pub fn reusable_profiles(&self, state: &SchemaState) -> Vec<TableProfile> {
        if self.database_name != state.database_name || self.schema_name != state.schema_name {
            return Vec::new();
        }

        self.profiles
            .iter()
            .filter(|(table, _)| match (self.fingerprints.get(*table), state.get(table)) {
                (Some(recorded), Some(current)) if recorded == current => true,
                _ => {
                    tracing::debug!("Dropping superseded profile for '{}'", table);
                    false
                }
            })
            .map(|(_, profile)| profile.clone())
            .collect()
    }
}

/// Runs incremental profiling passes for one database.
///
/// Runs on the same profiler are serialized; a second call waits for the
/// first to finish.
pub struct IncrementalProfiler {
    config: ProfilerConfig,
    store: Arc<dyn StateStore>,
    cache: Arc<ProfileCache>,
    detector: ChangeDetector,
    scheduler: TableScheduler,
    run_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for IncrementalProfiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncrementalProfiler")
            .field("config", &self.config)
            .field("cache", &self.cache.stats())
            .finish_non_exhaustive()
    }
}

impl IncrementalProfiler {
    /// Creates a profiler with a fresh cache sized from the configuration.
    ///
    /// # Errors
    /// Returns a configuration error if `config` does not validate.
    pub fn new(config: ProfilerConfig, store: Arc<dyn StateStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            cache: Arc::new(ProfileCache::new(config.cache_memory_budget_bytes)),
            detector: ChangeDetector::new(config.data_change_threshold),
            scheduler: TableScheduler::new(config.scheduler_config()),
            run_lock: tokio::sync::Mutex::new(()),
            store,
            config,
        })
    }

    /// Uses an existing cache, for example one shared with another profiler
    /// or warmed from a previous report.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<ProfileCache>) -> Self {
        self.cache = cache;
        self
    }

    /// The profile cache used by this profiler.
    pub const fn cache(&self) -> &Arc<ProfileCache> {
        &self.cache
    }

    /// The configuration this profiler was built with.
    pub const fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Runs one incremental profiling pass.
    ///
    /// Per-table failures are returned in the report, not as errors. A failed
    /// state save is reported through `state_persisted`/`persist_error`.
    ///
    /// # Errors
    /// - [`ProfilerError::Source`] if the source cannot list tables
    /// - [`ProfilerError::NoTables`] if it lists none
    /// - [`ProfilerError::MalformedMetadata`] if a table cannot be fingerprinted
    /// - [`ProfilerError::FirstRunTotalFailure`] if no table could be profiled
    ///   and none could be served from the cache
    pub async fn profile(&self, source: Arc<dyn MetadataSource>) -> Result<IncrementalReport> {
        let _single_flight = self.run_lock.lock().await;
        let started = Instant::now();

        tracing::info!(
            "Starting profiling run for database '{}'",
            self.config.database_name
        );

        let previous = self.load_previous_state().await;
        let mode = if previous.is_some() {
            RunMode::Incremental
        } else {
            RunMode::Full
        };

        let tables = source.list_tables().await.map_err(|e| match e {
            source_error @ ProfilerError::Source { .. } => source_error,
            other => ProfilerError::source_failed("listing tables", other),
        })?;
        if tables.is_empty() {
            tracing::error!(
                "Metadata source reported no tables for database '{}'",
                self.config.database_name
            );
            return Err(ProfilerError::NoTables {
                database: self.config.database_name.clone(),
            });
        }

        let changes = self.detector.detect(&tables, previous.as_ref())?;

        let mut profiles = BTreeMap::new();
        let mut forced_reprofiles = BTreeSet::new();
        for table in &changes.unchanged {
            match self.cache.get(table) {
                Some(profile) => {
                    profiles.insert(table.clone(), TableProfile::clone(&profile));
                }
                None => {
                    tracing::debug!(
                        "No cached profile for unchanged table '{}', re-profiling",
                        table
                    );
                    forced_reprofiles.insert(table.clone());
                }
            }
        }
        let tables_reused = profiles.len();

        let mut jobs = changes.to_profile();
        jobs.extend(forced_reprofiles.iter().cloned());
        jobs.sort();

        let mut failures = BTreeMap::new();
        let mut profiled = BTreeSet::new();
        let mut execution = None;
        if !jobs.is_empty() {
            let report = self.scheduler.run(&jobs, source).await;
            execution = Some(report.plan);
            for (table, result) in report.results {
                match result {
                    Ok(profile) => {
                        self.cache.put(table.clone(), profile.clone());
                        profiled.insert(table.clone());
                        profiles.insert(table, profile);
                    }
                    Err(e) => {
                        failures.insert(table, e);
                    }
                }
            }
        }

        for table in &changes.removed {
            self.cache.evict(table);
        }

        if profiles.is_empty() {
            tracing::error!(
                "No table could be profiled and none was cached ({} failed)",
                failures.len()
            );
            return Err(ProfilerError::FirstRunTotalFailure {
                failed: failures.len(),
            });
        }

        let state = self.next_state(&tables, previous.as_ref(), &profiled, &failures)?;
        let fingerprints = profiles
            .keys()
            .filter_map(|table| {
                state
                    .get(table)
                    .map(|fingerprint| (table.clone(), fingerprint.clone()))
            })
            .collect();
        let (state_persisted, persist_error) = match self.store.save(&state).await {
            Ok(()) => (true, None),
            Err(e) => {
                tracing::warn!("Profiles are valid but state was not saved: {}", e);
                (false, Some(e.to_string()))
            }
        };

        let stats = RunStats {
            tables_total: tables.len(),
            tables_profiled: profiled.len(),
            tables_reused,
            tables_failed: failures.len(),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            execution,
        };

        tracing::info!(
            "Profiling run finished in {}ms: {} profiled, {} reused, {} failed, {} removed",
            stats.duration_ms,
            stats.tables_profiled,
            stats.tables_reused,
            stats.tables_failed,
            changes.removed.len()
        );

        Ok(IncrementalReport {
            database_name: self.config.database_name.clone(),
            schema_name: self.config.schema_name.clone(),
            mode,
            changes,
            profiles,
            fingerprints,
            failures,
            forced_reprofiles,
            state_persisted,
            persist_error,
            stats,
        })
    }

    async fn load_previous_state(&self) -> Option<SchemaState> {
        if self.config.force_full_profile {
            tracing::info!("Full profile forced, ignoring persisted state");
            return None;
        }

        let state = match self.store.load().await {
            StateLoad::Loaded(state) => state,
            StateLoad::NotFound => {
                tracing::info!("No previous state, profiling all tables");
                return None;
            }
            StateLoad::Invalid(reason) => {
                tracing::warn!("Previous state rejected ({}), profiling all tables", reason);
                return None;
            }
        };

        if state.database_name != self.config.database_name
            || state.schema_name != self.config.schema_name
        {
            let reason = InvalidStateReason::DatabaseMismatch {
                expected: describe(&self.config.database_name, self.config.schema_name.as_deref()),
                found: describe(&state.database_name, state.schema_name.as_deref()),
            };
            tracing::warn!("Previous state rejected ({}), profiling all tables", reason);
            return None;
        }

        Some(state)
    }

    /// Builds the state to persist. Fresh fingerprints for tables profiled in
    /// this run; the previous fingerprint for every other current table that
    /// had one. Removed tables drop out because only current tables are
    /// visited.
    fn next_state(
        &self,
        tables: &[TableDescriptor],
        previous: Option<&SchemaState>,
        profiled: &BTreeSet<String>,
        failures: &BTreeMap<String, JobError>,
    ) -> Result<SchemaState> {
        let now = Utc::now();
        let mut state = SchemaState::new(
            self.config.database_name.clone(),
            self.config.schema_name.clone(),
        );

        for table in tables {
            if profiled.contains(&table.name) {
                state.insert(TableFingerprint::capture(table, now)?);
            } else if let Some(fingerprint) = previous.and_then(|p| p.get(&table.name)) {
                if failures.contains_key(&table.name) {
                    tracing::debug!(
                        "Keeping previous fingerprint for failed table '{}'",
                        table.name
                    );
                }
                state.insert(fingerprint.clone());
            }
        }

        Ok(state)
    }
}

fn describe(database: &str, schema: Option<&str>) -> String {
    schema.map_or_else(
        || format!("database '{database}'"),
        |schema| format!("database '{database}' schema '{schema}'"),
    )
}
