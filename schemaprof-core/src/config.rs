//! Profiling engine configuration.
//!
//! A [`ProfilerConfig`] is built once, validated, and then passed by value
//! into the components that need it. Nothing reads settings from global
//! state.
//!
//! # Example
//! ```rust
//! use schemaprof_core::config::{ProcessingStrategy, ProfilerConfig};
//!
//! let config = ProfilerConfig::new("app")
//!     .with_strategy(ProcessingStrategy::Parallel)
//!     .with_max_workers(8)
//!     .with_data_change_threshold(0.05);
//!
//! assert!(config.validate().is_ok());
//! ```

use crate::error::{ProfilerError, Result};
use crate::scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Default cache budget: 256 MiB.
pub const DEFAULT_CACHE_MEMORY_BUDGET_BYTES: usize = 256 * 1024 * 1024;

/// How scheduled tables are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStrategy {
    /// One table at a time, in input order
    Sequential,
    /// Bounded worker pool
    Parallel,
    /// Parallel once the batch reaches `parallel_threshold`, otherwise
    /// sequential
    #[default]
    Adaptive,
}

impl fmt::Display for ProcessingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Adaptive => "adaptive",
        };
        f.write_str(name)
    }
}

impl FromStr for ProcessingStrategy {
    type Err = ProfilerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            "adaptive" => Ok(Self::Adaptive),
            other => Err(ProfilerError::configuration(format!(
                "unknown processing strategy '{other}' (expected sequential, parallel or adaptive)"
            ))),
        }
    }
}

/// Row sampling settings used by metadata sources when building profiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Number of rows to sample per table; zero disables sampling
    pub sample_size: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self { sample_size: 10 }
    }
}

impl SamplingConfig {
    /// Builder method to set sample size.
    pub const fn with_sample_size(mut self, size: u32) -> Self {
        self.sample_size = size;
        self
    }
}

/// Settings for one incremental profiling engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// Name of the profiled database; stamped into the persisted state
    pub database_name: String,
    /// Optional schema within the database
    pub schema_name: Option<String>,
    pub strategy: ProcessingStrategy,
    /// Upper bound on concurrently running table jobs
    pub max_workers: usize,
    /// Upper bound on concurrent calls into the metadata source
    pub max_connections: usize,
    /// Batch size at which the adaptive strategy goes parallel
    pub parallel_threshold: usize,
    /// Relative row count drift (0.0 to 1.0) that marks a table changed
    pub data_change_threshold: f64,
    /// Per-table profiling timeout in milliseconds
    pub job_timeout_ms: u64,
    pub cache_memory_budget_bytes: usize,
    /// Ignore any persisted state and profile every table
    pub force_full_profile: bool,
    pub sampling: SamplingConfig,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            database_name: String::new(),
            schema_name: None,
            strategy: ProcessingStrategy::Adaptive,
            max_workers: 4,
            max_connections: 10,
            parallel_threshold: 10,
            data_change_threshold: 0.1,
            job_timeout_ms: 300_000,
            cache_memory_budget_bytes: DEFAULT_CACHE_MEMORY_BUDGET_BYTES,
            force_full_profile: false,
            sampling: SamplingConfig::default(),
        }
    }
}

impl ProfilerConfig {
    /// Creates a configuration with defaults for the named database.
    pub fn new(database_name: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            ..Self::default()
        }
    }

    /// Loads a configuration from a JSON file. Missing fields take their
    /// defaults.
    ///
    /// # Errors
    /// Returns an I/O error if the file cannot be read, a serialization error
    /// if it is not valid JSON, or a configuration error if the values fail
    /// [`validate`](Self::validate).
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ProfilerError::Io {
            context: format!("reading configuration file {}", path.display()),
            source: e,
        })?;
        let config: Self =
            serde_json::from_str(&contents).map_err(|e| ProfilerError::Serialization {
                context: format!("parsing configuration file {}", path.display()),
                source: e,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns a configuration error naming the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.database_name.trim().is_empty() {
            return Err(ProfilerError::configuration(
                "database_name must not be empty",
            ));
        }

        if self.max_workers == 0 {
            return Err(ProfilerError::configuration(
                "max_workers must be greater than 0",
            ));
        }

        if self.max_connections == 0 {
            return Err(ProfilerError::configuration(
                "max_connections must be greater than 0",
            ));
        }

        if !self.data_change_threshold.is_finite()
            || !(0.0..=1.0).contains(&self.data_change_threshold)
        {
            return Err(ProfilerError::configuration(format!(
                "data_change_threshold must be between 0.0 and 1.0, got {}",
                self.data_change_threshold
            )));
        }

        if self.job_timeout_ms == 0 {
            return Err(ProfilerError::configuration(
                "job_timeout_ms must be greater than 0",
            ));
        }

        if self.cache_memory_budget_bytes == 0 {
            return Err(ProfilerError::configuration(
                "cache_memory_budget_bytes must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Per-table timeout as a [`Duration`].
    pub const fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }

    /// The values the table scheduler needs.
    pub const fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            strategy: self.strategy,
            max_workers: self.max_workers,
            max_connections: self.max_connections,
            parallel_threshold: self.parallel_threshold,
            job_timeout: self.job_timeout(),
        }
    }

    /// Builder method to set the schema name.
    pub fn with_schema_name(mut self, schema_name: impl Into<String>) -> Self {
        self.schema_name = Some(schema_name.into());
        self
    }

    /// Builder method to set the processing strategy.
    pub const fn with_strategy(mut self, strategy: ProcessingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Builder method to set the worker limit.
    pub const fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Builder method to set the connection limit.
    pub const fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Builder method to set the adaptive parallel threshold.
    pub const fn with_parallel_threshold(mut self, parallel_threshold: usize) -> Self {
        self.parallel_threshold = parallel_threshold;
        self
    }

    /// Builder method to set the data change threshold.
    pub const fn with_data_change_threshold(mut self, threshold: f64) -> Self {
        self.data_change_threshold = threshold;
        self
    }

    /// Builder method to set the per-table timeout.
    ///
    /// Durations beyond `u64::MAX` milliseconds are clamped.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Builder method to set the cache budget in bytes.
    pub const fn with_cache_memory_budget(mut self, bytes: usize) -> Self {
        self.cache_memory_budget_bytes = bytes;
        self
    }

    /// Builder method to force a full profile on the next run.
    pub const fn with_force_full_profile(mut self, force: bool) -> Self {
        self.force_full_profile = force;
        self
    }

    /// Builder method to set sampling options.
    pub fn with_sampling(mut self, sampling: SamplingConfig) -> Self {
        self.sampling = sampling;
        self
    }
}
