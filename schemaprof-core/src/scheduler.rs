//! Table scheduler: runs profiling jobs against a metadata source.
//!
//! The strategy is resolved into an [`ExecutionPlan`] once per run. Every job
//! goes through the same path regardless of plan: acquire a connection
//! permit, then call the source under the per-job timeout. Each job runs in
//! its own task, so a panic or timeout in one table never reaches its
//! siblings. Dropping a run aborts its outstanding jobs, releasing their
//! connection permits.
//!
//! Worker and connection limits are independent. With more workers than
//! connections, workers wait on the connection limiter before calling the
//! source.

use crate::adapters::MetadataSource;
use crate::config::ProcessingStrategy;
use crate::error::JobError;
use crate::models::TableProfile;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Outcome of one table job.
pub type JobResult = std::result::Result<TableProfile, JobError>;

/// Scheduler settings, usually projected from
/// [`ProfilerConfig::scheduler_config`](crate::config::ProfilerConfig::scheduler_config).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub strategy: ProcessingStrategy,
    pub max_workers: usize,
    pub max_connections: usize,
    pub parallel_threshold: usize,
    pub job_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            strategy: ProcessingStrategy::Adaptive,
            max_workers: 4,
            max_connections: 10,
            parallel_threshold: 10,
            job_timeout: Duration::from_secs(300),
        }
    }
}

/// Concrete execution mode chosen for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExecutionPlan {
    Sequential,
    Parallel { workers: usize },
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => f.write_str("sequential"),
            Self::Parallel { workers } => write!(f, "parallel ({workers} workers)"),
        }
    }
}

/// Result of one scheduler run.
#[derive(Debug, Clone)]
pub struct ScheduleReport {
    /// One entry per distinct submitted table, keyed by name
    pub results: BTreeMap<String, JobResult>,
    pub plan: ExecutionPlan,
    pub elapsed: Duration,
}

impl ScheduleReport {
    /// Number of jobs that produced a profile.
    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|result| result.is_ok()).count()
    }

    /// Number of jobs that failed.
    pub fn failed(&self) -> usize {
        self.results.values().filter(|result| result.is_err()).count()
    }
}

/// Executes table profiling jobs with the configured strategy and limits.
#[derive(Debug, Clone)]
pub struct TableScheduler {
    config: SchedulerConfig,
}

impl TableScheduler {
    /// Creates a scheduler. Zero worker or connection limits are raised to 1.
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config: SchedulerConfig {
                max_workers: config.max_workers.max(1),
                max_connections: config.max_connections.max(1),
                ..config
            },
        }
    }

    /// Effective configuration.
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Resolves the strategy for a batch of `job_count` jobs.
    pub fn plan(&self, job_count: usize) -> ExecutionPlan {
        let parallel = ExecutionPlan::Parallel {
            workers: self.config.max_workers.min(job_count).max(1),
        };
        match self.config.strategy {
            ProcessingStrategy::Sequential => ExecutionPlan::Sequential,
            ProcessingStrategy::Parallel => parallel,
            ProcessingStrategy::Adaptive => {
                if job_count >= self.config.parallel_threshold && self.config.max_workers > 1 {
                    parallel
                } else {
                    ExecutionPlan::Sequential
                }
            }
        }
    }

    /// Profiles every table in `jobs` and returns one result per distinct
    /// table. Repeated names are profiled once.
    ///
    /// Never fails as a whole: per-table failures are recorded as
    /// [`JobError`]s in the report.
    pub async fn run(&self, jobs: &[String], source: Arc<dyn MetadataSource>) -> ScheduleReport {
        let started = Instant::now();

        let mut seen = HashSet::with_capacity(jobs.len());
        let jobs: Vec<String> = jobs
            .iter()
            .filter(|table| seen.insert(table.as_str()))
            .cloned()
            .collect();

        let plan = self.plan(jobs.len());
        tracing::info!("Scheduling {} table(s), {}", jobs.len(), plan);

        let limiter = Arc::new(Semaphore::new(self.config.max_connections));
        let timeout = self.config.job_timeout;
        let mut results = BTreeMap::new();

        match plan {
            ExecutionPlan::Sequential => {
                for table in jobs {
                    let (table, result) =
                        run_job(table, Arc::clone(&source), Arc::clone(&limiter), timeout).await;
                    record(&mut results, table, result);
                }
            }
            ExecutionPlan::Parallel { workers } => {
                let tasks = jobs.into_iter().map(|table| {
                    run_job(table, Arc::clone(&source), Arc::clone(&limiter), timeout)
                });
                let mut stream = stream::iter(tasks).buffer_unordered(workers);
                while let Some((table, result)) = stream.next().await {
                    record(&mut results, table, result);
                }
            }
        }

        let report = ScheduleReport {
            results,
            plan,
            elapsed: started.elapsed(),
        };

        tracing::info!(
            "Scheduler finished in {}ms: {} succeeded, {} failed",
            report.elapsed.as_millis(),
            report.succeeded(),
            report.failed()
        );

        report
    }
}

fn record(results: &mut BTreeMap<String, JobResult>, table: String, result: JobResult) {
    match &result {
        Ok(profile) => tracing::debug!(
            "Profiled table '{}' ({} columns)",
            table,
            profile.column_count()
        ),
        Err(e) => tracing::warn!("{}", e),
    }
    results.insert(table, result);
}

/// Aborts the wrapped task when dropped, so jobs never outlive the run that
/// spawned them.
struct AbortOnDrop(JoinHandle<JobResult>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs one job in its own task so a panic inside the source is contained.
async fn run_job(
    table: String,
    source: Arc<dyn MetadataSource>,
    limiter: Arc<Semaphore>,
    timeout: Duration,
) -> (String, JobResult) {
    let task_table = table.clone();
    let mut handle = AbortOnDrop(tokio::spawn(async move {
        profile_once(source.as_ref(), &limiter, &task_table, timeout).await
    }));

    let result = (&mut handle.0).await.unwrap_or_else(|e| {
        Err(JobError::Aborted {
            table: table.clone(),
            message: e.to_string(),
        })
    });
    (table, result)
}

async fn profile_once(
    source: &dyn MetadataSource,
    limiter: &Semaphore,
    table: &str,
    timeout: Duration,
) -> JobResult {
    let _permit = limiter.acquire().await.map_err(|e| JobError::Aborted {
        table: table.to_string(),
        message: e.to_string(),
    })?;

    match tokio::time::timeout(timeout, source.profile_table(table)).await {
        Ok(Ok(profile)) => Ok(profile),
        Ok(Err(e)) => Err(JobError::Profile {
            table: table.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Err(JobError::Timeout {
            table: table.to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}
