//! Incremental database schema profiler.
//!
//! This binary profiles the tables of a SQLite database, re-profiling only
//! the tables whose structure or size changed since the previous run.
//!
//! # Security Guarantees
//! - Read-only database operations only
//! - Connection strings are redacted before they are logged
//! - State and report files are replaced atomically

mod output;

use anyhow::Context;
use clap::Parser;
use schemaprof_core::adapters::sqlite::SqliteSource;
use schemaprof_core::adapters::sqlite::connection::database_name_from_url;
use schemaprof_core::error::redact_database_url;
use schemaprof_core::logging::init_logging;
use schemaprof_core::{
    FileStateStore, IncrementalProfiler, ProcessingStrategy, ProfileCache, ProfilerConfig,
    StateLoad, StateStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "schemaprof")]
#[command(about = "Incremental database schema profiler")]
#[command(version)]
#[command(long_about = "
schemaprof - Incremental database schema profiling

Each run compares the live schema against the fingerprints saved by the
previous run and profiles only tables that were added, changed structurally
or grew/shrank past the change threshold. Unchanged tables are served from
the previous report.

SUPPORTED DATABASES:
- SQLite (sqlite:// URLs or .db/.sqlite/.sqlite3 files)

EXAMPLES:
  schemaprof sqlite:///var/data/app.db
  schemaprof --strategy parallel --max-workers 8 ./app.db
  schemaprof --full --output report.json ./app.db
")]
struct Cli {
    /// Database connection URL
    #[arg(
        env = "DATABASE_URL",
        help = "Database connection string (credentials will be sanitized in logs)"
    )]
    database_url: String,

    /// State file path
    #[arg(
        long,
        default_value = "schemaprof.state.json",
        help = "File holding the table fingerprints of the previous run"
    )]
    state: PathBuf,

    /// Report file path
    #[arg(
        short,
        long,
        default_value = "schemaprof.profiles.json",
        help = "Output file for the run report (also seeds the next run's cache)"
    )]
    output: PathBuf,

    /// Configuration file
    #[arg(
        long,
        help = "JSON profiler configuration naming the database; flags override its values"
    )]
    config: Option<PathBuf>,

    /// Processing strategy
    #[arg(long, help = "Job execution strategy: sequential, parallel or adaptive")]
    strategy: Option<ProcessingStrategy>,

    #[arg(long, help = "Maximum number of tables profiled at once")]
    max_workers: Option<usize>,

    #[arg(long, help = "Maximum number of concurrent database connections")]
    max_connections: Option<usize>,

    #[arg(long, help = "Table count at which the adaptive strategy goes parallel")]
    parallel_threshold: Option<usize>,

    #[arg(
        long,
        help = "Relative row-count change (0.0-1.0) that triggers re-profiling"
    )]
    change_threshold: Option<f64>,

    #[arg(long, help = "Per-table profiling timeout in seconds")]
    timeout_secs: Option<u64>,

    #[arg(long, help = "Number of sample rows to collect per table")]
    sample_size: Option<u32>,

    /// Ignore persisted state
    #[arg(long, help = "Profile every table regardless of the saved state")]
    full: bool,

    /// Increase verbosity
    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    verbose: u8,

    /// Suppress output
    #[arg(short, long, help = "Suppress all output except errors")]
    quiet: bool,

    #[arg(long, help = "Emit logs as JSON lines")]
    log_json: bool,
}

impl Cli {
    /// Builds the profiler configuration: defaults, then the config file,
    /// then command-line overrides.
    fn profiler_config(&self) -> anyhow::Result<ProfilerConfig> {
        let mut config = match &self.config {
            Some(path) => ProfilerConfig::from_json_file(path)
                .with_context(|| format!("Failed to load configuration {}", path.display()))?,
            None => ProfilerConfig::new(database_name_from_url(&self.database_url)),
        };

        if let Some(strategy) = self.strategy {
            config = config.with_strategy(strategy);
        }
        if let Some(workers) = self.max_workers {
            config = config.with_max_workers(workers);
        }
        if let Some(connections) = self.max_connections {
            config = config.with_max_connections(connections);
        }
        if let Some(threshold) = self.parallel_threshold {
            config = config.with_parallel_threshold(threshold);
        }
        if let Some(threshold) = self.change_threshold {
            config = config.with_data_change_threshold(threshold);
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_job_timeout(Duration::from_secs(secs));
        }
        if let Some(size) = self.sample_size {
            let sampling = config.sampling.clone().with_sample_size(size);
            config = config.with_sampling(sampling);
        }
        if self.full {
            config = config.with_force_full_profile(true);
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet, cli.log_json)?;

    run(&cli).await
}

/// Runs one incremental profiling pass and writes the report.
async fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = cli.profiler_config()?;

    info!("Starting incremental profiling...");
    info!("Target: {}", redact_database_url(&cli.database_url));
    info!("State: {}", cli.state.display());
    info!("Output: {}", cli.output.display());

    let max_connections = u32::try_from(config.max_connections).unwrap_or(u32::MAX);
    let source = SqliteSource::connect(&cli.database_url, max_connections, config.sampling.clone())
        .await
        .context("Failed to open database")?;

    let store = Arc::new(FileStateStore::new(cli.state.clone()));
    let cache = Arc::new(ProfileCache::new(config.cache_memory_budget_bytes));
    if !config.force_full_profile
        && let StateLoad::Loaded(state) = store.load().await
        && state.database_name == config.database_name
        && state.schema_name == config.schema_name
    {
        let previous = output::load_previous_profiles(&cli.output, &state).await;
        let seeded = cache.warm(previous);
        if seeded > 0 {
            info!("Seeded cache with {} profile(s) from the previous report", seeded);
        }
    }

    let profiler = IncrementalProfiler::new(config, store)?.with_cache(cache);

    let result = profiler.profile(Arc::new(source.clone())).await;
    source.close().await;
    let report = result.context("Profiling run failed")?;

    output::write_report(&report, &cli.output).await?;
    info!("Report saved to {}", cli.output.display());

    if !cli.quiet {
        print!("{}", output::summary(&report, &cli.output));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("schemaprof").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["sqlite:///data/app.db"]);
        assert_eq!(cli.state, PathBuf::from("schemaprof.state.json"));
        assert_eq!(cli.output, PathBuf::from("schemaprof.profiles.json"));
        assert!(!cli.full);

        let config = cli.profiler_config().unwrap();
        assert_eq!(config.database_name, "app.db");
        assert_eq!(config.strategy, ProcessingStrategy::Adaptive);
        assert_eq!(config.max_workers, 4);
        assert!(!config.force_full_profile);
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = parse(&[
            "--strategy",
            "parallel",
            "--max-workers",
            "8",
            "--max-connections",
            "3",
            "--parallel-threshold",
            "2",
            "--change-threshold",
            "0.25",
            "--timeout-secs",
            "30",
            "--sample-size",
            "0",
            "--full",
            "-vv",
            "./shop.sqlite",
        ]);
        assert_eq!(cli.verbose, 2);

        let config = cli.profiler_config().unwrap();
        assert_eq!(config.database_name, "shop.sqlite");
        assert_eq!(config.strategy, ProcessingStrategy::Parallel);
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.max_connections, 3);
        assert_eq!(config.parallel_threshold, 2);
        assert!((config.data_change_threshold - 0.25).abs() < f64::EPSILON);
        assert_eq!(config.job_timeout(), Duration::from_secs(30));
        assert_eq!(config.sampling.sample_size, 0);
        assert!(config.force_full_profile);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(
            Cli::try_parse_from(["schemaprof", "--strategy", "eager", "app.db"]).is_err()
        );

        let cli = parse(&["--change-threshold", "1.5", "app.db"]);
        assert!(cli.profiler_config().is_err());

        let cli = parse(&["--max-workers", "0", "app.db"]);
        assert!(cli.profiler_config().is_err());
    }

    #[test]
    fn test_config_file_then_flags() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"{"database_name": "inventory", "max_workers": 2, "parallel_threshold": 50}"#,
        )
        .unwrap();

        let path = file.path().to_string_lossy().into_owned();
        let cli = parse(&["--config", &path, "--max-workers", "6", "app.db"]);
        let config = cli.profiler_config().unwrap();

        assert_eq!(config.database_name, "inventory");
        assert_eq!(config.max_workers, 6);
        assert_eq!(config.parallel_threshold, 50);
    }
}
