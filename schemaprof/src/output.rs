//! Report file handling.
//!
//! The report of one run is the cache seed of the next, so it is written
//! atomically and read back leniently: a missing or unreadable report only
//! means a colder cache. Profiles are only seeded when their recorded
//! fingerprint still matches the saved state.

use schemaprof_core::error::ProfilerError;
use schemaprof_core::{IncrementalReport, Result, SchemaState, TableProfile};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Writes the report as pretty-printed JSON, replacing any previous report
/// atomically.
pub async fn write_report(report: &IncrementalReport, output_path: &Path) -> Result<()> {
    let json_data =
        serde_json::to_string_pretty(report).map_err(|e| ProfilerError::Serialization {
            context: "run report".to_string(),
            source: e,
        })?;

    let temp_path = temp_path_for(output_path);
    if let Err(e) = tokio::fs::write(&temp_path, json_data).await {
        return Err(ProfilerError::Io {
            context: format!("Failed to write to {}", temp_path.display()),
            source: e,
        });
    }

    if let Err(e) = tokio::fs::rename(&temp_path, output_path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(ProfilerError::Io {
            context: format!("Failed to replace {}", output_path.display()),
            source: e,
        });
    }

    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map_or_else(|| "report".into(), |name| name.to_string_lossy().into_owned());
    path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()))
}

/// Reads the profiles of a previous report that are still current for `state`.
///
/// Returns nothing if the file is missing, unreadable or belongs to another
/// database or schema. Profiles taken under a fingerprint the state no longer
/// holds are dropped.
pub async fn load_previous_profiles(path: &Path, state: &SchemaState) -> Vec<TableProfile> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No previous report at {}", path.display());
            return Vec::new();
        }
        Err(e) => {
            tracing::warn!("Failed to read previous report {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    let report: IncrementalReport = match serde_json::from_str(&contents) {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!("Ignoring unreadable report {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    if report.database_name != state.database_name || report.schema_name != state.schema_name {
        tracing::warn!(
            "Ignoring report {} for database '{}'",
            path.display(),
            report.database_name
        );
        return Vec::new();
    }

    report.reusable_profiles(state)
}

/// Human-readable run summary printed to stdout.
pub fn summary(report: &IncrementalReport, output_path: &Path) -> String {
    let mut out = String::new();
    let stats = &report.stats;

    let _ = writeln!(out, "Profiling run completed ({} mode)", mode_name(report));
    let _ = writeln!(out, "Output: {}", output_path.display());
    let _ = writeln!(
        out,
        "Tables: {} total, {} profiled, {} reused, {} failed",
        stats.tables_total, stats.tables_profiled, stats.tables_reused, stats.tables_failed
    );
    let _ = writeln!(
        out,
        "Changes: {} changed, {} added, {} removed",
        report.changes.changed.len(),
        report.changes.added.len(),
        report.changes.removed.len()
    );
    if let Some(plan) = &stats.execution {
        let _ = writeln!(out, "Execution: {plan}");
    }
    let _ = writeln!(out, "Duration: {}ms", stats.duration_ms);

    for error in report.failures.values() {
        let _ = writeln!(out, "Failed: {error}");
    }
    if let Some(error) = &report.persist_error {
        let _ = writeln!(out, "Warning: state not saved: {error}");
    }

    out
}

const fn mode_name(report: &IncrementalReport) -> &'static str {
    match report.mode {
        schemaprof_core::RunMode::Incremental => "incremental",
        schemaprof_core::RunMode::Full => "full",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemaprof_core::{
        ChangeSet, ColumnDescriptor, ExecutionPlan, JobError, RunMode, RunStats, StructureHash,
        TableFingerprint,
    };
    use std::collections::{BTreeMap, BTreeSet};
    use tempfile::TempDir;

    fn fingerprint(table: &str, rows: u64) -> TableFingerprint {
        let columns = vec![ColumnDescriptor::new("id", "INTEGER", false, 0)];
        TableFingerprint {
            name: table.to_string(),
            structure_hash: StructureHash::compute(table, &columns).unwrap(),
            row_count_estimate: rows,
            last_profiled_at: chrono::Utc::now(),
        }
    }

    fn fingerprints() -> BTreeMap<String, TableFingerprint> {
        ["users", "orders"]
            .into_iter()
            .map(|table| (table.to_string(), fingerprint(table, 10)))
            .collect()
    }

    fn state(database_name: &str, fingerprints: &BTreeMap<String, TableFingerprint>) -> SchemaState {
        let mut state = SchemaState::new(database_name, None);
        for fingerprint in fingerprints.values() {
            state.insert(fingerprint.clone());
        }
        state
    }

    fn report(database_name: &str) -> IncrementalReport {
        let mut profiles = BTreeMap::new();
        profiles.insert("users".to_string(), TableProfile::new("users"));
        profiles.insert("orders".to_string(), TableProfile::new("orders"));

        let mut failures = BTreeMap::new();
        failures.insert(
            "audit".to_string(),
            JobError::Timeout {
                table: "audit".to_string(),
                timeout_ms: 5000,
            },
        );

        IncrementalReport {
            database_name: database_name.to_string(),
            schema_name: None,
            mode: RunMode::Incremental,
            changes: ChangeSet {
                unchanged: BTreeSet::from(["users".to_string()]),
                changed: BTreeSet::from(["orders".to_string(), "audit".to_string()]),
                added: BTreeSet::new(),
                removed: BTreeSet::from(["legacy".to_string()]),
            },
            profiles,
            fingerprints: fingerprints(),
            failures,
            forced_reprofiles: BTreeSet::new(),
            state_persisted: true,
            persist_error: None,
            stats: RunStats {
                tables_total: 3,
                tables_profiled: 1,
                tables_reused: 1,
                tables_failed: 1,
                duration_ms: 42,
                execution: Some(ExecutionPlan::Sequential),
            },
        }
    }

    #[tokio::test]
    async fn test_file_report_written_and_reloaded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");

        let report = report("shop.db");
        write_report(&report, &path).await.unwrap();
        let profiles = load_previous_profiles(&path, &state("shop.db", &report.fingerprints)).await;

        let names: Vec<_> = profiles.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["orders", "users"]);

        // Only the report itself is left behind
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn test_file_report_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");

        write_report(&report("shop.db"), &path).await.unwrap();
        let mut second = report("shop.db");
        second.profiles.remove("users");
        write_report(&second, &path).await.unwrap();

        let state = state("shop.db", &second.fingerprints);
        assert_eq!(load_previous_profiles(&path, &state).await.len(), 1);
    }

    #[tokio::test]
    async fn test_file_report_superseded_profiles_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        write_report(&report("shop.db"), &path).await.unwrap();

        // A later run re-profiled orders but never replaced the report
        let mut current = fingerprints();
        current.insert("orders".to_string(), fingerprint("orders", 500));
        let profiles = load_previous_profiles(&path, &state("shop.db", &current)).await;

        let names: Vec<_> = profiles.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["users"]);
    }

    #[tokio::test]
    async fn test_file_report_missing_or_foreign() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        let shop = state("shop.db", &fingerprints());
        assert!(load_previous_profiles(&path, &shop).await.is_empty());

        write_report(&report("other.db"), &path).await.unwrap();
        assert!(load_previous_profiles(&path, &shop).await.is_empty());

        let mut other_schema = report("shop.db");
        other_schema.schema_name = Some("archive".to_string());
        write_report(&other_schema, &path).await.unwrap();
        assert!(load_previous_profiles(&path, &shop).await.is_empty());

        std::fs::write(&path, "not json").unwrap();
        assert!(load_previous_profiles(&path, &shop).await.is_empty());
    }

    #[tokio::test]
    async fn test_file_report_into_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("report.json");
        let err = write_report(&report("shop.db"), &path).await.unwrap_err();
        assert!(matches!(err, ProfilerError::Io { .. }));
    }

    #[test]
    fn test_summary_lists_counts_and_failures() {
        let text = summary(&report("shop.db"), Path::new("out.json"));
        assert!(text.contains("incremental mode"));
        assert!(text.contains("3 total, 1 profiled, 1 reused, 1 failed"));
        assert!(text.contains("2 changed, 0 added, 1 removed"));
        assert!(text.contains("audit"));
        assert!(!text.contains("Warning"));
    }
}
