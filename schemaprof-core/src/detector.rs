//! Change detection between the live schema and the last persisted state.

use crate::error::{ProfilerError, Result};
use crate::fingerprint::StructureHash;
use crate::models::TableDescriptor;
use crate::state::SchemaState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Classification of every table seen in a run.
///
/// The four sets are pairwise disjoint. `unchanged`, `changed` and `added`
/// together are exactly the current table universe; `removed` holds tables
/// only the previous state knew about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub unchanged: BTreeSet<String>,
    pub changed: BTreeSet<String>,
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl ChangeSet {
    /// Tables that need fresh profiling: `changed ∪ added`, in name order.
    pub fn to_profile(&self) -> Vec<String> {
        self.changed.union(&self.added).cloned().collect()
    }

    /// Returns true if nothing changed since the previous run.
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }

    /// Number of tables present in the current schema.
    pub fn current_table_count(&self) -> usize {
        self.unchanged
            .len()
            .saturating_add(self.changed.len())
            .saturating_add(self.added.len())
    }
}

/// Ratio of row count drift relative to the previous count.
///
/// The denominator is `max(previous, 1)` so empty tables still produce a
/// finite ratio.
#[allow(clippy::cast_precision_loss)]
pub fn data_change_ratio(previous: u64, current: u64) -> f64 {
    previous.abs_diff(current) as f64 / previous.max(1) as f64
}

/// Classifies live tables against a previous state.
#[derive(Debug, Clone, Copy)]
pub struct ChangeDetector {
    data_change_threshold: f64,
}

impl ChangeDetector {
    /// Creates a detector. A ratio equal to `data_change_threshold` counts as
    /// changed.
    pub const fn new(data_change_threshold: f64) -> Self {
        Self {
            data_change_threshold,
        }
    }

    /// Configured threshold.
    pub const fn threshold(&self) -> f64 {
        self.data_change_threshold
    }

    /// Partitions `current` into unchanged, changed and added tables and
    /// collects the tables that disappeared since `previous`.
    ///
    /// Without a previous state every current table is added.
    ///
    /// # Errors
    /// Returns [`ProfilerError::MalformedMetadata`] if the source reports the
    /// same table twice or a table's columns cannot be fingerprinted.
    pub fn detect(
        &self,
        current: &[TableDescriptor],
        previous: Option<&SchemaState>,
    ) -> Result<ChangeSet> {
        let mut changes = ChangeSet::default();
        let mut seen = BTreeSet::new();

        for table in current {
            if !seen.insert(table.name.as_str()) {
                return Err(ProfilerError::malformed(
                    &table.name,
                    "table reported more than once by the metadata source",
                ));
            }

            let hash = StructureHash::compute(&table.name, &table.columns)?;

            let Some(fingerprint) = previous.and_then(|state| state.get(&table.name)) else {
                tracing::debug!("Table '{}' is new", table.name);
                changes.added.insert(table.name.clone());
                continue;
            };

            if fingerprint.structure_hash != hash {
                tracing::debug!("Table '{}' structure changed", table.name);
                changes.changed.insert(table.name.clone());
                continue;
            }

            let ratio = data_change_ratio(fingerprint.row_count_estimate, table.row_count_estimate);
            if ratio >= self.data_change_threshold {
                tracing::debug!(
                    "Table '{}' data changed: {} -> {} rows (ratio {:.4})",
                    table.name,
                    fingerprint.row_count_estimate,
                    table.row_count_estimate,
                    ratio
                );
                changes.changed.insert(table.name.clone());
            } else {
                changes.unchanged.insert(table.name.clone());
            }
        }

        if let Some(state) = previous {
            changes.removed = state
                .tables
                .keys()
                .filter(|name| !seen.contains(name.as_str()))
                .cloned()
                .collect();
        }

        tracing::info!(
            "Detected changes: {} unchanged, {} changed, {} added, {} removed",
            changes.unchanged.len(),
            changes.changed.len(),
            changes.added.len(),
            changes.removed.len()
        );

        Ok(changes)
    }
}
