//! Core data models shared between metadata sources and the profiling engine.
//!
//! Descriptors are the cheap, always-fetched view of a table used for change
//! detection. Profiles are the expensive result of actually profiling a table;
//! the engine never looks inside them beyond their name and size.

use serde::{Deserialize, Serialize};

/// Column definition as reported by a metadata source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub ordinal_position: u32,
}

impl ColumnDescriptor {
    /// Creates a column descriptor.
    pub fn new(
        name: impl Into<String>,
        data_type: impl Into<String>,
        is_nullable: bool,
        ordinal_position: u32,
    ) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable,
            ordinal_position,
        }
    }
}

/// Lightweight description of a live table: ordered columns plus a row count
/// estimate. This is all change detection needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    /// Columns in ordinal order
    pub columns: Vec<ColumnDescriptor>,
    pub row_count_estimate: u64,
}

impl TableDescriptor {
    /// Creates a table descriptor.
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDescriptor>, row_count_estimate: u64) -> Self {
        Self {
            name: name.into(),
            columns,
            row_count_estimate,
        }
    }
}

/// Profiled column information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    pub ordinal_position: u32,
    pub default_value: Option<String>,
}

/// Outgoing foreign key reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
}

/// Index summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
}

/// Profile of a single table produced by a metadata source.
///
/// Treated as an immutable value once produced; the cache and the run report
/// hand out shared references or clones, never mutate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableProfile {
    pub name: String,
    pub schema: Option<String>,
    pub estimated_row_count: u64,
    pub columns: Vec<ColumnProfile>,
    pub primary_keys: Vec<String>,
    pub foreign_keys: Vec<ForeignKeyRef>,
    pub indexes: Vec<IndexSummary>,
    /// Sampled rows as JSON objects
    #[serde(default)]
    pub sample_rows: Vec<serde_json::Value>,
}

impl TableProfile {
    /// Creates an empty profile for the named table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            estimated_row_count: 0,
            columns: Vec::new(),
            primary_keys: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            sample_rows: Vec::new(),
        }
    }

    /// Number of profiled columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Approximate in-memory footprint, measured as the serialized JSON size.
    ///
    /// The profile cache charges this amount against its memory budget.
    pub fn estimated_size_bytes(&self) -> usize {
        serde_json::to_vec(self).map_or_else(|_| std::mem::size_of::<Self>(), |bytes| bytes.len())
    }
}
