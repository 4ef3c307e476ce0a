//! Structural fingerprints for tables.
//!
//! A [`StructureHash`] is a BLAKE3 digest over the ordered
//! `(name, data_type, is_nullable, ordinal_position)` tuples of a table's
//! columns. Every field is length-prefixed before hashing so that no two
//! different column lists can produce the same byte stream.

use crate::error::{ProfilerError, Result};
use crate::models::{ColumnDescriptor, TableDescriptor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Fixed-size digest of a table's column definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StructureHash(blake3::Hash);

impl StructureHash {
    /// Fingerprints the given columns, in the order given.
    ///
    /// # Errors
    /// Returns [`ProfilerError::MalformedMetadata`] if a column name is empty,
    /// a column name repeats, or an ordinal position repeats.
    pub fn compute(table: &str, columns: &[ColumnDescriptor]) -> Result<Self> {
        validate_columns(table, columns)?;

        let mut hasher = blake3::Hasher::new();
        hasher.update(&(columns.len() as u64).to_le_bytes());
        for column in columns {
            write_field(&mut hasher, column.name.as_bytes());
            write_field(&mut hasher, column.data_type.as_bytes());
            hasher.update(&[u8::from(column.is_nullable)]);
            hasher.update(&column.ordinal_position.to_le_bytes());
        }

        Ok(Self(hasher.finalize()))
    }

    /// Lowercase hex representation.
    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }
}

fn write_field(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn validate_columns(table: &str, columns: &[ColumnDescriptor]) -> Result<()> {
    let mut names = HashSet::with_capacity(columns.len());
    let mut ordinals = HashSet::with_capacity(columns.len());

    for column in columns {
        if column.name.is_empty() {
            return Err(ProfilerError::malformed(
                table,
                format!("column at ordinal {} has an empty name", column.ordinal_position),
            ));
        }
        if !names.insert(column.name.as_str()) {
            return Err(ProfilerError::malformed(
                table,
                format!("duplicate column name '{}'", column.name),
            ));
        }
        if !ordinals.insert(column.ordinal_position) {
            return Err(ProfilerError::malformed(
                table,
                format!("duplicate ordinal position {}", column.ordinal_position),
            ));
        }
    }

    Ok(())
}

impl fmt::Display for StructureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.to_hex().as_str())
    }
}

impl FromStr for StructureHash {
    type Err = blake3::HexError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        blake3::Hash::from_hex(s).map(Self)
    }
}

impl Serialize for StructureHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0.to_hex().as_str())
    }
}

impl<'de> Deserialize<'de> for StructureHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        hex.parse().map_err(serde::de::Error::custom)
    }
}

/// Last-seen fingerprint of one table.
///
/// Immutable once created; a re-profiled table gets a brand new fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFingerprint {
    pub name: String,
    pub structure_hash: StructureHash,
    pub row_count_estimate: u64,
    pub last_profiled_at: DateTime<Utc>,
}

impl TableFingerprint {
    /// Captures the structure digest and row count snapshot of a live table.
    ///
    /// # Errors
    /// Propagates [`ProfilerError::MalformedMetadata`] from [`StructureHash::compute`].
    pub fn capture(table: &TableDescriptor, profiled_at: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            name: table.name.clone(),
            structure_hash: StructureHash::compute(&table.name, &table.columns)?,
            row_count_estimate: table.row_count_estimate,
            last_profiled_at: profiled_at,
        })
    }
}
