//! SQLite schema introspection.
//!
//! # SQLite System Tables
//! - `sqlite_master`: Contains schema definitions for all database objects
//! - `PRAGMA table_info()`: Returns column information for a table
//! - `PRAGMA foreign_key_list()`: Returns foreign key information
//! - `PRAGMA index_list()`: Returns index information
//! - `PRAGMA index_info()`: Returns columns in an index

use crate::Result;
use crate::error::ProfilerError;
use crate::models::{
    ColumnDescriptor, ColumnProfile, ForeignKeyRef, IndexSummary, TableDescriptor, TableProfile,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

/// Quotes a value for use inside a single-quoted PRAGMA argument.
fn pragma_arg(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}

/// Quotes an identifier for use in a SELECT.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Enumerates user tables with their columns and row counts.
pub(crate) async fn list_tables(pool: &SqlitePool) -> Result<Vec<TableDescriptor>> {
    let table_names: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT name
        FROM sqlite_master
        WHERE type = 'table'
        AND name NOT LIKE 'sqlite_%'
        ORDER BY name
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(|e| ProfilerError::source_failed("Failed to enumerate tables", e))?;

    let mut tables = Vec::with_capacity(table_names.len());
    for name in table_names {
        let columns = read_columns(pool, &name)
            .await
            .map_err(|e| ProfilerError::source_failed(format!("Failed to read columns of '{name}'"), e))?
            .into_iter()
            .map(|column| {
                ColumnDescriptor::new(
                    column.name,
                    column.declared_type,
                    column.is_nullable,
                    column.cid,
                )
            })
            .collect();

        let row_count = count_rows(pool, &name)
            .await
            .map_err(|e| ProfilerError::source_failed(format!("Failed to count rows of '{name}'"), e))?;

        tracing::debug!("Listed table '{}' ({} rows)", name, row_count);
        tables.push(TableDescriptor::new(name, columns, row_count));
    }

    tracing::info!("Listed {} SQLite table(s)", tables.len());
    Ok(tables)
}

/// Builds the structural part of a table profile: columns, keys and indexes.
pub(crate) async fn profile_structure(pool: &SqlitePool, table: &str) -> Result<TableProfile> {
    let profiling_error =
        |e: sqlx::Error| ProfilerError::profiling_failed(format!("Failed to profile table '{table}'"), e);

    // PRAGMA table_info on a missing table returns no rows instead of failing
    sqlx::query_scalar::<_, String>(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
    )
    .bind(table)
    .fetch_one(pool)
    .await
    .map_err(profiling_error)?;

    let columns = read_columns(pool, table).await.map_err(profiling_error)?;
    let foreign_keys = read_foreign_keys(pool, table).await.map_err(profiling_error)?;
    let indexes = read_indexes(pool, table).await.map_err(profiling_error)?;
    let estimated_row_count = count_rows(pool, table).await.map_err(profiling_error)?;

    let mut pk_columns: Vec<(u32, String)> = columns
        .iter()
        .filter(|c| c.pk_position > 0)
        .map(|c| (c.pk_position, c.name.clone()))
        .collect();
    pk_columns.sort_by_key(|(position, _)| *position);

    let mut profile = TableProfile::new(table);
    profile.estimated_row_count = estimated_row_count;
    profile.primary_keys = pk_columns.into_iter().map(|(_, name)| name).collect();
    profile.columns = columns
        .into_iter()
        .map(|c| ColumnProfile {
            is_primary_key: c.pk_position > 0,
            name: c.name,
            data_type: c.declared_type,
            is_nullable: c.is_nullable,
            ordinal_position: c.cid,
            default_value: c.default_value,
        })
        .collect();
    profile.foreign_keys = foreign_keys;
    profile.indexes = indexes;

    tracing::debug!(
        "Collected table '{}' with {} columns, {} foreign keys, {} indexes",
        table,
        profile.columns.len(),
        profile.foreign_keys.len(),
        profile.indexes.len()
    );

    Ok(profile)
}

struct RawColumn {
    cid: u32,
    name: String,
    declared_type: String,
    is_nullable: bool,
    default_value: Option<String>,
    /// 1-based position within the primary key, 0 if not part of it
    pk_position: u32,
}

async fn read_columns(pool: &SqlitePool, table: &str) -> std::result::Result<Vec<RawColumn>, sqlx::Error> {
    let rows = sqlx::query(&format!("PRAGMA table_info({})", pragma_arg(table)))
        .fetch_all(pool)
        .await?;

    let mut columns: Vec<RawColumn> = rows.iter().map(raw_column).collect();
    columns.sort_by_key(|c| c.cid);
    Ok(columns)
}

fn raw_column(row: &SqliteRow) -> RawColumn {
    let cid: i64 = row.try_get("cid").unwrap_or(0);
    let notnull: i64 = row.try_get("notnull").unwrap_or(0);
    let pk: i64 = row.try_get("pk").unwrap_or(0);

    RawColumn {
        cid: u32::try_from(cid).unwrap_or_default(),
        name: row.try_get("name").unwrap_or_default(),
        declared_type: row.try_get("type").unwrap_or_default(),
        // SQLite lets most PRIMARY KEY columns hold NULL, but they never do in
        // practice; report them as NOT NULL.
        is_nullable: notnull == 0 && pk == 0,
        default_value: row.try_get::<Option<String>, _>("dflt_value").ok().flatten(),
        pk_position: u32::try_from(pk).unwrap_or_default(),
    }
}

async fn count_rows(pool: &SqlitePool, table: &str) -> std::result::Result<u64, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_identifier(table)))
        .fetch_one(pool)
        .await?;
    Ok(u64::try_from(count).unwrap_or_default())
}

async fn read_foreign_keys(
    pool: &SqlitePool,
    table: &str,
) -> std::result::Result<Vec<ForeignKeyRef>, sqlx::Error> {
    let rows = sqlx::query(&format!("PRAGMA foreign_key_list({})", pragma_arg(table)))
        .fetch_all(pool)
        .await?;

    // Composite foreign keys share an id; seq orders their columns
    let mut grouped: BTreeMap<i64, (String, Vec<(i64, String, String)>)> = BTreeMap::new();
    for row in rows {
        let id: i64 = row.try_get("id").unwrap_or(0);
        let seq: i64 = row.try_get("seq").unwrap_or(0);
        let referenced_table: String = row.try_get("table").unwrap_or_default();
        let from: String = row.try_get("from").unwrap_or_default();
        // `to` is NULL when the reference targets the parent's primary key implicitly
        let to = row.try_get::<Option<String>, _>("to").ok().flatten();

        grouped
            .entry(id)
            .or_insert_with(|| (referenced_table, Vec::new()))
            .1
            .push((seq, from, to.unwrap_or_default()));
    }

    Ok(grouped
        .into_values()
        .map(|(referenced_table, mut pairs)| {
            pairs.sort_by_key(|(seq, _, _)| *seq);
            let (columns, referenced_columns) =
                pairs.into_iter().map(|(_, from, to)| (from, to)).unzip();
            ForeignKeyRef {
                columns,
                referenced_table,
                referenced_columns,
            }
        })
        .collect())
}

async fn read_indexes(
    pool: &SqlitePool,
    table: &str,
) -> std::result::Result<Vec<IndexSummary>, sqlx::Error> {
    let rows = sqlx::query(&format!("PRAGMA index_list({})", pragma_arg(table)))
        .fetch_all(pool)
        .await?;

    let mut indexes = Vec::with_capacity(rows.len());
    for row in rows {
        let name: String = row.try_get("name").unwrap_or_default();
        let unique: i64 = row.try_get("unique").unwrap_or(0);

        let column_rows = sqlx::query(&format!("PRAGMA index_info({})", pragma_arg(&name)))
            .fetch_all(pool)
            .await?;
        let mut columns: Vec<(i64, String)> = column_rows
            .iter()
            .map(|r| {
                (
                    r.try_get("seqno").unwrap_or(0),
                    r.try_get::<Option<String>, _>("name").ok().flatten().unwrap_or_default(),
                )
            })
            .collect();
        columns.sort_by_key(|(seqno, _)| *seqno);

        indexes.push(IndexSummary {
            name,
            columns: columns.into_iter().map(|(_, column)| column).collect(),
            is_unique: unique != 0,
        });
    }

    indexes.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(indexes)
}
