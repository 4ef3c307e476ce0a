//! Unit tests for the SQLite metadata source.
//!
//! Each test builds a single-connection in-memory pool so every query sees
//! the same database.

use super::SqliteSource;
use crate::adapters::MetadataSource;
use crate::config::SamplingConfig;
use crate::error::ProfilerError;
use crate::fingerprint::StructureHash;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

async fn memory_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap()
}

async fn execute_all(pool: &SqlitePool, statements: &[&str]) {
    for statement in statements {
        sqlx::query(statement).execute(pool).await.unwrap();
    }
}

async fn shop_source(sample_size: u32) -> SqliteSource {
    let pool = memory_pool().await;
    execute_all(
        &pool,
        &[
            "CREATE TABLE customers (
                id INTEGER PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                nickname VARCHAR(40) DEFAULT 'anon',
                avatar BLOB
            )",
            "CREATE TABLE orders (
                id INTEGER PRIMARY KEY,
                customer_id INTEGER NOT NULL REFERENCES customers(id),
                total REAL,
                placed_at TIMESTAMP
            )",
            "CREATE INDEX idx_orders_customer ON orders(customer_id, placed_at)",
            "CREATE TABLE order_lines (
                order_id INTEGER NOT NULL,
                line_no INTEGER NOT NULL,
                sku TEXT,
                PRIMARY KEY (order_id, line_no)
            )",
            "INSERT INTO customers (id, email, avatar) VALUES (2, 'b@example.com', X'DEADBEEF')",
            "INSERT INTO customers (id, email, nickname) VALUES (1, 'a@example.com', 'al')",
            "INSERT INTO orders (customer_id, total) VALUES (1, 9.5), (1, 20.0), (2, 3.25)",
        ],
    )
    .await;
    SqliteSource::from_pool(pool, SamplingConfig::default().with_sample_size(sample_size))
}

#[tokio::test]
async fn test_list_tables_reports_columns_and_counts() {
    let source = shop_source(10).await;
    let tables = source.list_tables().await.unwrap();

    let names: Vec<_> = tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["customers", "order_lines", "orders"]);

    let customers = &tables[0];
    assert_eq!(customers.row_count_estimate, 2);
    let columns: Vec<_> = customers
        .columns
        .iter()
        .map(|c| (c.name.as_str(), c.data_type.as_str(), c.is_nullable, c.ordinal_position))
        .collect();
    assert_eq!(
        columns,
        vec![
            ("id", "INTEGER", false, 0),
            ("email", "TEXT", false, 1),
            ("nickname", "VARCHAR(40)", true, 2),
            ("avatar", "BLOB", true, 3),
        ]
    );

    assert_eq!(tables[2].row_count_estimate, 3);
}

#[tokio::test]
async fn test_empty_database_lists_nothing() {
    let source = SqliteSource::from_pool(memory_pool().await, SamplingConfig::default());
    assert!(source.list_tables().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_listed_columns_fingerprint_cleanly() {
    let source = shop_source(0).await;
    for table in source.list_tables().await.unwrap() {
        assert!(StructureHash::compute(&table.name, &table.columns).is_ok());
    }
}

#[tokio::test]
async fn test_schema_change_changes_fingerprint() {
    let source = shop_source(0).await;
    let before = source.list_tables().await.unwrap();

    execute_all(source.pool(), &["ALTER TABLE customers ADD COLUMN deleted_at TIMESTAMP"]).await;
    let after = source.list_tables().await.unwrap();

    let hash = |t: &crate::models::TableDescriptor| StructureHash::compute(&t.name, &t.columns).unwrap();
    assert_ne!(hash(&before[0]), hash(&after[0]));
    assert_eq!(hash(&before[2]), hash(&after[2]));
}

#[tokio::test]
async fn test_profile_table_structure() {
    let source = shop_source(0).await;

    let orders = source.profile_table("orders").await.unwrap();
    assert_eq!(orders.name, "orders");
    assert_eq!(orders.estimated_row_count, 3);
    assert_eq!(orders.primary_keys, vec!["id".to_string()]);
    assert_eq!(orders.foreign_keys.len(), 1);
    assert_eq!(orders.foreign_keys[0].columns, vec!["customer_id".to_string()]);
    assert_eq!(orders.foreign_keys[0].referenced_table, "customers");
    assert_eq!(orders.foreign_keys[0].referenced_columns, vec!["id".to_string()]);
    assert_eq!(orders.indexes.len(), 1);
    assert_eq!(orders.indexes[0].name, "idx_orders_customer");
    assert_eq!(
        orders.indexes[0].columns,
        vec!["customer_id".to_string(), "placed_at".to_string()]
    );
    assert!(!orders.indexes[0].is_unique);
    assert!(orders.sample_rows.is_empty());

    let customers = source.profile_table("customers").await.unwrap();
    let nickname = customers.columns.iter().find(|c| c.name == "nickname").unwrap();
    assert_eq!(nickname.default_value.as_deref(), Some("'anon'"));
    assert!(customers.columns[0].is_primary_key);
    assert!(customers.indexes.iter().any(|i| i.is_unique));
}

#[tokio::test]
async fn test_composite_primary_key_order() {
    let source = shop_source(0).await;
    let lines = source.profile_table("order_lines").await.unwrap();
    assert_eq!(
        lines.primary_keys,
        vec!["order_id".to_string(), "line_no".to_string()]
    );
    assert!(lines.columns.iter().filter(|c| c.is_primary_key).count() == 2);
}

#[tokio::test]
async fn test_samples_are_ordered_and_typed() {
    let source = shop_source(10).await;
    let customers = source.profile_table("customers").await.unwrap();

    assert_eq!(customers.sample_rows.len(), 2);
    // Ordered by primary key even though id 2 was inserted first
    assert_eq!(customers.sample_rows[0]["id"], 1);
    assert_eq!(customers.sample_rows[0]["nickname"], "al");
    assert!(customers.sample_rows[0]["avatar"].is_null());
    assert_eq!(customers.sample_rows[1]["avatar"], "base64:3q2+7w==");

    let orders = source.profile_table("orders").await.unwrap();
    assert_eq!(orders.sample_rows[0]["total"], 9.5);
}

#[tokio::test]
async fn test_sample_size_limits_rows() {
    let source = shop_source(1).await;
    let orders = source.profile_table("orders").await.unwrap();
    assert_eq!(orders.sample_rows.len(), 1);
    assert_eq!(orders.estimated_row_count, 3);
}

#[tokio::test]
async fn test_missing_table_is_profiling_error() {
    let source = shop_source(10).await;
    let err = source.profile_table("no_such_table").await.unwrap_err();
    assert!(matches!(err, ProfilerError::Profiling { .. }));
    assert!(err.to_string().contains("no_such_table"));
}
