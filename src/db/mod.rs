pub mod db_pool;
pub mod duckdb_client;
pub mod schema;
pub mod schema_manager;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One result row: column name to JSON value, in column order.
pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("{0}")]
    Execution(String),

    #[error("Metadata query failed: {0}")]
    Metadata(String),
}

/// A column as reported by the metadata query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnListing {
    pub table: String,
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub is_primary_key: bool,
}

/// A foreign-key edge as reported by the metadata query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyListing {
    pub table: String,
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// The database the pipeline runs generated SQL against.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Run a read-only statement and return its rows in order.
    async fn execute(&self, sql: &str) -> Result<Vec<Row>, DbError>;

    /// Names of all reachable tables.
    async fn fetch_tables(&self) -> Result<Vec<String>, DbError>;

    /// Columns of all reachable tables, in ordinal order per table.
    async fn fetch_columns(&self) -> Result<Vec<ColumnListing>, DbError>;

    async fn fetch_foreign_keys(&self) -> Result<Vec<ForeignKeyListing>, DbError>;

    fn name(&self) -> &str;
}
