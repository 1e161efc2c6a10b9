use crate::db::db_pool::DuckDBConnectionManager;
use crate::db::{ColumnListing, DatabaseClient, DbError, ForeignKeyListing, Row};
use async_trait::async_trait;
use duckdb::types::ValueRef;
use r2d2::Pool;
use serde_json::{Number, Value};
use std::collections::HashSet;
use tracing::{debug, warn};

const TABLES_QUERY: &str = "SELECT table_name FROM information_schema.tables \
     WHERE table_schema = current_schema() AND table_type IN ('BASE TABLE', 'VIEW') \
     ORDER BY table_name";

const COLUMNS_QUERY: &str = "SELECT table_name, column_name, data_type, is_nullable \
     FROM information_schema.columns \
     WHERE table_schema = current_schema() \
     ORDER BY table_name, ordinal_position";

const PRIMARY_KEYS_QUERY: &str = "SELECT table_name, unnest(constraint_column_names) \
     FROM duckdb_constraints() \
     WHERE constraint_type = 'PRIMARY KEY' AND schema_name = current_schema()";

const FOREIGN_KEYS_QUERY: &str = "SELECT table_name, unnest(constraint_column_names), \
     referenced_table, unnest(referenced_column_names) \
     FROM duckdb_constraints() \
     WHERE constraint_type = 'FOREIGN KEY' AND schema_name = current_schema()";

/// `DatabaseClient` over a pooled DuckDB database. All DuckDB work runs on
/// the blocking thread pool.
#[derive(Clone)]
pub struct DuckDbClient {
    pool: Pool<DuckDBConnectionManager>,
}

impl DuckDbClient {
    pub fn new(pool: Pool<DuckDBConnectionManager>) -> Self {
        Self { pool }
    }

    async fn with_connection<T, F>(&self, work: F) -> Result<T, DbError>
    where
        T: Send + 'static,
        F: FnOnce(&duckdb::Connection) -> Result<T, DbError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| DbError::Connection(e.to_string()))?;
            work(&conn)
        })
        .await
        .map_err(|e| DbError::Connection(format!("Database task failed: {}", e)))?
    }
}

#[async_trait]
impl DatabaseClient for DuckDbClient {
    async fn execute(&self, sql: &str) -> Result<Vec<Row>, DbError> {
        let sql = sql.to_string();
        self.with_connection(move |conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| DbError::Execution(e.to_string()))?;
            let mut rows = stmt
                .query([])
                .map_err(|e| DbError::Execution(e.to_string()))?;

            let column_names = rows
                .as_ref()
                .map(|stmt| stmt.column_names())
                .unwrap_or_default();

            let mut results = Vec::new();
            while let Some(row) = rows.next().map_err(|e| DbError::Execution(e.to_string()))? {
                let mut record = Row::new();
                for (i, name) in column_names.iter().enumerate() {
                    let value = match row.get_ref(i) {
                        Ok(value_ref) => value_to_json(row, i, value_ref),
                        Err(e) => return Err(DbError::Execution(e.to_string())),
                    };
                    record.insert(name.clone(), value);
                }
                results.push(record);
            }

            debug!("Query returned {} rows", results.len());
            Ok(results)
        })
        .await
    }

    async fn fetch_tables(&self) -> Result<Vec<String>, DbError> {
        self.with_connection(|conn| {
            let rows = query_strings(conn, TABLES_QUERY, 1).map_err(DbError::Metadata)?;
            Ok(rows.into_iter().filter_map(|mut r| r.pop()).collect())
        })
        .await
    }

    async fn fetch_columns(&self) -> Result<Vec<ColumnListing>, DbError> {
        self.with_connection(|conn| {
            let columns = query_strings(conn, COLUMNS_QUERY, 4).map_err(DbError::Metadata)?;

            let primary_keys: HashSet<(String, String)> =
                match query_strings(conn, PRIMARY_KEYS_QUERY, 2) {
                    Ok(rows) => rows
                        .into_iter()
                        .map(|r| (r[0].clone(), r[1].clone()))
                        .collect(),
                    Err(e) => {
                        warn!("Primary key discovery failed, continuing without: {}", e);
                        HashSet::new()
                    }
                };

            Ok(columns
                .into_iter()
                .map(|r| ColumnListing {
                    is_primary_key: primary_keys.contains(&(r[0].clone(), r[1].clone())),
                    nullable: r[3].eq_ignore_ascii_case("YES"),
                    table: r[0].clone(),
                    name: r[1].clone(),
                    data_type: r[2].clone(),
                })
                .collect())
        })
        .await
    }

    async fn fetch_foreign_keys(&self) -> Result<Vec<ForeignKeyListing>, DbError> {
        self.with_connection(|conn| {
            let rows = query_strings(conn, FOREIGN_KEYS_QUERY, 4).map_err(DbError::Metadata)?;
            Ok(rows
                .into_iter()
                .map(|r| ForeignKeyListing {
                    table: r[0].clone(),
                    column: r[1].clone(),
                    referenced_table: r[2].clone(),
                    referenced_column: r[3].clone(),
                })
                .collect())
        })
        .await
    }

    fn name(&self) -> &str {
        "duckdb"
    }
}

/// Run a metadata query whose first `width` columns are all text.
fn query_strings(
    conn: &duckdb::Connection,
    sql: &str,
    width: usize,
) -> Result<Vec<Vec<String>>, String> {
    let mut stmt = conn.prepare(sql).map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map([], |row| {
            (0..width)
                .map(|i| row.get::<_, Option<String>>(i).map(Option::unwrap_or_default))
                .collect::<Result<Vec<String>, _>>()
        })
        .map_err(|e| e.to_string())?;

    rows.collect::<Result<Vec<_>, _>>().map_err(|e| e.to_string())
}

fn value_to_json(row: &duckdb::Row<'_>, index: usize, value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(v) => Value::from(v),
        ValueRef::SmallInt(v) => Value::from(v),
        ValueRef::Int(v) => Value::from(v),
        ValueRef::BigInt(v) => Value::from(v),
        ValueRef::UTinyInt(v) => Value::from(v),
        ValueRef::USmallInt(v) => Value::from(v),
        ValueRef::UInt(v) => Value::from(v),
        ValueRef::UBigInt(v) => Value::from(v),
        ValueRef::Float(v) => Number::from_f64(v as f64).map_or(Value::Null, Value::Number),
        ValueRef::Double(v) => Number::from_f64(v).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        other => match row.get::<_, String>(index) {
            Ok(text) => Value::String(text),
            Err(_) => Value::String(format!("{:?}", other)),
        },
    }
}
