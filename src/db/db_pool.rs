use duckdb::Connection;
use r2d2::{ManageConnection, Pool};

pub struct DuckDBConnectionManager {
    connection_string: String,
}

impl DuckDBConnectionManager {
    pub fn new(connection_string: String) -> Self {
        Self { connection_string }
    }
}

impl ManageConnection for DuckDBConnectionManager {
    type Connection = Connection;
    type Error = duckdb::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        if self.connection_string.is_empty() || self.connection_string == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(&self.connection_string)
        }
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.execute("SELECT 1", [])?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Build a pool over one DuckDB file. In-memory databases are private to a
/// connection, so those get a single-connection pool.
pub fn build_pool(
    connection_string: &str,
    pool_size: usize,
) -> Result<Pool<DuckDBConnectionManager>, r2d2::Error> {
    let in_memory = connection_string.is_empty() || connection_string == ":memory:";
    let max_size = if in_memory { 1 } else { pool_size.max(1) as u32 };

    Pool::builder()
        .max_size(max_size)
        .build(DuckDBConnectionManager::new(connection_string.to_string()))
}
