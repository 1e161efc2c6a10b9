use crate::db::schema::{ColumnInfo, ForeignKey, SchemaSnapshot, TableInfo};
use crate::db::{DatabaseClient, DbError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Builds schema snapshots from the database and reuses the latest one
/// for a configurable window.
pub struct SchemaManager {
    client: Arc<dyn DatabaseClient>,
    /// Reuse window, zero disables reuse
    ttl: Duration,
    /// Last snapshot and when it was fetched
    cached: RwLock<Option<(Instant, Arc<SchemaSnapshot>)>>,
}

impl SchemaManager {
    pub fn new(client: Arc<dyn DatabaseClient>, ttl: Duration) -> Self {
        Self {
            client,
            ttl,
            cached: RwLock::new(None),
        }
    }

    /// Current snapshot, fetched again once the reuse window has passed.
    pub async fn snapshot(&self) -> Result<Arc<SchemaSnapshot>, DbError> {
        if !self.ttl.is_zero() {
            let cached = self.cached.read().await;
            if let Some((fetched_at, snapshot)) = cached.as_ref() {
                if fetched_at.elapsed() < self.ttl {
                    debug!("Reusing schema snapshot {}", snapshot.fingerprint());
                    return Ok(Arc::clone(snapshot));
                }
            }
        }

        self.refresh().await
    }

    /// Fetch a fresh snapshot regardless of the reuse window.
    pub async fn refresh(&self) -> Result<Arc<SchemaSnapshot>, DbError> {
        let snapshot = Arc::new(build_snapshot(self.client.as_ref()).await?);

        let mut cached = self.cached.write().await;
        *cached = Some((Instant::now(), Arc::clone(&snapshot)));

        Ok(snapshot)
    }
}

/// Read tables, columns and foreign keys into a snapshot.
///
/// Table and column listing failures are fatal. Foreign-key discovery
/// failures only mean no relationships are known.
pub async fn build_snapshot(client: &dyn DatabaseClient) -> Result<SchemaSnapshot, DbError> {
    info!("Fetching schema from {}", client.name());

    let mut tables: BTreeMap<String, TableInfo> = client
        .fetch_tables()
        .await?
        .into_iter()
        .map(|name| (name, TableInfo::default()))
        .collect();

    for listing in client.fetch_columns().await? {
        tables
            .entry(listing.table)
            .or_default()
            .columns
            .push(ColumnInfo {
                name: listing.name,
                data_type: listing.data_type,
                is_primary_key: listing.is_primary_key,
                nullable: listing.nullable,
            });
    }

    match client.fetch_foreign_keys().await {
        Ok(foreign_keys) => {
            for fk in foreign_keys {
                if let Some(table) = tables.get_mut(&fk.table) {
                    table.foreign_keys.push(ForeignKey {
                        column: fk.column,
                        referenced_table: fk.referenced_table,
                        referenced_column: fk.referenced_column,
                    });
                }
            }
        }
        Err(e) => {
            warn!("Foreign key discovery failed, continuing without relationships: {}", e);
        }
    }

    let snapshot = SchemaSnapshot::new(tables);
    info!(
        "Schema snapshot has {} tables, fingerprint {}",
        snapshot.tables().len(),
        snapshot.fingerprint()
    );
    Ok(snapshot)
}
