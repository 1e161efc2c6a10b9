use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub is_primary_key: bool,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub columns: Vec<ColumnInfo>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableInfo {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Read-only view of the reachable tables at one point in time.
///
/// Tables are kept ordered by name so the serialized form, and therefore
/// the fingerprint, does not depend on metadata query ordering.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaSnapshot {
    tables: BTreeMap<String, TableInfo>,
    fingerprint: String,
}

impl SchemaSnapshot {
    pub fn new(tables: BTreeMap<String, TableInfo>) -> Self {
        let fingerprint = fingerprint_of(&tables);
        Self { tables, fingerprint }
    }

    /// Deterministic SHA-256 over the serialized tables, hex encoded.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn tables(&self) -> &BTreeMap<String, TableInfo> {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Case-insensitive table lookup.
    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.get(name).or_else(|| {
            self.tables
                .iter()
                .find(|(table, _)| table.eq_ignore_ascii_case(name))
                .map(|(_, info)| info)
        })
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    /// Plain-text table and column listing for the prompt.
    pub fn describe(&self) -> String {
        let mut description = String::new();

        for (name, table) in &self.tables {
            description.push_str(&format!("Table {}:\n", name));
            for column in &table.columns {
                let mut flags = Vec::new();
                if column.is_primary_key {
                    flags.push("primary key");
                }
                if !column.nullable {
                    flags.push("not null");
                }

                if flags.is_empty() {
                    description.push_str(&format!("  - {} {}\n", column.name, column.data_type));
                } else {
                    description.push_str(&format!(
                        "  - {} {} ({})\n",
                        column.name,
                        column.data_type,
                        flags.join(", ")
                    ));
                }
            }
            description.push('\n');
        }

        description.trim_end().to_string()
    }

    /// One `table.column → table.column` line per foreign-key edge.
    pub fn relationships(&self) -> Vec<String> {
        self.tables
            .iter()
            .flat_map(|(name, table)| {
                table.foreign_keys.iter().map(move |fk| {
                    format!(
                        "{}.{} → {}.{}",
                        name, fk.column, fk.referenced_table, fk.referenced_column
                    )
                })
            })
            .collect()
    }
}

fn fingerprint_of(tables: &BTreeMap<String, TableInfo>) -> String {
    let serialized = serde_json::to_vec(tables).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&serialized);
    format!("{:x}", hasher.finalize())
}
