use rusqlite::Connection;

use specmerge_core::{EntityDescriptor, EntityKind, InstanceRole};

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    Wal,
    Delete,
    Truncate,
}

impl JournalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
            Self::Truncate => "TRUNCATE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageOptions {
    pub busy_timeout_ms: u64,
    pub journal_mode: JournalMode,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5000,
            journal_mode: JournalMode::Wal,
        }
    }
}

pub fn init_schema(conn: &Connection, options: &StorageOptions) -> Result<(), StorageError> {
    conn.execute_batch(&format!(
        "
        PRAGMA journal_mode = {};
        PRAGMA synchronous = NORMAL;
        PRAGMA cache_size = -32000;
        PRAGMA busy_timeout = {};
    ",
        options.journal_mode.as_str(),
        options.busy_timeout_ms,
    ))?;
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute_batch(&instance_sql(InstanceRole::Target))?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS watermark (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT (unixepoch())
);
";

/// Quote an identifier for SQLite. Column names such as `order` are keywords.
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub fn column_list(desc: &EntityDescriptor) -> String {
    desc.fields
        .iter()
        .map(|f| quote(f))
        .collect::<Vec<_>>()
        .join(", ")
}

fn table_sql(desc: &EntityDescriptor, role: InstanceRole) -> String {
    let table = desc.table_name(role);
    let columns = desc
        .fields
        .iter()
        .map(|f| format!("    {} TEXT NOT NULL DEFAULT ''", quote(f)))
        .collect::<Vec<_>>()
        .join(",\n");
    let keys = desc
        .key_fields
        .iter()
        .map(|f| quote(f))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE TABLE IF NOT EXISTS {t} (\n{columns}\n);\nCREATE UNIQUE INDEX IF NOT EXISTS {idx} ON {t} ({keys});\n",
        t = quote(&table),
        idx = quote(&format!("{table}_identity")),
    )
}

/// DDL for all six tables of one instance.
pub fn instance_sql(role: InstanceRole) -> String {
    EntityKind::ALL
        .iter()
        .map(|k| table_sql(k.descriptor(), role))
        .collect()
}
