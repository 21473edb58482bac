pub mod fixtures;

use std::collections::BTreeMap;

use specmerge_core::{EntityKind, IdentityKey, InstanceRole, Record};
use specmerge_engine::{EngineError, MergeRequest, MergeSession, ReconcileConfig, Reconciler};
use specmerge_storage::{Dataset, SqliteDataset, StorageError, schema::quote};
use tracing_subscriber::EnvFilter;

/// Route engine logs to the test writer. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// A dataset plus a reconciler, for driving whole merges in tests.
pub struct TestDataset {
    pub dataset: SqliteDataset,
    pub reconciler: Reconciler,
    _dir: Option<tempfile::TempDir>,
}

impl TestDataset {
    pub fn new() -> Result<Self, StorageError> {
        Self::with_config(ReconcileConfig::default())
    }

    pub fn with_config(config: ReconcileConfig) -> Result<Self, StorageError> {
        init_tracing();
        Ok(Self {
            dataset: SqliteDataset::open_in_memory()?,
            reconciler: Reconciler::new(config),
            _dir: None,
        })
    }

    /// File-backed dataset in a temporary directory.
    pub fn on_disk() -> Result<Self, Box<dyn std::error::Error>> {
        init_tracing();
        let dir = tempfile::tempdir()?;
        let reconciler = Reconciler::default();
        let dataset = reconciler.open_dataset(dir.path().join("specimens.db"))?;
        Ok(Self {
            dataset,
            reconciler,
            _dir: Some(dir),
        })
    }

    /// Insert records into `role`, creating its tables first if needed.
    pub fn seed(&mut self, role: InstanceRole, records: &[Record]) -> Result<(), StorageError> {
        self.dataset.create_instance(role)?;
        self.dataset.insert_records(role, records)
    }

    pub fn seed_target(&mut self, records: &[Record]) -> Result<(), StorageError> {
        self.seed(InstanceRole::Target, records)
    }

    /// Stage a snapshot. Each entity present in `records` replaces its Source
    /// table; other Source tables are left as they are.
    pub fn stage_source(&mut self, records: &[Record]) -> Result<(), StorageError> {
        let mut tables: BTreeMap<EntityKind, Vec<Record>> = BTreeMap::new();
        for record in records {
            tables.entry(record.kind()).or_default().push(record.clone());
        }
        self.dataset.create_instance(InstanceRole::Source)?;
        self.dataset
            .replace_tables(InstanceRole::Source, &tables.into_iter().collect::<Vec<_>>())
    }

    pub fn target_record(
        &self,
        kind: EntityKind,
        key: impl Into<IdentityKey>,
    ) -> Result<Option<Record>, StorageError> {
        self.dataset.get_record(kind, InstanceRole::Target, &key.into())
    }

    pub fn begin(
        &mut self,
        request: MergeRequest,
    ) -> Result<MergeSession<'_, SqliteDataset>, EngineError> {
        self.reconciler.begin_merge(&mut self.dataset, request)
    }
}

/// Make every insert of the row whose first key field equals `key` into the
/// Target table of `kind` abort, as a failing disk would.
pub fn inject_write_failure(
    dataset: &SqliteDataset,
    kind: EntityKind,
    key: &str,
) -> Result<(), StorageError> {
    let desc = kind.descriptor();
    dataset.conn().execute_batch(&format!(
        "CREATE TRIGGER {trigger} BEFORE INSERT ON {table}
         WHEN NEW.{column} = '{value}'
         BEGIN SELECT RAISE(ABORT, 'simulated write failure'); END;",
        trigger = quote(&format!("fail_{}", desc.table)),
        table = quote(desc.table),
        column = quote(desc.key_fields[0]),
        value = key.replace('\'', "''"),
    ))?;
    Ok(())
}

pub fn clear_write_failure(dataset: &SqliteDataset, kind: EntityKind) -> Result<(), StorageError> {
    dataset.conn().execute_batch(&format!(
        "DROP TRIGGER IF EXISTS {};",
        quote(&format!("fail_{}", kind.descriptor().table))
    ))?;
    Ok(())
}
