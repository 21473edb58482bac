use specmerge_core::{EntityKind, IdentityKey, InstanceRole, Record, Watermark};

use crate::error::StorageError;

/// Storage for the Target table set plus the transient Source and Staging sets.
pub trait Dataset {
    /// Create the six tables of `role` if they do not exist yet.
    fn create_instance(&mut self, role: InstanceRole) -> Result<(), StorageError>;

    /// Drop the six tables of `role`. Target cannot be dropped.
    fn drop_instance(&mut self, role: InstanceRole) -> Result<(), StorageError> {
        self.drop_tables(role, &EntityKind::ALL)
    }

    /// Drop the tables of `kinds` in `role`, leaving the rest of the instance.
    fn drop_tables(&mut self, role: InstanceRole, kinds: &[EntityKind]) -> Result<(), StorageError>;

    fn instance_exists(&self, role: InstanceRole) -> Result<bool, StorageError> {
        self.tables_exist(role, &EntityKind::ALL)
    }

    fn tables_exist(&self, role: InstanceRole, kinds: &[EntityKind]) -> Result<bool, StorageError>;

    /// All records of one table, ordered by identity key.
    fn load_records(
        &self,
        kind: EntityKind,
        role: InstanceRole,
    ) -> Result<Vec<Record>, StorageError>;

    fn get_record(
        &self,
        kind: EntityKind,
        role: InstanceRole,
        key: &IdentityKey,
    ) -> Result<Option<Record>, StorageError>;

    fn record_count(&self, kind: EntityKind, role: InstanceRole) -> Result<u64, StorageError>;

    /// Insert records into `role` in one transaction. Existing keys collide.
    fn insert_records(
        &mut self,
        role: InstanceRole,
        records: &[Record],
    ) -> Result<(), StorageError>;

    /// Replace the listed tables of `role` wholesale, in one transaction.
    fn replace_tables(
        &mut self,
        role: InstanceRole,
        tables: &[(EntityKind, Vec<Record>)],
    ) -> Result<(), StorageError>;

    /// Stored cutoff, `None` if never set. An unparsable value is an error.
    fn read_watermark(&self) -> Result<Option<Watermark>, StorageError>;

    fn write_watermark(&mut self, watermark: Watermark) -> Result<(), StorageError>;

    /// Re-seed Staging from Target for `kinds`, then upsert `records` into it.
    /// Runs as one transaction; on failure Staging is left as it was.
    fn build_staging(
        &mut self,
        kinds: &[EntityKind],
        records: &[Record],
    ) -> Result<(), StorageError>;

    /// Clear the Target tables of `kinds`, reload them from Staging, clear
    /// Staging and store `watermark` if given, all in one transaction.
    fn swap_staging_into_target(
        &mut self,
        kinds: &[EntityKind],
        watermark: Option<Watermark>,
    ) -> Result<(), StorageError>;

    /// Reclaim free pages. Must run outside any transaction.
    fn compact(&mut self) -> Result<(), StorageError>;
}
