use std::path::Path;

use rusqlite::{Connection, Transaction, params_from_iter};
use tracing::{debug, info};

use specmerge_core::{EntityDescriptor, EntityKind, IdentityKey, InstanceRole, Record, Watermark};

use crate::error::StorageError;
use crate::schema::{self, StorageOptions, column_list, quote};
use crate::traits::Dataset;

pub struct SqliteDataset {
    conn: Connection,
}

impl SqliteDataset {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::open_with(path, &StorageOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(
        path: P,
        options: &StorageOptions,
    ) -> Result<Self, StorageError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening dataset");
        let conn = Connection::open(path)?;
        schema::init_schema(&conn, options)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        schema::init_schema(&conn, &StorageOptions::default())?;
        Ok(Self { conn })
    }

    /// Raw connection, for inspection and fault injection in tests.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

fn read_record(kind: EntityKind, row: &rusqlite::Row) -> rusqlite::Result<Vec<String>> {
    (0..kind.descriptor().fields.len())
        .map(|i| row.get::<_, String>(i))
        .collect()
}

fn key_predicate(desc: &EntityDescriptor) -> String {
    desc.key_fields
        .iter()
        .enumerate()
        .map(|(i, f)| format!("{} = ?{}", quote(f), i + 1))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ")
}

fn insert_sql(desc: &EntityDescriptor, role: InstanceRole) -> String {
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(&desc.table_name(role)),
        column_list(desc),
        placeholders(desc.fields.len()),
    )
}

fn upsert_sql(desc: &EntityDescriptor, role: InstanceRole) -> String {
    let keys = desc
        .key_fields
        .iter()
        .map(|f| quote(f))
        .collect::<Vec<_>>()
        .join(", ");
    let updates = desc
        .fields
        .iter()
        .filter(|f| !desc.is_key_field(f))
        .map(|f| format!("{c} = excluded.{c}", c = quote(f)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{} ON CONFLICT({keys}) DO UPDATE SET {updates}", insert_sql(desc, role))
}

fn insert_all(
    tx: &Transaction,
    role: InstanceRole,
    records: &[Record],
) -> Result<(), StorageError> {
    for record in records {
        let desc = record.descriptor();
        let result = tx.execute(&insert_sql(desc, role), params_from_iter(record.values()));
        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(StorageError::IdentityCollision {
                    table: desc.table_name(role),
                    key: record.identity().to_string(),
                });
            }
            Err(e) => return Err(StorageError::Sqlite(e)),
        }
    }
    Ok(())
}

fn seed_staging(
    tx: &Transaction,
    kinds: &[EntityKind],
    records: &[Record],
) -> rusqlite::Result<()> {
    for kind in kinds {
        let desc = kind.descriptor();
        let staging = quote(&desc.table_name(InstanceRole::Staging));
        let target = quote(&desc.table_name(InstanceRole::Target));
        let columns = column_list(desc);
        tx.execute(&format!("DELETE FROM {staging}"), [])?;
        tx.execute(
            &format!("INSERT INTO {staging} ({columns}) SELECT {columns} FROM {target}"),
            [],
        )?;
    }
    for record in records {
        tx.execute(
            &upsert_sql(record.descriptor(), InstanceRole::Staging),
            params_from_iter(record.values()),
        )?;
    }
    Ok(())
}

fn reload_target(
    tx: &Transaction,
    kinds: &[EntityKind],
    watermark: Option<&Watermark>,
) -> rusqlite::Result<()> {
    for kind in kinds {
        let desc = kind.descriptor();
        let staging = quote(&desc.table_name(InstanceRole::Staging));
        let target = quote(&desc.table_name(InstanceRole::Target));
        let columns = column_list(desc);
        tx.execute(&format!("DELETE FROM {target}"), [])?;
        let loaded = tx.execute(
            &format!("INSERT INTO {target} ({columns}) SELECT {columns} FROM {staging}"),
            [],
        )?;
        tx.execute(&format!("DELETE FROM {staging}"), [])?;
        debug!(entity = %kind, rows = loaded, "reloaded target table from staging");
    }
    if let Some(watermark) = watermark {
        tx.execute(
            "INSERT INTO watermark (id, value, updated_at) VALUES (1, ?1, unixepoch())
             ON CONFLICT(id) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            rusqlite::params![watermark.to_rfc3339()],
        )?;
    }
    Ok(())
}

impl Dataset for SqliteDataset {
    fn create_instance(&mut self, role: InstanceRole) -> Result<(), StorageError> {
        self.conn.execute_batch(&schema::instance_sql(role))?;
        debug!(%role, "instance tables ready");
        Ok(())
    }

    fn drop_tables(&mut self, role: InstanceRole, kinds: &[EntityKind]) -> Result<(), StorageError> {
        if role == InstanceRole::Target {
            return Err(StorageError::ConstraintViolation(
                "the target instance cannot be dropped".into(),
            ));
        }
        let sql: String = kinds
            .iter()
            .map(|k| format!("DROP TABLE IF EXISTS {};\n", quote(&k.descriptor().table_name(role))))
            .collect();
        self.conn.execute_batch(&sql)?;
        debug!(%role, tables = kinds.len(), "instance tables dropped");
        Ok(())
    }

    fn tables_exist(&self, role: InstanceRole, kinds: &[EntityKind]) -> Result<bool, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
        for kind in kinds {
            let count: i64 =
                stmt.query_row([kind.descriptor().table_name(role)], |row| row.get(0))?;
            if count == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn load_records(
        &self,
        kind: EntityKind,
        role: InstanceRole,
    ) -> Result<Vec<Record>, StorageError> {
        let desc = kind.descriptor();
        let order = desc
            .key_fields
            .iter()
            .map(|f| quote(f))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM {} ORDER BY {order}",
            column_list(desc),
            quote(&desc.table_name(role)),
        ))?;
        let rows = stmt.query_map([], |row| read_record(kind, row))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(Record::new(kind, row?)?);
        }
        Ok(result)
    }

    fn get_record(
        &self,
        kind: EntityKind,
        role: InstanceRole,
        key: &IdentityKey,
    ) -> Result<Option<Record>, StorageError> {
        let desc = kind.descriptor();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM {} WHERE {}",
            column_list(desc),
            quote(&desc.table_name(role)),
            key_predicate(desc),
        ))?;
        let mut rows = stmt.query_map(params_from_iter(key.parts()), |row| read_record(kind, row))?;

        match rows.next() {
            Some(Ok(values)) => Ok(Some(Record::new(kind, values)?)),
            Some(Err(e)) => Err(StorageError::Sqlite(e)),
            None => Ok(None),
        }
    }

    fn record_count(&self, kind: EntityKind, role: InstanceRole) -> Result<u64, StorageError> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote(&kind.descriptor().table_name(role))),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn insert_records(
        &mut self,
        role: InstanceRole,
        records: &[Record],
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        insert_all(&tx, role, records)?;
        tx.commit()?;
        Ok(())
    }

    fn replace_tables(
        &mut self,
        role: InstanceRole,
        tables: &[(EntityKind, Vec<Record>)],
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        for (kind, records) in tables {
            tx.execute(
                &format!("DELETE FROM {}", quote(&kind.descriptor().table_name(role))),
                [],
            )?;
            insert_all(&tx, role, records)?;
            debug!(%role, entity = %kind, rows = records.len(), "replaced table");
        }
        tx.commit()?;
        Ok(())
    }

    fn read_watermark(&self) -> Result<Option<Watermark>, StorageError> {
        let mut stmt = self.conn.prepare("SELECT value FROM watermark WHERE id = 1")?;
        let mut rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        match rows.next() {
            Some(Ok(value)) => Ok(Some(Watermark::parse(&value)?)),
            Some(Err(e)) => Err(StorageError::Sqlite(e)),
            None => Ok(None),
        }
    }

    fn write_watermark(&mut self, watermark: Watermark) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO watermark (id, value, updated_at) VALUES (1, ?1, unixepoch())
             ON CONFLICT(id) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            rusqlite::params![watermark.to_rfc3339()],
        )?;
        debug!(%watermark, "set watermark");
        Ok(())
    }

    fn build_staging(
        &mut self,
        kinds: &[EntityKind],
        records: &[Record],
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        seed_staging(&tx, kinds, records)
            .map_err(|source| StorageError::Transaction { phase: "staging", source })?;
        tx.commit()
            .map_err(|source| StorageError::Transaction { phase: "staging", source })?;
        debug!(entities = kinds.len(), upserts = records.len(), "staging built");
        Ok(())
    }

    fn swap_staging_into_target(
        &mut self,
        kinds: &[EntityKind],
        watermark: Option<Watermark>,
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        reload_target(&tx, kinds, watermark.as_ref())
            .map_err(|source| StorageError::Transaction { phase: "commit", source })?;
        tx.commit()
            .map_err(|source| StorageError::Transaction { phase: "commit", source })?;
        info!(
            entities = kinds.len(),
            watermark = ?watermark.map(|w| w.to_rfc3339()),
            "staging swapped into target"
        );
        Ok(())
    }

    fn compact(&mut self) -> Result<(), StorageError> {
        self.conn.execute_batch("VACUUM;")?;
        debug!("dataset compacted");
        Ok(())
    }
}
