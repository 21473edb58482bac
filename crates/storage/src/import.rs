//! Staging reader for delimited entity tables.
//!
//! Every table is parsed and validated before anything is written, so a
//! rejected table never leaves earlier tables half-staged.

use std::collections::BTreeSet;
use std::io;

use tracing::{info, warn};

use specmerge_core::{EntityKind, InstanceRole, Record};

use crate::error::StorageError;
use crate::traits::Dataset;

fn invalid(kind: EntityKind, reason: impl Into<String>) -> StorageError {
    StorageError::StagingValidation {
        entity: kind.to_string(),
        reason: reason.into(),
    }
}

/// Map each registry field to its column in the header row.
fn column_map(kind: EntityKind, headers: &csv::StringRecord) -> Result<Vec<usize>, StorageError> {
    let desc = kind.descriptor();
    let mut seen = BTreeSet::new();
    for header in headers.iter() {
        let header = header.trim();
        if !seen.insert(header) {
            return Err(invalid(kind, format!("duplicate column {header:?}")));
        }
        if desc.field_index(header).is_none() {
            return Err(invalid(kind, format!("unexpected column {header:?}")));
        }
    }
    desc.fields
        .iter()
        .map(|field| {
            headers
                .iter()
                .position(|h| h.trim() == *field)
                .ok_or_else(|| invalid(kind, format!("missing column {field:?}")))
        })
        .collect()
}

/// Parse and validate one table without touching storage.
pub fn parse_table<R: io::Read>(kind: EntityKind, reader: R) -> Result<Vec<Record>, StorageError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader);
    let headers = rdr
        .headers()
        .map_err(|e| invalid(kind, e.to_string()))?
        .clone();
    let columns = column_map(kind, &headers)?;

    let mut records = Vec::new();
    let mut keys = BTreeSet::new();
    for row in rdr.records() {
        let row = row.map_err(|e| invalid(kind, e.to_string()))?;
        let values = columns
            .iter()
            .map(|&c| row.get(c).unwrap_or_default().to_string())
            .collect();
        let record = Record::new(kind, values)?;
        let key = record.identity();
        if !keys.insert(key.clone()) {
            return Err(invalid(kind, format!("duplicate identity key {key}")));
        }
        records.push(record);
    }
    Ok(records)
}

/// Replace one table of `role` with the rows read from `reader`.
pub fn stage_csv<D: Dataset, R: io::Read>(
    dataset: &mut D,
    role: InstanceRole,
    kind: EntityKind,
    reader: R,
) -> Result<usize, StorageError> {
    stage_csv_set(dataset, role, vec![(kind, reader)])
}

/// Replace several tables of `role` at once. All tables are validated first;
/// if any is rejected nothing is staged.
pub fn stage_csv_set<D: Dataset, R: io::Read>(
    dataset: &mut D,
    role: InstanceRole,
    inputs: Vec<(EntityKind, R)>,
) -> Result<usize, StorageError> {
    let mut tables = Vec::with_capacity(inputs.len());
    for (kind, reader) in inputs {
        if tables.iter().any(|(k, _)| *k == kind) {
            return Err(invalid(kind, "table supplied twice"));
        }
        match parse_table(kind, reader) {
            Ok(records) => tables.push((kind, records)),
            Err(e) => {
                warn!(%role, entity = %kind, error = %e, "staging rejected");
                return Err(e);
            }
        }
    }

    dataset.create_instance(role)?;
    dataset.replace_tables(role, &tables)?;
    let total = tables.iter().map(|(_, r)| r.len()).sum();
    info!(%role, tables = tables.len(), rows = total, "staged tables");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqliteDataset;
    use specmerge_core::IdentityKey;

    const AGENTS: &str = "\
code,fullName,fullNameSort,orcid,agentURI,contactURL,morphbankUserID,agentType,lastModified
jsmith,John Smith,Smith John,,,,,person,2024-01-01T00:00:00+00:00
adoe,Ann Doe,Doe Ann,,,,,person,2024-01-02T00:00:00+00:00
";

    #[test]
    fn stages_rows_in_registry_order_regardless_of_header_order() -> Result<(), Box<dyn std::error::Error>> {
        let csv = "\
lastModified,fullName,code,fullNameSort,orcid,agentURI,contactURL,morphbankUserID,agentType
2024-01-01T00:00:00+00:00,John Smith,jsmith,,,,,,person
";
        let mut ds = SqliteDataset::open_in_memory()?;
        let n = stage_csv(&mut ds, InstanceRole::Source, EntityKind::Agent, csv.as_bytes())?;
        assert_eq!(n, 1);
        let rec = ds
            .get_record(EntityKind::Agent, InstanceRole::Source, &IdentityKey::from("jsmith"))?
            .unwrap();
        assert_eq!(rec.get("fullName"), Some("John Smith"));
        assert_eq!(rec.get("agentType"), Some("person"));
        Ok(())
    }

    #[test]
    fn missing_column_is_rejected() {
        let csv = "code,fullName\njsmith,John Smith\n";
        let err = parse_table(EntityKind::Agent, csv.as_bytes()).unwrap_err();
        assert!(matches!(err, StorageError::StagingValidation { .. }));
        assert!(err.to_string().contains("missing column"));
    }

    #[test]
    fn unexpected_column_is_rejected() {
        let csv = AGENTS.replacen("agentType", "agentKind", 1);
        let err = parse_table(EntityKind::Agent, csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("unexpected column \"agentKind\""));
    }

    #[test]
    fn duplicate_identity_is_rejected() {
        let csv = format!("{AGENTS}jsmith,Again,,,,,,,2024-01-03T00:00:00+00:00\n");
        let err = parse_table(EntityKind::Agent, csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("duplicate identity key jsmith"));
    }

    #[test]
    fn ragged_row_is_rejected() {
        let csv = format!("{AGENTS}short,row\n");
        let err = parse_table(EntityKind::Agent, csv.as_bytes()).unwrap_err();
        assert!(matches!(err, StorageError::StagingValidation { .. }));
    }

    #[test]
    fn rejected_table_leaves_no_partial_staging() -> Result<(), Box<dyn std::error::Error>> {
        let mut ds = SqliteDataset::open_in_memory()?;
        let bad_taxa = "identifier,kingdom\n999,Plantae\n";
        let result = stage_csv_set(
            &mut ds,
            InstanceRole::Source,
            vec![
                (EntityKind::Agent, AGENTS.as_bytes()),
                (EntityKind::Taxon, bad_taxa.as_bytes()),
            ],
        );
        assert!(result.is_err());
        assert!(!ds.instance_exists(InstanceRole::Source)?);
        Ok(())
    }

    #[test]
    fn restaging_replaces_previous_rows() -> Result<(), Box<dyn std::error::Error>> {
        let mut ds = SqliteDataset::open_in_memory()?;
        stage_csv(&mut ds, InstanceRole::Source, EntityKind::Agent, AGENTS.as_bytes())?;
        assert_eq!(ds.record_count(EntityKind::Agent, InstanceRole::Source)?, 2);
        let one = AGENTS.lines().take(2).collect::<Vec<_>>().join("\n");
        stage_csv(&mut ds, InstanceRole::Source, EntityKind::Agent, one.as_bytes())?;
        assert_eq!(ds.record_count(EntityKind::Agent, InstanceRole::Source)?, 1);
        Ok(())
    }
}
