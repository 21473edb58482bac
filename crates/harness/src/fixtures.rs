//! Record builders for the six entities. Fields not named are left empty.

use specmerge_core::{EntityKind, LAST_MODIFIED, Record};

/// Build a record from field/value pairs. Panics on unknown fields, which is
/// only ever a typo in a test.
pub fn record(kind: EntityKind, pairs: &[(&str, &str)]) -> Record {
    match Record::from_pairs(kind, pairs) {
        Ok(record) => record,
        Err(e) => panic!("bad fixture for {kind}: {e}"),
    }
}

pub fn agent(code: &str, full_name: &str) -> Record {
    record(EntityKind::Agent, &[("code", code), ("fullName", full_name)])
}

pub fn image(identifier: &str, title: &str) -> Record {
    record(EntityKind::Image, &[("identifier", identifier), ("title", title)])
}

pub fn organism(identifier: &str, remarks: &str) -> Record {
    record(
        EntityKind::Organism,
        &[("identifier", identifier), ("organismRemarks", remarks)],
    )
}

pub fn sensu(identifier: &str, title: &str) -> Record {
    record(EntityKind::Sensu, &[("identifier", identifier), ("title", title)])
}

pub fn taxon(identifier: &str, scientific_name: &str) -> Record {
    record(
        EntityKind::Taxon,
        &[("identifier", identifier), ("scientificName", scientific_name)],
    )
}

pub fn determination(organism: &str, identified_by: &str, tsn: &str, remarks: &str) -> Record {
    record(
        EntityKind::Determination,
        &[
            ("identified", organism),
            ("identifiedBy", identified_by),
            ("dateIdentified", "2020-05-04"),
            ("tsnID", tsn),
            ("nameAccordingToID", "nominal"),
            ("identificationRemarks", remarks),
        ],
    )
}

/// Same record with `lastModified` set.
pub fn modified(mut record: Record, at: &str) -> Record {
    if let Err(e) = record.set(LAST_MODIFIED, at) {
        panic!("cannot stamp {}: {e}", record.kind());
    }
    record
}
