//! Static registry of the six entity tables.
//!
//! Every table name that reaches SQL is built from this registry, never from
//! caller input.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::record::{IdentityKey, Record};

/// Audit timestamp carried by every record.
pub const LAST_MODIFIED: &str = "lastModified";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Agent,
    Image,
    Determination,
    Organism,
    Sensu,
    Taxon,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Agent,
        EntityKind::Image,
        EntityKind::Determination,
        EntityKind::Organism,
        EntityKind::Sensu,
        EntityKind::Taxon,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Image => "image",
            Self::Determination => "determination",
            Self::Organism => "organism",
            Self::Sensu => "sensu",
            Self::Taxon => "taxon",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s.to_ascii_lowercase().as_str() {
            "agent" | "agents" => Ok(Self::Agent),
            "image" | "images" => Ok(Self::Image),
            "determination" | "determinations" => Ok(Self::Determination),
            "organism" | "organisms" => Ok(Self::Organism),
            "sensu" => Ok(Self::Sensu),
            "taxon" | "taxa" => Ok(Self::Taxon),
            _ => Err(CoreError::UnknownEntity(s.to_string())),
        }
    }

    pub fn descriptor(&self) -> &'static EntityDescriptor {
        match self {
            Self::Agent => &AGENT,
            Self::Image => &IMAGE,
            Self::Determination => &DETERMINATION,
            Self::Organism => &ORGANISM,
            Self::Sensu => &SENSU,
            Self::Taxon => &TAXON,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which of the three parallel table sets a table belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum InstanceRole {
    Target,
    Source,
    Staging,
}

impl InstanceRole {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Target => "",
            Self::Source => "source_",
            Self::Staging => "staging_",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Target => "target",
            Self::Source => "source",
            Self::Staging => "staging",
        }
    }
}

impl fmt::Display for InstanceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct EntityDescriptor {
    pub kind: EntityKind,
    pub table: &'static str,
    /// Column order used by storage, CSV headers and `Record` values.
    pub fields: &'static [&'static str],
    pub key_fields: &'static [&'static str],
    /// New records of this entity only ever flow Source -> Target.
    pub upstream_only: bool,
}

impl EntityDescriptor {
    pub fn table_name(&self, role: InstanceRole) -> String {
        format!("{}{}", role.prefix(), self.table)
    }

    pub fn field_index(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| *f == field)
    }

    pub fn is_key_field(&self, field: &str) -> bool {
        self.key_fields.contains(&field)
    }

    pub fn key_indices(&self) -> Vec<usize> {
        self.key_fields
            .iter()
            .filter_map(|k| self.field_index(k))
            .collect()
    }

    pub fn last_modified_index(&self) -> Option<usize> {
        self.field_index(LAST_MODIFIED)
    }

    /// Indices of the non-key fields that take part in equality, minus `ignored`.
    pub fn comparison_indices(&self, ignored: &[String]) -> Vec<usize> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| !self.is_key_field(f) && !ignored.iter().any(|i| i == *f))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn identity_of(&self, record: &Record) -> IdentityKey {
        IdentityKey::new(
            self.key_indices()
                .into_iter()
                .map(|i| record.values()[i].clone())
                .collect(),
        )
    }
}

static AGENT: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::Agent,
    table: "agents",
    fields: &[
        "code",
        "fullName",
        "fullNameSort",
        "orcid",
        "agentURI",
        "contactURL",
        "morphbankUserID",
        "agentType",
        LAST_MODIFIED,
    ],
    key_fields: &["code"],
    upstream_only: false,
};

static IMAGE: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::Image,
    table: "images",
    fields: &[
        "identifier",
        "fileName",
        "accessPoint",
        "title",
        "description",
        "caption",
        "photographerCode",
        "dcterms_created",
        "usageTermsIndex",
        "imageView",
        "primaryImage",
        "rating",
        "depicts",
        "height",
        "width",
        LAST_MODIFIED,
    ],
    key_fields: &["identifier"],
    upstream_only: false,
};

// No single column identifies a determination; the whole assertion does.
static DETERMINATION: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::Determination,
    table: "determinations",
    fields: &[
        "identified",
        "identifiedBy",
        "dateIdentified",
        "tsnID",
        "nameAccordingToID",
        "identificationRemarks",
        "identificationQualifier",
        "suppress",
        LAST_MODIFIED,
    ],
    key_fields: &[
        "identified",
        "identifiedBy",
        "dateIdentified",
        "tsnID",
        "nameAccordingToID",
    ],
    upstream_only: false,
};

static ORGANISM: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::Organism,
    table: "organisms",
    fields: &[
        "identifier",
        "establishmentMeans",
        "organismRemarks",
        "collectionCode",
        "catalogNumber",
        "georeferenceRemarks",
        "decimalLatitude",
        "decimalLongitude",
        "altitudeInMeters",
        "organismName",
        "organismScope",
        "cameo",
        "notes",
        LAST_MODIFIED,
    ],
    key_fields: &["identifier"],
    upstream_only: false,
};

static SENSU: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::Sensu,
    table: "sensu",
    fields: &[
        "identifier",
        "creator",
        "elevenLetterCreator",
        "tcsSignature",
        "title",
        "publisher",
        "dcterms_created",
        "iri",
        LAST_MODIFIED,
    ],
    key_fields: &["identifier"],
    upstream_only: false,
};

static TAXON: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::Taxon,
    table: "taxa",
    fields: &[
        "identifier",
        "kingdom",
        "className",
        "order",
        "family",
        "genus",
        "species",
        "subspecies",
        "variety",
        "forma",
        "taxonRank",
        "vernacularName",
        "scientificNameAuthorship",
        "scientificName",
        LAST_MODIFIED,
    ],
    key_fields: &["identifier"],
    upstream_only: true,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_entity_has_key_and_audit_fields() {
        for kind in EntityKind::ALL {
            let desc = kind.descriptor();
            assert_eq!(desc.kind, kind);
            assert!(!desc.key_fields.is_empty(), "{kind} has no key");
            assert_eq!(desc.key_indices().len(), desc.key_fields.len());
            assert!(desc.last_modified_index().is_some(), "{kind} lacks lastModified");
        }
    }

    #[test]
    fn only_taxon_is_upstream_only() {
        let upstream: Vec<_> = EntityKind::ALL
            .iter()
            .filter(|k| k.descriptor().upstream_only)
            .collect();
        assert_eq!(upstream, vec![&EntityKind::Taxon]);
    }

    #[test]
    fn determination_key_is_composite() {
        let desc = EntityKind::Determination.descriptor();
        assert_eq!(desc.key_indices(), vec![0, 1, 2, 3, 4]);
        assert!(!desc.is_key_field("identificationRemarks"));
    }

    #[test]
    fn table_names_follow_role_prefix() {
        let desc = EntityKind::Taxon.descriptor();
        assert_eq!(desc.table_name(InstanceRole::Target), "taxa");
        assert_eq!(desc.table_name(InstanceRole::Source), "source_taxa");
        assert_eq!(desc.table_name(InstanceRole::Staging), "staging_taxa");
    }

    #[test]
    fn comparison_skips_key_and_ignored_fields() {
        let desc = EntityKind::Agent.descriptor();
        let ignored = vec![LAST_MODIFIED.to_string()];
        let indices = desc.comparison_indices(&ignored);
        assert!(!indices.contains(&0));
        assert!(!indices.contains(&desc.last_modified_index().unwrap()));
        assert_eq!(indices.len(), desc.fields.len() - 2);
    }

    #[test]
    fn parse_accepts_singular_and_table_names() {
        assert_eq!(EntityKind::parse("taxa").unwrap(), EntityKind::Taxon);
        assert_eq!(EntityKind::parse("Agent").unwrap(), EntityKind::Agent);
        assert!(EntityKind::parse("specimen").is_err());
    }
}
