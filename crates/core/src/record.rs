use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::Fingerprint;
use crate::schema::{EntityDescriptor, EntityKind, LAST_MODIFIED};

/// Identity-key values in the order of the descriptor's `key_fields`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdentityKey(Vec<String>);

impl IdentityKey {
    pub fn new(parts: Vec<String>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

impl From<&str> for IdentityKey {
    fn from(value: &str) -> Self {
        Self(vec![value.to_string()])
    }
}

impl<const N: usize> From<[&str; N]> for IdentityKey {
    fn from(parts: [&str; N]) -> Self {
        Self(parts.iter().map(|p| p.to_string()).collect())
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" | "))
    }
}

/// One row of an entity table. Values follow the descriptor's field order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    kind: EntityKind,
    values: Vec<String>,
}

impl Record {
    pub fn new(kind: EntityKind, values: Vec<String>) -> Result<Self, CoreError> {
        let expected = kind.descriptor().fields.len();
        if values.len() != expected {
            return Err(CoreError::FieldCountMismatch {
                entity: kind.to_string(),
                expected,
                actual: values.len(),
            });
        }
        Ok(Self { kind, values })
    }

    /// Build a record from named values; unnamed fields are left empty.
    pub fn from_pairs(kind: EntityKind, pairs: &[(&str, &str)]) -> Result<Self, CoreError> {
        let desc = kind.descriptor();
        let mut values = vec![String::new(); desc.fields.len()];
        for (field, value) in pairs {
            let idx = desc.field_index(field).ok_or_else(|| CoreError::UnknownField {
                entity: kind.to_string(),
                field: field.to_string(),
            })?;
            values[idx] = value.to_string();
        }
        Ok(Self { kind, values })
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn descriptor(&self) -> &'static EntityDescriptor {
        self.kind.descriptor()
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn into_values(self) -> Vec<String> {
        self.values
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.descriptor()
            .field_index(field)
            .map(|i| self.values[i].as_str())
    }

    pub fn set(&mut self, field: &str, value: impl Into<String>) -> Result<(), CoreError> {
        let idx = self
            .descriptor()
            .field_index(field)
            .ok_or_else(|| CoreError::UnknownField {
                entity: self.kind.to_string(),
                field: field.to_string(),
            })?;
        self.values[idx] = value.into();
        Ok(())
    }

    pub fn identity(&self) -> IdentityKey {
        self.descriptor().identity_of(self)
    }

    pub fn last_modified(&self) -> Option<&str> {
        self.get(LAST_MODIFIED)
    }

    /// Hash of the values at `projection`. Each value is length-prefixed so
    /// that ("ab", "c") and ("a", "bc") differ.
    pub fn fingerprint(&self, projection: &[usize]) -> Fingerprint {
        let mut hasher = blake3::Hasher::new();
        for &i in projection {
            let value = self.values[i].as_bytes();
            hasher.update(&(value.len() as u64).to_le_bytes());
            hasher.update(value);
        }
        Fingerprint::from_bytes(*hasher.finalize().as_bytes())
    }

    /// Field names whose values differ between `self` and `other` within `projection`.
    pub fn differing_fields(&self, other: &Record, projection: &[usize]) -> Vec<&'static str> {
        let desc = self.descriptor();
        projection
            .iter()
            .filter(|&&i| self.values[i] != other.values[i])
            .map(|&i| desc.fields[i])
            .collect()
    }
}
