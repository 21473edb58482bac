//! Partitioning of identity keys between Target and Source.
//!
//! One generic routine serves all six entities; per-entity behaviour comes
//! from the registry descriptor and the direction policy.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use specmerge_core::{
    DiffScope, DirectionPolicy, EntityKind, IdentityKey, InstanceRole, MergeMode, Record,
};
use specmerge_storage::Dataset;

use crate::error::EngineError;

/// Outcome of diffing one entity. The four key sets are pairwise disjoint.
#[derive(Debug, Clone)]
pub struct EntityDiff {
    pub kind: EntityKind,
    pub policy: DirectionPolicy,
    /// Field indices compared for equality.
    pub projection: Vec<usize>,
    pub conflicting: BTreeSet<IdentityKey>,
    pub new_in_source: BTreeSet<IdentityKey>,
    pub new_in_target: BTreeSet<IdentityKey>,
    pub unchanged: BTreeSet<IdentityKey>,
    /// Target rows for conflicting and new-in-target keys.
    target_rows: BTreeMap<IdentityKey, Record>,
    /// Source rows for conflicting and new-in-source keys.
    source_rows: BTreeMap<IdentityKey, Record>,
}

impl EntityDiff {
    pub fn target_row(&self, key: &IdentityKey) -> Option<&Record> {
        self.target_rows.get(key)
    }

    pub fn source_row(&self, key: &IdentityKey) -> Option<&Record> {
        self.source_rows.get(key)
    }

    /// Union of the four sets.
    pub fn all_keys(&self) -> BTreeSet<IdentityKey> {
        self.conflicting
            .iter()
            .chain(&self.new_in_source)
            .chain(&self.new_in_target)
            .chain(&self.unchanged)
            .cloned()
            .collect()
    }

    pub fn has_changes(&self) -> bool {
        !(self.conflicting.is_empty() && self.new_in_source.is_empty() && self.new_in_target.is_empty())
    }
}

pub struct DiffEngine {
    ignored_fields: Vec<String>,
}

impl DiffEngine {
    pub fn new(ignored_fields: Vec<String>) -> Self {
        Self { ignored_fields }
    }

    pub fn diff<D: Dataset>(
        &self,
        dataset: &D,
        kind: EntityKind,
        mode: MergeMode,
        scope: DiffScope,
    ) -> Result<EntityDiff, EngineError> {
        let target = dataset.load_records(kind, InstanceRole::Target)?;
        let source = dataset.load_records(kind, InstanceRole::Source)?;
        Ok(self.partition(kind, mode, scope, target, source))
    }

    /// Pure partitioning step, independent of storage.
    ///
    /// Target rows outside `scope` do not take part directly. A Source key whose
    /// only Target counterpart is out of scope is unchanged if equal and new
    /// otherwise, so an untouched local row picks up the canonical value.
    pub fn partition(
        &self,
        kind: EntityKind,
        mode: MergeMode,
        scope: DiffScope,
        target: Vec<Record>,
        source: Vec<Record>,
    ) -> EntityDiff {
        let desc = kind.descriptor();
        let projection = desc.comparison_indices(&self.ignored_fields);

        let mut scoped_target = BTreeMap::new();
        let mut stale_target = BTreeMap::new();
        for record in target {
            let key = record.identity();
            if scope.includes(record.last_modified()) {
                scoped_target.insert(key, record);
            } else {
                stale_target.insert(key, record);
            }
        }
        let mut source: BTreeMap<IdentityKey, Record> =
            source.into_iter().map(|r| (r.identity(), r)).collect();

        let mut diff = EntityDiff {
            kind,
            policy: DirectionPolicy::for_entity(desc, mode),
            projection,
            conflicting: BTreeSet::new(),
            new_in_source: BTreeSet::new(),
            new_in_target: BTreeSet::new(),
            unchanged: BTreeSet::new(),
            target_rows: BTreeMap::new(),
            source_rows: BTreeMap::new(),
        };

        for (key, t) in scoped_target {
            match source.remove(&key) {
                Some(s) if s.fingerprint(&diff.projection) == t.fingerprint(&diff.projection) => {
                    diff.unchanged.insert(key);
                }
                Some(s) => {
                    diff.conflicting.insert(key.clone());
                    diff.target_rows.insert(key.clone(), t);
                    diff.source_rows.insert(key, s);
                }
                None => {
                    diff.new_in_target.insert(key.clone());
                    diff.target_rows.insert(key, t);
                }
            }
        }

        for (key, s) in source {
            let same_as_stale = stale_target
                .get(&key)
                .is_some_and(|t| t.fingerprint(&diff.projection) == s.fingerprint(&diff.projection));
            if same_as_stale {
                diff.unchanged.insert(key);
            } else {
                diff.new_in_source.insert(key.clone());
                diff.source_rows.insert(key, s);
            }
        }

        debug!(
            entity = %kind,
            mode = mode.as_str(),
            conflicting = diff.conflicting.len(),
            new_in_source = diff.new_in_source.len(),
            new_in_target = diff.new_in_target.len(),
            unchanged = diff.unchanged.len(),
            "diffed entity"
        );
        diff
    }
}
