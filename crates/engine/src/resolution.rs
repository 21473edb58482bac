//! Operator decisions for conflicting records, independent of any display.

use std::collections::BTreeMap;

use specmerge_core::{EntityKind, Fingerprint, IdentityKey, Record};

use crate::diff::EntityDiff;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Decision {
    /// Local edits are preserved unless explicitly overridden.
    #[default]
    KeepTarget,
    KeepSource,
    Undecided,
}

/// Both sides of one conflicting record.
#[derive(Debug, Clone)]
pub struct ConflictPair {
    pub key: IdentityKey,
    pub target: Record,
    pub source: Record,
    pub differing_fields: Vec<&'static str>,
    pub target_fingerprint: Fingerprint,
    pub source_fingerprint: Fingerprint,
}

/// Read-only row handed to the interactive layer.
#[derive(Debug)]
pub struct ConflictView<'a> {
    pub pair: &'a ConflictPair,
    pub decision: Decision,
}

impl ConflictView<'_> {
    pub fn keep_source(&self) -> bool {
        self.decision == Decision::KeepSource
    }
}

#[derive(Debug, Default)]
struct EntityConflicts {
    pairs: BTreeMap<IdentityKey, ConflictPair>,
    decisions: BTreeMap<IdentityKey, Decision>,
}

#[derive(Debug, Default)]
pub struct ResolutionSurface {
    entities: BTreeMap<EntityKind, EntityConflicts>,
}

impl ResolutionSurface {
    /// Load every conflicting pair with its decision set to keep-target.
    pub fn from_diffs(diffs: &[EntityDiff]) -> Self {
        let mut entities = BTreeMap::new();
        for diff in diffs {
            let mut conflicts = EntityConflicts::default();
            for key in &diff.conflicting {
                let (Some(target), Some(source)) = (diff.target_row(key), diff.source_row(key)) else {
                    continue;
                };
                let pair = ConflictPair {
                    key: key.clone(),
                    differing_fields: target.differing_fields(source, &diff.projection),
                    target_fingerprint: target.fingerprint(&diff.projection),
                    source_fingerprint: source.fingerprint(&diff.projection),
                    target: target.clone(),
                    source: source.clone(),
                };
                conflicts.pairs.insert(key.clone(), pair);
                conflicts.decisions.insert(key.clone(), Decision::default());
            }
            if !conflicts.pairs.is_empty() {
                entities.insert(diff.kind, conflicts);
            }
        }
        Self { entities }
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn conflict_count(&self) -> usize {
        self.entities.values().map(|e| e.pairs.len()).sum()
    }

    /// Entities that have at least one conflict.
    pub fn entities(&self) -> Vec<EntityKind> {
        self.entities.keys().copied().collect()
    }

    pub fn view(&self, kind: EntityKind) -> Vec<ConflictView<'_>> {
        self.entities
            .get(&kind)
            .map(|e| {
                e.pairs
                    .iter()
                    .map(|(key, pair)| ConflictView {
                        pair,
                        decision: e.decisions.get(key).copied().unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn decision(&self, kind: EntityKind, key: &IdentityKey) -> Option<Decision> {
        self.entities.get(&kind)?.decisions.get(key).copied()
    }

    pub fn set(
        &mut self,
        kind: EntityKind,
        key: &IdentityKey,
        decision: Decision,
    ) -> Result<(), EngineError> {
        let slot = self
            .entities
            .get_mut(&kind)
            .and_then(|e| e.decisions.get_mut(key))
            .ok_or_else(|| EngineError::UnknownConflict {
                entity: kind.to_string(),
                key: key.to_string(),
            })?;
        *slot = decision;
        Ok(())
    }

    pub fn set_keep_source(
        &mut self,
        kind: EntityKind,
        key: &IdentityKey,
        keep_source: bool,
    ) -> Result<(), EngineError> {
        let decision = if keep_source {
            Decision::KeepSource
        } else {
            Decision::KeepTarget
        };
        self.set(kind, key, decision)
    }

    /// Flip between keep-source and keep-target. Undecided becomes keep-source.
    pub fn toggle(&mut self, kind: EntityKind, key: &IdentityKey) -> Result<Decision, EngineError> {
        let next = match self.decision(kind, key) {
            Some(Decision::KeepSource) => Decision::KeepTarget,
            Some(_) => Decision::KeepSource,
            None => {
                return Err(EngineError::UnknownConflict {
                    entity: kind.to_string(),
                    key: key.to_string(),
                });
            }
        };
        self.set(kind, key, next)?;
        Ok(next)
    }

    pub fn select_all_source(&mut self) {
        self.set_all(Decision::KeepSource);
    }

    pub fn select_all_target(&mut self) {
        self.set_all(Decision::KeepTarget);
    }

    fn set_all(&mut self, decision: Decision) {
        for conflicts in self.entities.values_mut() {
            conflicts.decisions.values_mut().for_each(|d| *d = decision);
        }
    }

    pub fn undecided_count(&self) -> usize {
        self.entities
            .values()
            .flat_map(|e| e.decisions.values())
            .filter(|d| **d == Decision::Undecided)
            .count()
    }

    /// Source rows the operator chose to keep for `kind`.
    pub fn chosen_sources(&self, kind: EntityKind) -> Vec<&Record> {
        self.pairs_with(kind, Decision::KeepSource)
            .map(|pair| &pair.source)
            .collect()
    }

    /// Target rows kept over their Source counterpart for `kind`.
    pub fn kept_targets(&self, kind: EntityKind) -> Vec<&Record> {
        self.pairs_with(kind, Decision::KeepTarget)
            .map(|pair| &pair.target)
            .collect()
    }

    fn pairs_with(&self, kind: EntityKind, decision: Decision) -> impl Iterator<Item = &ConflictPair> {
        self.entities.get(&kind).into_iter().flat_map(move |e| {
            e.pairs
                .iter()
                .filter(move |(key, _)| e.decisions.get(*key) == Some(&decision))
                .map(|(_, pair)| pair)
        })
    }

    /// Drop every pending decision.
    pub fn discard(&mut self) {
        self.entities.clear();
    }
}
