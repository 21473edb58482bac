use serde::Serialize;
use tracing::{info, warn};

use specmerge_core::{EntityKind, IdentityKey, LAST_MODIFIED, MergeId, MergeMode, Record, Watermark};
use specmerge_storage::Dataset;

use crate::diff::EntityDiff;
use crate::error::EngineError;
use crate::resolution::ResolutionSurface;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityReport {
    pub kind: EntityKind,
    pub conflicts: usize,
    pub kept_target: usize,
    pub kept_source: usize,
    /// Source-only records copied into the merged result.
    pub adopted: Vec<IdentityKey>,
    /// Target-only records the converged result carries for the Source side.
    /// Staging starts as a copy of Target, so these need no extra write.
    pub propagated: Vec<IdentityKey>,
    pub unchanged: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitReport {
    pub merge_id: MergeId,
    pub mode: MergeMode,
    /// Stored cutoff, `None` when the merge was limited to some entities and
    /// left the cutoff where it was.
    pub watermark: Option<Watermark>,
    pub entities: Vec<EntityReport>,
    pub compacted: bool,
}

impl CommitReport {
    pub fn entity(&self, kind: EntityKind) -> Option<&EntityReport> {
        self.entities.iter().find(|e| e.kind == kind)
    }
}

/// Applies decisions and new records through Staging into Target.
pub struct MergeCommitter {
    merge_id: MergeId,
    compact_after_commit: bool,
}

impl MergeCommitter {
    pub fn new(merge_id: MergeId, compact_after_commit: bool) -> Self {
        Self {
            merge_id,
            compact_after_commit,
        }
    }

    /// Build the merged state in Staging. Staging is re-seeded from Target on
    /// every call, so a failed attempt can be repeated with the same decisions.
    ///
    /// Target rows kept over a differing Source row get `stamp` as their
    /// `lastModified`, so the next update still compares them.
    pub fn submit<D: Dataset>(
        &self,
        dataset: &mut D,
        diffs: &[EntityDiff],
        surface: &ResolutionSurface,
        stamp: Watermark,
    ) -> Result<Vec<EntityReport>, EngineError> {
        let undecided = surface.undecided_count();
        if undecided > 0 {
            return Err(EngineError::UndecidedConflicts(undecided));
        }

        let mut upserts: Vec<Record> = Vec::new();
        let mut reports = Vec::with_capacity(diffs.len());
        for diff in diffs {
            let chosen = surface.chosen_sources(diff.kind);
            let kept_source = chosen.len();
            upserts.extend(chosen.into_iter().cloned());

            for kept in surface.kept_targets(diff.kind) {
                let mut record = kept.clone();
                record.set(LAST_MODIFIED, stamp.to_rfc3339())?;
                upserts.push(record);
            }

            let mut adopted = Vec::new();
            if diff.policy.adopt_new_in_source {
                for key in &diff.new_in_source {
                    if let Some(record) = diff.source_row(key) {
                        upserts.push(record.clone());
                        adopted.push(key.clone());
                    }
                }
            }

            let propagated = if diff.policy.propagate_new_in_target {
                diff.new_in_target.iter().cloned().collect()
            } else {
                Vec::new()
            };

            reports.push(EntityReport {
                kind: diff.kind,
                conflicts: diff.conflicting.len(),
                kept_target: diff.conflicting.len() - kept_source,
                kept_source,
                adopted,
                propagated,
                unchanged: diff.unchanged.len(),
            });
        }

        let kinds: Vec<EntityKind> = diffs.iter().map(|d| d.kind).collect();
        dataset.build_staging(&kinds, &upserts)?;
        info!(merge_id = %self.merge_id, writes = upserts.len(), "merged state staged");
        Ok(reports)
    }

    /// Swap Staging into Target and store `cutoff`, if any, in one
    /// transaction, then compact. Returns whether compaction ran.
    pub fn alter_tables<D: Dataset>(
        &self,
        dataset: &mut D,
        kinds: &[EntityKind],
        cutoff: Option<Watermark>,
    ) -> Result<bool, EngineError> {
        dataset.swap_staging_into_target(kinds, cutoff)?;

        let compacted = if self.compact_after_commit {
            match dataset.compact() {
                Ok(()) => true,
                Err(e) => {
                    warn!(merge_id = %self.merge_id, error = %e, "compaction failed after commit");
                    false
                }
            }
        } else {
            false
        };
        Ok(compacted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DiffEngine;
    use crate::resolution::Decision;
    use specmerge_core::{DiffScope, InstanceRole};
    use specmerge_storage::SqliteDataset;

    fn image(id: &str, title: &str) -> Record {
        Record::from_pairs(EntityKind::Image, &[("identifier", id), ("title", title)]).unwrap()
    }

    fn stamp() -> Watermark {
        Watermark::parse("2024-06-01T12:00:00Z").unwrap()
    }

    fn setup(
        target: &[Record],
        source: &[Record],
        mode: MergeMode,
    ) -> Result<(SqliteDataset, Vec<EntityDiff>), Box<dyn std::error::Error>> {
        let mut ds = SqliteDataset::open_in_memory()?;
        ds.create_instance(InstanceRole::Source)?;
        ds.create_instance(InstanceRole::Staging)?;
        ds.insert_records(InstanceRole::Target, target)?;
        ds.insert_records(InstanceRole::Source, source)?;
        let engine = DiffEngine::new(vec![LAST_MODIFIED.to_string()]);
        let diff = engine.diff(&ds, EntityKind::Image, mode, DiffScope::FullHistory)?;
        Ok((ds, vec![diff]))
    }

    #[test]
    fn staging_carries_target_only_records_in_peer_merge() -> Result<(), Box<dyn std::error::Error>> {
        let (mut ds, diffs) = setup(&[image("A", "local")], &[image("B", "remote")], MergeMode::PeerMerge)?;
        let surface = ResolutionSurface::from_diffs(&diffs);
        let committer = MergeCommitter::new(MergeId::new(), false);

        let reports = committer.submit(&mut ds, &diffs, &surface, stamp())?;
        assert_eq!(reports[0].propagated, vec![IdentityKey::from("A")]);
        assert_eq!(reports[0].adopted, vec![IdentityKey::from("B")]);

        let staged = ds.load_records(EntityKind::Image, InstanceRole::Staging)?;
        assert_eq!(staged, vec![image("A", "local"), image("B", "remote")]);
        // Nothing reaches Target before alter_tables.
        assert_eq!(ds.record_count(EntityKind::Image, InstanceRole::Target)?, 1);
        Ok(())
    }

    #[test]
    fn undecided_conflicts_block_submit() -> Result<(), Box<dyn std::error::Error>> {
        let (mut ds, diffs) = setup(&[image("A", "one")], &[image("A", "two")], MergeMode::PeerMerge)?;
        let mut surface = ResolutionSurface::from_diffs(&diffs);
        surface.set(EntityKind::Image, &IdentityKey::from("A"), Decision::Undecided)?;
        let committer = MergeCommitter::new(MergeId::new(), false);
        let err = committer.submit(&mut ds, &diffs, &surface, stamp()).unwrap_err();
        assert!(matches!(err, EngineError::UndecidedConflicts(1)));
        assert_eq!(ds.record_count(EntityKind::Image, InstanceRole::Staging)?, 0);
        Ok(())
    }

    #[test]
    fn alter_tables_swaps_and_advances_watermark() -> Result<(), Box<dyn std::error::Error>> {
        let (mut ds, diffs) = setup(&[image("A", "one")], &[image("A", "two")], MergeMode::PeerMerge)?;
        let mut surface = ResolutionSurface::from_diffs(&diffs);
        surface.select_all_source();
        let committer = MergeCommitter::new(MergeId::new(), true);
        committer.submit(&mut ds, &diffs, &surface, stamp())?;

        let cutoff = Watermark::parse("2024-06-01T11:59:59Z")?;
        let compacted = committer.alter_tables(&mut ds, &[EntityKind::Image], Some(cutoff))?;
        assert!(compacted);
        assert_eq!(ds.read_watermark()?, Some(cutoff));
        let rec = ds
            .get_record(EntityKind::Image, InstanceRole::Target, &IdentityKey::from("A"))?
            .unwrap();
        assert_eq!(rec.get("title"), Some("two"));
        Ok(())
    }

    #[test]
    fn kept_target_rows_are_restamped() -> Result<(), Box<dyn std::error::Error>> {
        let (mut ds, diffs) = setup(&[image("A", "mine")], &[image("A", "theirs")], MergeMode::Updating)?;
        let surface = ResolutionSurface::from_diffs(&diffs);
        let committer = MergeCommitter::new(MergeId::new(), false);
        let reports = committer.submit(&mut ds, &diffs, &surface, stamp())?;
        assert_eq!(reports[0].kept_target, 1);

        let staged = ds
            .get_record(EntityKind::Image, InstanceRole::Staging, &IdentityKey::from("A"))?
            .unwrap();
        assert_eq!(staged.get("title"), Some("mine"));
        assert_eq!(staged.get(LAST_MODIFIED), Some(stamp().to_rfc3339().as_str()));
        Ok(())
    }

    #[test]
    fn alter_tables_without_cutoff_leaves_watermark() -> Result<(), Box<dyn std::error::Error>> {
        let (mut ds, diffs) = setup(&[], &[image("B", "remote")], MergeMode::Updating)?;
        let stored = Watermark::parse("2024-01-01T00:00:00Z")?;
        ds.write_watermark(stored)?;
        let surface = ResolutionSurface::from_diffs(&diffs);
        let committer = MergeCommitter::new(MergeId::new(), false);
        committer.submit(&mut ds, &diffs, &surface, stamp())?;
        assert!(!committer.alter_tables(&mut ds, &[EntityKind::Image], None)?);
        assert_eq!(ds.read_watermark()?, Some(stored));
        assert_eq!(ds.record_count(EntityKind::Image, InstanceRole::Target)?, 1);
        Ok(())
    }
}
