pub mod committer;
pub mod config;
pub mod diff;
pub mod error;
pub mod gate;
pub mod resolution;

pub use committer::{CommitReport, EntityReport, MergeCommitter};
pub use config::{MergeConfig, ReconcileConfig, StorageConfig};
pub use diff::{DiffEngine, EntityDiff};
pub use error::{ConfigError, EngineError};
pub use gate::{CommitTimes, WatermarkGate};
pub use resolution::{ConflictPair, ConflictView, Decision, ResolutionSurface};

use std::path::Path;

use tracing::{info, warn};

use specmerge_core::{EntityKind, IdentityKey, InstanceRole, MergeId, MergeMode, Watermark};
use specmerge_storage::{Dataset, SqliteDataset};

/// What the caller asks `begin_merge` to do.
#[derive(Debug, Clone, Copy)]
pub struct MergeRequest {
    pub mode: MergeMode,
    /// Publish time of the canonical snapshot, for updates.
    pub published: Option<Watermark>,
    /// Restrict the merge to one entity.
    pub entity: Option<EntityKind>,
}

impl MergeRequest {
    pub fn updating(published: Watermark) -> Self {
        Self {
            mode: MergeMode::Updating,
            published: Some(published),
            entity: None,
        }
    }

    pub fn peer() -> Self {
        Self {
            mode: MergeMode::PeerMerge,
            published: None,
            entity: None,
        }
    }

    pub fn only(mut self, kind: EntityKind) -> Self {
        self.entity = Some(kind);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeEvent {
    /// Conflicts are ready for review, or the merge already completed because
    /// there were none.
    Ready {
        merge_id: MergeId,
        conflicts: usize,
        auto_completed: bool,
    },
    Finished {
        merge_id: MergeId,
        watermark: Option<Watermark>,
    },
    Canceled {
        merge_id: MergeId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    AwaitingDecisions,
    Finished,
    Canceled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingDecisions => "awaiting decisions",
            Self::Finished => "finished",
            Self::Canceled => "canceled",
        }
    }
}

pub struct Reconciler {
    config: ReconcileConfig,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(ReconcileConfig::default())
    }
}

impl Reconciler {
    pub fn new(config: ReconcileConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub fn open_dataset<P: AsRef<Path>>(&self, path: P) -> Result<SqliteDataset, EngineError> {
        let options = self.config.storage.to_options()?;
        Ok(SqliteDataset::open_with(path, &options)?)
    }

    /// Diff the staged Source against Target and open a session.
    ///
    /// When no entity has conflicts the session commits straight away and is
    /// returned already finished. The session holds the dataset mutably, so
    /// no second merge can start on it until this one is dropped.
    pub fn begin_merge<'a, D: Dataset>(
        &self,
        dataset: &'a mut D,
        request: MergeRequest,
    ) -> Result<MergeSession<'a, D>, EngineError> {
        let kinds: Vec<EntityKind> = match request.entity {
            Some(kind) => vec![kind],
            None => EntityKind::ALL.to_vec(),
        };
        if !dataset.tables_exist(InstanceRole::Source, &kinds)? {
            return Err(EngineError::SourceNotStaged);
        }

        let merge_id = MergeId::new();
        let gate = WatermarkGate::read(&*dataset);
        if self.config.merge.require_newer_snapshot {
            gate.admit(request.mode, request.published)?;
        }
        let scope = gate.scope(request.mode);
        info!(
            %merge_id,
            mode = request.mode.as_str(),
            entities = kinds.len(),
            scope = ?scope,
            "beginning merge"
        );

        let engine = DiffEngine::new(self.config.merge.ignored_fields.clone());
        let diffs = kinds
            .iter()
            .map(|&kind| engine.diff(&*dataset, kind, request.mode, scope))
            .collect::<Result<Vec<_>, _>>()?;
        dataset.create_instance(InstanceRole::Staging)?;

        let surface = ResolutionSurface::from_diffs(&diffs);
        let conflicts = surface.conflict_count();
        let mut session = MergeSession {
            dataset,
            merge_id,
            mode: request.mode,
            limited: request.entity.is_some(),
            gate,
            diffs,
            surface,
            committer: MergeCommitter::new(merge_id, self.config.merge.compact_after_commit),
            status: SessionStatus::AwaitingDecisions,
            report: None,
            events: Vec::new(),
        };

        if conflicts == 0 {
            session.submit()?;
            session.events.insert(
                0,
                MergeEvent::Ready {
                    merge_id,
                    conflicts: 0,
                    auto_completed: true,
                },
            );
        } else {
            info!(%merge_id, conflicts, "conflicts awaiting review");
            session.events.push(MergeEvent::Ready {
                merge_id,
                conflicts,
                auto_completed: false,
            });
        }
        Ok(session)
    }
}

/// One merge in progress against a dataset.
pub struct MergeSession<'a, D: Dataset> {
    dataset: &'a mut D,
    merge_id: MergeId,
    mode: MergeMode,
    /// Only some entities take part; the stored cutoff stays put.
    limited: bool,
    gate: WatermarkGate,
    diffs: Vec<EntityDiff>,
    surface: ResolutionSurface,
    committer: MergeCommitter,
    status: SessionStatus,
    report: Option<CommitReport>,
    events: Vec<MergeEvent>,
}

impl<D: Dataset> MergeSession<'_, D> {
    pub fn merge_id(&self) -> MergeId {
        self.merge_id
    }

    pub fn mode(&self) -> MergeMode {
        self.mode
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn diffs(&self) -> &[EntityDiff] {
        &self.diffs
    }

    pub fn diff(&self, kind: EntityKind) -> Option<&EntityDiff> {
        self.diffs.iter().find(|d| d.kind == kind)
    }

    pub fn surface(&self) -> &ResolutionSurface {
        &self.surface
    }

    pub fn view(&self, kind: EntityKind) -> Vec<ConflictView<'_>> {
        self.surface.view(kind)
    }

    pub fn report(&self) -> Option<&CommitReport> {
        self.report.as_ref()
    }

    pub fn dataset(&self) -> &D {
        &*self.dataset
    }

    /// Drain events emitted so far.
    pub fn take_events(&mut self) -> Vec<MergeEvent> {
        std::mem::take(&mut self.events)
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        match self.status {
            SessionStatus::AwaitingDecisions => Ok(()),
            other => Err(EngineError::SessionClosed(other.as_str())),
        }
    }

    pub fn set_decision(
        &mut self,
        kind: EntityKind,
        key: &IdentityKey,
        decision: Decision,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.surface.set(kind, key, decision)
    }

    pub fn set_keep_source(
        &mut self,
        kind: EntityKind,
        key: &IdentityKey,
        keep_source: bool,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.surface.set_keep_source(kind, key, keep_source)
    }

    pub fn select_all_source(&mut self) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.surface.select_all_source();
        Ok(())
    }

    pub fn select_all_target(&mut self) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.surface.select_all_target();
        Ok(())
    }

    /// Apply the current decisions and commit.
    ///
    /// On failure Target is untouched and the decisions are kept, so the
    /// operator can call `submit` again once the cause is cleared.
    ///
    /// A merge limited to some entities leaves the stored cutoff alone and
    /// drops only those entities' Source tables.
    pub fn submit(&mut self) -> Result<CommitReport, EngineError> {
        self.ensure_open()?;
        let times = self.gate.commit_times(Watermark::now());
        let entities = self.committer.submit(
            &mut *self.dataset,
            &self.diffs,
            &self.surface,
            times.stamp,
        )?;
        let kinds: Vec<EntityKind> = self.diffs.iter().map(|d| d.kind).collect();
        let watermark = (!self.limited).then_some(times.cutoff);
        let compacted = self
            .committer
            .alter_tables(&mut *self.dataset, &kinds, watermark)?;

        if let Err(e) = self.dataset.drop_tables(InstanceRole::Source, &kinds) {
            warn!(merge_id = %self.merge_id, error = %e, "failed to drop source tables after commit");
        }
        if let Err(e) = self.dataset.drop_instance(InstanceRole::Staging) {
            warn!(merge_id = %self.merge_id, error = %e, "failed to drop staging after commit");
        }

        let report = CommitReport {
            merge_id: self.merge_id,
            mode: self.mode,
            watermark,
            entities,
            compacted,
        };
        self.status = SessionStatus::Finished;
        self.report = Some(report.clone());
        self.events.push(MergeEvent::Finished {
            merge_id: self.merge_id,
            watermark,
        });
        info!(
            merge_id = %self.merge_id,
            watermark = ?watermark.map(|w| w.to_rfc3339()),
            "merge finished"
        );
        Ok(report)
    }

    /// Abandon the merge. Pending decisions are discarded and Staging is
    /// removed; Target is never touched. Source stays staged for a retry.
    pub fn cancel(&mut self) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.surface.discard();
        self.dataset.drop_instance(InstanceRole::Staging)?;
        self.status = SessionStatus::Canceled;
        self.events.push(MergeEvent::Canceled {
            merge_id: self.merge_id,
        });
        info!(merge_id = %self.merge_id, "merge canceled");
        Ok(())
    }
}
