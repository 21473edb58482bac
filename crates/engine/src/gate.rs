use tracing::{debug, warn};

use specmerge_core::{DiffScope, MergeMode, Watermark};
use specmerge_storage::Dataset;

use crate::error::EngineError;

/// Times written by one commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitTimes {
    /// `lastModified` given to Target rows kept over a differing Source row.
    pub stamp: Watermark,
    /// Cutoff stored with the commit, strictly before `stamp`.
    pub cutoff: Watermark,
}

/// Snapshot of the stored cutoff taken when a merge begins.
#[derive(Debug, Clone, Copy)]
pub struct WatermarkGate {
    stored: Option<Watermark>,
    readable: bool,
}

impl WatermarkGate {
    /// Read the stored cutoff. An unreadable value widens the diff to full
    /// history instead of failing the merge.
    pub fn read<D: Dataset>(dataset: &D) -> Self {
        match dataset.read_watermark() {
            Ok(stored) => {
                debug!(watermark = ?stored.map(|w| w.to_rfc3339()), "read watermark");
                Self { stored, readable: true }
            }
            Err(e) => {
                warn!(error = %e, "watermark unreadable, diffing full history");
                Self { stored: None, readable: false }
            }
        }
    }

    pub fn from_stored(stored: Option<Watermark>) -> Self {
        Self { stored, readable: true }
    }

    pub fn stored(&self) -> Option<Watermark> {
        self.stored
    }

    pub fn is_readable(&self) -> bool {
        self.readable
    }

    pub fn scope(&self, mode: MergeMode) -> DiffScope {
        match (mode, self.stored) {
            (MergeMode::Updating, Some(cutoff)) => DiffScope::Since(cutoff),
            _ => DiffScope::FullHistory,
        }
    }

    /// An update only proceeds when the snapshot is strictly newer than the
    /// stored cutoff. Peer merges are always admitted.
    pub fn admit(&self, mode: MergeMode, published: Option<Watermark>) -> Result<(), EngineError> {
        if mode != MergeMode::Updating {
            return Ok(());
        }
        match (published, self.stored) {
            (Some(published), Some(stored)) if published <= stored => {
                Err(EngineError::SnapshotNotNewer { published, stored })
            }
            _ => Ok(()),
        }
    }

    /// Stamp and cutoff for a commit at `now`. The cutoff never moves
    /// backwards, and rows carrying the stamp stay inside the next update's
    /// scope even when the local clock is behind the stored cutoff.
    pub fn commit_times(&self, now: Watermark) -> CommitTimes {
        let stamp = match self.stored {
            Some(stored) if stored >= now => stored.plus_seconds(1),
            _ => now,
        };
        CommitTimes {
            stamp,
            cutoff: Watermark::advance(self.stored, stamp.plus_seconds(-1)),
        }
    }
}
