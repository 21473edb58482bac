use serde::{Deserialize, Serialize};

use crate::schema::EntityDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Target is the prior local state, Source a fresh canonical snapshot.
    Updating,
    /// Target and Source are independently edited copies.
    PeerMerge,
}

impl MergeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Updating => "updating",
            Self::PeerMerge => "peer_merge",
        }
    }
}

/// What the committer does with each "new" set of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectionPolicy {
    /// Copy Source-only records into the merged result.
    pub adopt_new_in_source: bool,
    /// Report Target-only records as carried to the Source side. They survive
    /// into the merged result either way, since Staging starts from Target.
    pub propagate_new_in_target: bool,
}

impl DirectionPolicy {
    pub fn for_entity(desc: &EntityDescriptor, mode: MergeMode) -> Self {
        match (desc.upstream_only, mode) {
            (true, _) => Self {
                adopt_new_in_source: true,
                propagate_new_in_target: false,
            },
            (false, MergeMode::Updating) => Self {
                adopt_new_in_source: true,
                propagate_new_in_target: false,
            },
            (false, MergeMode::PeerMerge) => Self {
                adopt_new_in_source: true,
                propagate_new_in_target: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EntityKind;

    #[test]
    fn taxon_never_propagates_target_additions() {
        for mode in [MergeMode::Updating, MergeMode::PeerMerge] {
            let policy = DirectionPolicy::for_entity(EntityKind::Taxon.descriptor(), mode);
            assert!(policy.adopt_new_in_source);
            assert!(!policy.propagate_new_in_target);
        }
    }

    #[test]
    fn peer_merge_converges_other_entities() {
        for kind in EntityKind::ALL.into_iter().filter(|k| *k != EntityKind::Taxon) {
            let peer = DirectionPolicy::for_entity(kind.descriptor(), MergeMode::PeerMerge);
            assert!(peer.adopt_new_in_source && peer.propagate_new_in_target, "{kind}");
            let updating = DirectionPolicy::for_entity(kind.descriptor(), MergeMode::Updating);
            assert!(updating.adopt_new_in_source && !updating.propagate_new_in_target, "{kind}");
        }
    }
}
