use thiserror::Error;

use super::{SnapKind, SnapshotMetadata};

/// Corruption found while reconstructing a chain
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChainCorruption {
    /// A delta snapshot has no full snapshot to anchor on
    #[error("delta snapshot {0} has no full snapshot anchor")]
    MissingAnchor(String),
    /// A delta does not continue where its predecessor ended
    #[error("revision gap in chain anchored at {anchor}: delta starts at {found}, expected {expected}")]
    RevisionGap {
        /// Object name of the chain's anchor full snapshot
        anchor: String,
        /// Revision the next delta was expected to start at
        expected: i64,
        /// Revision the offending delta actually starts at
        found: i64,
    },
}

/// One full snapshot and the deltas depending on it for restoration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotChain {
    /// Anchor full snapshot
    full: SnapshotMetadata,
    /// Deltas in revision order, contiguous from the anchor
    deltas: Vec<SnapshotMetadata>,
}

impl SnapshotChain {
    /// Anchor full snapshot
    #[must_use]
    #[inline]
    pub fn full(&self) -> &SnapshotMetadata {
        &self.full
    }

    /// Deltas in revision order
    #[must_use]
    #[inline]
    pub fn deltas(&self) -> &[SnapshotMetadata] {
        &self.deltas
    }

    /// Creation timestamp of the anchor, used for retention decisions
    #[must_use]
    #[inline]
    pub fn created_at(&self) -> u64 {
        self.full.created_at()
    }

    /// Last revision restorable from this chain
    #[must_use]
    #[inline]
    pub fn last_revision(&self) -> i64 {
        self.deltas
            .last()
            .map_or_else(|| self.full.last_revision(), SnapshotMetadata::last_revision)
    }

    /// All member metadata, anchor first
    #[inline]
    pub fn members(&self) -> impl Iterator<Item = &SnapshotMetadata> {
        std::iter::once(&self.full).chain(self.deltas.iter())
    }
}

/// A chain that could not be reconstructed, left untouched by garbage collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptChain {
    /// Object name of the anchor, when one exists
    pub anchor: Option<String>,
    /// Members grouped under this chain, anchor included when present
    pub members: Vec<SnapshotMetadata>,
    /// Why reconstruction failed
    pub corruption: ChainCorruption,
}

/// Result of reconstructing chains from a listing
///
/// Rebuilt from scratch on every use, never patched incrementally.
#[derive(Debug, Default, Clone)]
pub struct ChainIndex {
    /// Healthy chains, ordered by anchor revision range
    chains: Vec<SnapshotChain>,
    /// Chains whose reconstruction failed
    corrupt: Vec<CorruptChain>,
}

impl ChainIndex {
    /// Healthy chains, oldest first
    #[must_use]
    #[inline]
    pub fn chains(&self) -> &[SnapshotChain] {
        &self.chains
    }

    /// Chains whose reconstruction failed
    #[must_use]
    #[inline]
    pub fn corrupt(&self) -> &[CorruptChain] {
        &self.corrupt
    }

    /// The chain holding the most recent full snapshot
    #[must_use]
    #[inline]
    pub fn latest(&self) -> Option<&SnapshotChain> {
        self.chains.last()
    }
}

/// Reconstruct snapshot chains from decoded listing metadata
///
/// Pure function over its input: every delta is grouped under the most recent
/// full snapshot whose last revision does not exceed the delta's start
/// revision, then each group is checked for contiguity. A revision gap or an
/// anchor-less delta marks the affected chain corrupt without touching the
/// others.
#[must_use]
#[inline]
pub fn build_chains(snapshots: Vec<SnapshotMetadata>) -> ChainIndex {
    let mut fulls: Vec<SnapshotMetadata> = Vec::new();
    let mut deltas: Vec<SnapshotMetadata> = Vec::new();
    for snap in snapshots {
        match snap.kind() {
            SnapKind::Full => fulls.push(snap),
            SnapKind::Delta => deltas.push(snap),
        }
    }
    fulls.sort_by_key(|f| (f.last_revision(), f.created_at()));
    deltas.sort_by_key(|d| (d.start_revision(), d.last_revision()));

    let mut groups: Vec<(SnapshotMetadata, Vec<SnapshotMetadata>)> =
        fulls.into_iter().map(|f| (f, Vec::new())).collect();
    let mut orphans: Vec<SnapshotMetadata> = Vec::new();
    for delta in deltas {
        // the most recent full whose range ends at or before the delta's start
        let anchor = groups
            .iter_mut()
            .rev()
            .find(|(full, _)| full.last_revision() <= delta.start_revision());
        match anchor {
            Some((_, group)) => group.push(delta),
            None => orphans.push(delta),
        }
    }

    let mut index = ChainIndex::default();
    for orphan in orphans {
        index.corrupt.push(CorruptChain {
            anchor: None,
            corruption: ChainCorruption::MissingAnchor(orphan.object_name()),
            members: vec![orphan],
        });
    }
    for (full, group) in groups {
        let mut expected = full.last_revision();
        let mut gap = None;
        for delta in &group {
            if delta.start_revision() != expected {
                gap = Some(ChainCorruption::RevisionGap {
                    anchor: full.object_name(),
                    expected,
                    found: delta.start_revision(),
                });
                break;
            }
            expected = delta.last_revision();
        }
        if let Some(corruption) = gap {
            let anchor = full.object_name();
            let members = std::iter::once(full).chain(group).collect();
            index.corrupt.push(CorruptChain {
                anchor: Some(anchor),
                members,
                corruption,
            });
        } else {
            index.chains.push(SnapshotChain {
                full,
                deltas: group,
            });
        }
    }
    index
}
