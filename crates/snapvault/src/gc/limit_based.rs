//! Limit based retention: keep a fixed number of the most recent chains.

use crate::snapshot::chain::SnapshotChain;

/// Indices of victim chains, oldest first.
///
/// `chains` is ordered oldest first. The newest chain survives even
/// when `max_backups` is zero.
pub(super) fn victims(chains: &[SnapshotChain], max_backups: usize) -> Vec<usize> {
    let kept = max_backups.max(1);
    let cut = chains.len().saturating_sub(kept);
    (0..cut).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::snapshot::{SnapKind, SnapshotMetadata};
    use crate::snapshot::chain::build_chains;

    fn chains_of(count: i64) -> Vec<SnapshotChain> {
        let snaps = (0..count)
            .map(|i| SnapshotMetadata::new(SnapKind::Full, 0, i + 1, u64::try_from(i).unwrap()))
            .collect();
        build_chains(snaps).chains().to_vec()
    }

    #[test]
    fn keeps_the_n_most_recent() {
        assert_eq!(victims(&chains_of(5), 2), vec![0, 1, 2]);
    }

    #[test]
    fn under_the_limit_nothing_is_deleted() {
        assert!(victims(&chains_of(2), 7).is_empty());
        assert!(victims(&[], 7).is_empty());
    }

    #[test]
    fn the_newest_chain_survives_a_zero_limit() {
        assert_eq!(victims(&chains_of(3), 0), vec![0, 1]);
    }
}
