//! Exponential retention: keep everything recent, thin out with age.
//!
//! Chains younger than an hour are all kept. Older chains fall into
//! hourly buckets up to a day, daily buckets up to thirty days, and
//! thirty day buckets beyond that, with only the newest chain of each
//! bucket surviving.

use std::collections::HashMap;

use crate::snapshot::chain::SnapshotChain;

/// Seconds in an hour
const HOUR: u64 = 60 * 60;
/// Seconds in a day
const DAY: u64 = 24 * HOUR;
/// Seconds in the coarse thirty day bucket
const THIRTY_DAYS: u64 = 30 * DAY;

/// Age bucket a chain falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Bucket {
    /// Hourly bucket within the first day
    Hour(u64),
    /// Daily bucket within the first thirty days
    Day(u64),
    /// Thirty day bucket beyond that
    ThirtyDays(u64),
}

/// Bucket of a chain aged `age` seconds, `None` inside the first hour
#[allow(clippy::integer_division)] // bucket index
fn bucket_of(age: u64) -> Option<Bucket> {
    if age < HOUR {
        None
    } else if age < DAY {
        Some(Bucket::Hour(age / HOUR))
    } else if age < THIRTY_DAYS {
        Some(Bucket::Day(age / DAY))
    } else {
        Some(Bucket::ThirtyDays(age / THIRTY_DAYS))
    }
}

/// Indices of victim chains, oldest first.
///
/// `chains` is ordered oldest first. The newest chain always survives,
/// whatever bucket it lands in.
pub(super) fn victims(chains: &[SnapshotChain], now: u64) -> Vec<usize> {
    let newest = chains.len().checked_sub(1);
    let mut keeper_per_bucket: HashMap<Bucket, usize> = HashMap::new();
    let mut buckets = vec![None; chains.len()];
    for (idx, chain) in chains.iter().enumerate() {
        let Some(bucket) = bucket_of(now.saturating_sub(chain.created_at())) else {
            continue;
        };
        if let Some(slot) = buckets.get_mut(idx) {
            *slot = Some(bucket);
        }
        let keeper = keeper_per_bucket.entry(bucket).or_insert(idx);
        if chains
            .get(*keeper)
            .is_some_and(|k| chain.created_at() > k.created_at())
        {
            *keeper = idx;
        }
    }
    buckets
        .iter()
        .enumerate()
        .filter_map(|(idx, bucket)| {
            let bucket = (*bucket)?;
            (Some(idx) != newest && keeper_per_bucket.get(&bucket) != Some(&idx)).then_some(idx)
        })
        .collect()
}
