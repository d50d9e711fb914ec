use std::str::FromStr;
use std::time::Duration;

use getset::Getters;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use super::duration_format;

/// Delta snapshotting is disabled below this period
pub const DELTA_SNAPSHOT_PERIOD_THRESHOLD: Duration = Duration::from_secs(1);

/// Default memory limit for delta snapshots (10 MiB)
const DEFAULT_DELTA_SNAPSHOT_MEMORY_LIMIT: i64 = 10 * 1024 * 1024;

/// default full snapshot schedule, on the hour, every hour
#[must_use]
#[inline]
pub fn default_full_snapshot_schedule() -> String {
    "0 0 */1 * * *".to_owned()
}

/// default delta snapshot period
#[must_use]
#[inline]
pub const fn default_delta_snapshot_period() -> Duration {
    Duration::from_secs(20)
}

/// default delta snapshot memory limit
#[must_use]
#[inline]
pub const fn default_delta_snapshot_memory_limit() -> i64 {
    DEFAULT_DELTA_SNAPSHOT_MEMORY_LIMIT
}

/// default garbage collection period
#[must_use]
#[inline]
pub const fn default_garbage_collection_period() -> Duration {
    Duration::from_secs(60)
}

/// default garbage collection policy
#[must_use]
#[inline]
pub const fn default_retention_policy() -> RetentionPolicyConfig {
    RetentionPolicyConfig::Exponential
}

/// default number of backups kept by the limit based policy
#[must_use]
#[inline]
pub const fn default_max_backups() -> u64 {
    7
}

/// default retention floor for young delta snapshots
#[must_use]
#[inline]
pub const fn default_delta_snapshot_retention_period() -> Duration {
    Duration::from_secs(0)
}

/// Garbage collection policy selector
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub enum RetentionPolicyConfig {
    /// Retain one chain per exponentially widening age window
    Exponential,
    /// Retain a fixed number of the most recent chains
    LimitBased,
}

impl std::fmt::Display for RetentionPolicyConfig {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            RetentionPolicyConfig::Exponential => write!(f, "Exponential"),
            RetentionPolicyConfig::LimitBased => write!(f, "LimitBased"),
        }
    }
}

/// Effective retention policy, resolved by `SnapshotterConfig::validate`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Retain one chain per exponentially widening age window
    Exponential,
    /// Retain the given number of most recent chains
    LimitBased(usize),
}

/// Snapshotter configuration error, reported before any component starts
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigValidateError {
    /// The full snapshot schedule does not parse as a cron expression
    #[error("invalid full snapshot schedule {0}: {1}")]
    InvalidSchedule(String, #[source] cron::error::Error),
    /// The limit based policy requires a positive backup count
    #[error("max backups should be greater than zero for garbage collection policy set to limit based")]
    InvalidMaxBackups,
    /// The backup count does not fit the platform integer range
    #[error("max backups {0} is greater than {1}")]
    MaxBackupsOutOfRange(u64, usize),
}

/// Snapshotter configuration object
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Getters)]
pub struct SnapshotterConfig {
    /// Cron schedule for full snapshots
    #[getset(get = "pub")]
    #[serde(default = "default_full_snapshot_schedule")]
    full_snapshot_schedule: String,
    /// Minimum wall-clock interval between delta snapshots
    #[getset(get = "pub")]
    #[serde(with = "duration_format", default = "default_delta_snapshot_period")]
    delta_snapshot_period: Duration,
    /// Accumulated bytes that force an out-of-schedule delta snapshot
    #[serde(default = "default_delta_snapshot_memory_limit")]
    delta_snapshot_memory_limit: i64,
    /// Garbage collection policy
    #[getset(get = "pub")]
    #[serde(default = "default_retention_policy")]
    garbage_collection_policy: RetentionPolicyConfig,
    /// Period for garbage collecting old backups
    #[getset(get = "pub")]
    #[serde(with = "duration_format", default = "default_garbage_collection_period")]
    garbage_collection_period: Duration,
    /// Maximum number of chains kept by the limit based policy
    #[getset(get = "pub")]
    #[serde(default = "default_max_backups")]
    max_backups: u64,
    /// Delta snapshots younger than this are never garbage collected
    #[getset(get = "pub")]
    #[serde(
        with = "duration_format",
        default = "default_delta_snapshot_retention_period"
    )]
    delta_snapshot_retention_period: Duration,
}

impl Default for SnapshotterConfig {
    #[inline]
    fn default() -> Self {
        Self {
            full_snapshot_schedule: default_full_snapshot_schedule(),
            delta_snapshot_period: default_delta_snapshot_period(),
            delta_snapshot_memory_limit: default_delta_snapshot_memory_limit(),
            garbage_collection_policy: default_retention_policy(),
            garbage_collection_period: default_garbage_collection_period(),
            max_backups: default_max_backups(),
            delta_snapshot_retention_period: default_delta_snapshot_retention_period(),
        }
    }
}

impl SnapshotterConfig {
    /// Validates the config and normalizes out-of-range soft fields
    ///
    /// # Errors
    ///
    /// Return `ConfigValidateError` when the schedule does not parse, or when
    /// `max_backups` is zero under the limit based policy or exceeds the
    /// platform integer range
    #[inline]
    pub fn validate(&mut self) -> Result<(), ConfigValidateError> {
        if let Err(e) = cron::Schedule::from_str(&self.full_snapshot_schedule) {
            return Err(ConfigValidateError::InvalidSchedule(
                self.full_snapshot_schedule.clone(),
                e,
            ));
        }
        if self.garbage_collection_policy == RetentionPolicyConfig::LimitBased
            && self.max_backups == 0
        {
            return Err(ConfigValidateError::InvalidMaxBackups);
        }
        if usize::try_from(self.max_backups).is_err() {
            return Err(ConfigValidateError::MaxBackupsOutOfRange(
                self.max_backups,
                usize::MAX,
            ));
        }

        if self.delta_snapshot_period < DELTA_SNAPSHOT_PERIOD_THRESHOLD {
            info!(
                "Found delta snapshot period {:?} less than 1 second. Disabling delta snapshotting.",
                self.delta_snapshot_period
            );
        }

        if self.delta_snapshot_memory_limit < 1 {
            info!(
                "Found delta snapshot memory limit {} bytes less than 1 byte. Setting it to default: {}",
                self.delta_snapshot_memory_limit, DEFAULT_DELTA_SNAPSHOT_MEMORY_LIMIT
            );
            self.delta_snapshot_memory_limit = DEFAULT_DELTA_SNAPSHOT_MEMORY_LIMIT;
        }
        Ok(())
    }

    /// Whether delta snapshotting is enabled at all
    #[must_use]
    #[inline]
    pub fn delta_snapshotting_enabled(&self) -> bool {
        self.delta_snapshot_period >= DELTA_SNAPSHOT_PERIOD_THRESHOLD
    }

    /// Effective delta snapshot memory limit in bytes
    ///
    /// Non-positive configured values resolve to the default without error.
    #[must_use]
    #[inline]
    pub fn memory_limit_bytes(&self) -> u64 {
        u64::try_from(self.delta_snapshot_memory_limit)
            .unwrap_or_else(|_| u64::try_from(DEFAULT_DELTA_SNAPSHOT_MEMORY_LIMIT).unwrap_or(0))
    }

    /// Effective retention policy after validation
    #[must_use]
    #[inline]
    pub fn retention_policy(&self) -> RetentionPolicy {
        match self.garbage_collection_policy {
            RetentionPolicyConfig::Exponential => RetentionPolicy::Exponential,
            RetentionPolicyConfig::LimitBased => {
                RetentionPolicy::LimitBased(usize::try_from(self.max_backups).unwrap_or(usize::MAX))
            }
        }
    }

    /// Generates a new `SnapshotterConfig` object
    #[must_use]
    #[inline]
    pub fn new(
        full_snapshot_schedule: String,
        delta_snapshot_period: Duration,
        delta_snapshot_memory_limit: i64,
        garbage_collection_policy: RetentionPolicyConfig,
        garbage_collection_period: Duration,
        max_backups: u64,
        delta_snapshot_retention_period: Duration,
    ) -> Self {
        Self {
            full_snapshot_schedule,
            delta_snapshot_period,
            delta_snapshot_memory_limit,
            garbage_collection_policy,
            garbage_collection_period,
            max_backups,
            delta_snapshot_retention_period,
        }
    }
}
