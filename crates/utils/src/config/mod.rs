/// Log configuration module
pub mod log;
/// Member control configuration module
pub mod member;
/// Snapshotter configuration module
pub mod snapshotter;
/// Snapshot store configuration module
pub mod store;

use getset::Getters;
use serde::Deserialize;

pub use self::log::{default_log_level, default_rotation, file_appender, LevelConfig, LogConfig, RotationConfig};
pub use self::member::{
    default_reconcile_period, default_unhealthy_grace_period, MemberControlConfig,
};
pub use self::snapshotter::{
    default_delta_snapshot_memory_limit, default_delta_snapshot_period,
    default_full_snapshot_schedule, default_garbage_collection_period,
    default_delta_snapshot_retention_period, default_max_backups, default_retention_policy,
    ConfigValidateError, RetentionPolicy, RetentionPolicyConfig, SnapshotterConfig,
    DELTA_SNAPSHOT_PERIOD_THRESHOLD,
};
pub use self::store::StoreConfig;

/// Sidecar configuration object
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Getters, Default)]
pub struct SidecarConfig {
    /// snapshotter configuration object
    #[getset(get = "pub")]
    #[serde(default)]
    snapshotter: SnapshotterConfig,
    /// snapshot store configuration object
    #[getset(get = "pub")]
    #[serde(default)]
    store: StoreConfig,
    /// member control configuration object
    #[getset(get = "pub")]
    #[serde(default)]
    member_control: MemberControlConfig,
    /// log configuration object
    #[getset(get = "pub")]
    #[serde(default)]
    log: LogConfig,
}

impl SidecarConfig {
    /// Generates a new `SidecarConfig` object
    #[must_use]
    #[inline]
    pub fn new(
        snapshotter: SnapshotterConfig,
        store: StoreConfig,
        member_control: MemberControlConfig,
        log: LogConfig,
    ) -> Self {
        Self {
            snapshotter,
            store,
            member_control,
            log,
        }
    }
}

/// `Duration` deserialization formatter
pub mod duration_format {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    use crate::parse_duration;

    /// deserializes a duration
    #[allow(single_use_lifetimes)] //  the false positive case blocks us
    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_sidecar_config_should_be_loaded() {
        let config: SidecarConfig = toml::from_str(
            r#"
            [snapshotter]
            full_snapshot_schedule = "0 0 */1 * * *"
            delta_snapshot_period = "20s"
            delta_snapshot_memory_limit = 10485760
            garbage_collection_policy = "LimitBased"
            garbage_collection_period = "1m"
            max_backups = 7
            delta_snapshot_retention_period = "1h"

            [store]
            type = "local"
            dir = "/var/lib/snapvault"

            [member_control]
            reconcile_period = "30s"
            unhealthy_grace_period = "5m"
            expected_members = ["node1", "node2", "node3"]

            [log]
            path = "/var/log/snapvault"
            rotation = "daily"
            level = "info"
            "#,
        )
        .unwrap();

        let snapshotter = config.snapshotter();
        assert_eq!(snapshotter.full_snapshot_schedule(), "0 0 */1 * * *");
        assert_eq!(*snapshotter.delta_snapshot_period(), Duration::from_secs(20));
        assert_eq!(
            *snapshotter.garbage_collection_policy(),
            RetentionPolicyConfig::LimitBased
        );
        assert_eq!(*snapshotter.max_backups(), 7);
        assert_eq!(
            *config.store(),
            StoreConfig::Local(PathBuf::from("/var/lib/snapvault"))
        );
        assert_eq!(
            config.member_control().expected_members(),
            &["node1".to_owned(), "node2".to_owned(), "node3".to_owned()]
        );
        assert_eq!(*config.log().rotation(), RotationConfig::Daily);
    }

    #[test]
    fn test_sidecar_config_defaults() {
        let config: SidecarConfig = toml::from_str("").unwrap();
        let snapshotter = config.snapshotter();
        assert_eq!(
            snapshotter.full_snapshot_schedule(),
            &default_full_snapshot_schedule()
        );
        assert_eq!(
            *snapshotter.garbage_collection_policy(),
            default_retention_policy()
        );
        assert_eq!(*snapshotter.max_backups(), default_max_backups());
        assert_eq!(*config.store(), StoreConfig::default());
        assert!(config.member_control().expected_members().is_empty());
    }
}
