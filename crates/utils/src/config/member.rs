use std::time::Duration;

use getset::Getters;
use serde::Deserialize;

use super::duration_format;

/// default membership reconcile period
#[must_use]
#[inline]
pub const fn default_reconcile_period() -> Duration {
    Duration::from_secs(30)
}

/// default grace period before an unhealthy member becomes removable
#[must_use]
#[inline]
pub const fn default_unhealthy_grace_period() -> Duration {
    Duration::from_secs(300)
}

/// Member control configuration object
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Getters)]
pub struct MemberControlConfig {
    /// Period between membership reconciliations
    #[getset(get = "pub")]
    #[serde(with = "duration_format", default = "default_reconcile_period")]
    reconcile_period: Duration,
    /// How long a member must stay unhealthy before removal is considered
    #[getset(get = "pub")]
    #[serde(with = "duration_format", default = "default_unhealthy_grace_period")]
    unhealthy_grace_period: Duration,
    /// Names of the members the cluster is expected to contain
    #[getset(get = "pub")]
    #[serde(default)]
    expected_members: Vec<String>,
}

impl Default for MemberControlConfig {
    #[inline]
    fn default() -> Self {
        Self {
            reconcile_period: default_reconcile_period(),
            unhealthy_grace_period: default_unhealthy_grace_period(),
            expected_members: Vec::new(),
        }
    }
}

impl MemberControlConfig {
    /// Generates a new `MemberControlConfig` object
    #[must_use]
    #[inline]
    pub fn new(
        reconcile_period: Duration,
        unhealthy_grace_period: Duration,
        expected_members: Vec<String>,
    ) -> Self {
        Self {
            reconcile_period,
            unhealthy_grace_period,
            expected_members,
        }
    }
}
