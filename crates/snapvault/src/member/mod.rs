//! Member control reconciler.
//!
//! Periodically compares the live cluster membership against the
//! expected member names and removes stragglers that stay unhealthy
//! past a grace period. Removal of a voting member is refused whenever
//! it would leave the surviving healthy voters below a majority of the
//! post-removal voting total.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use utils::config::MemberControlConfig;
use utils::task_manager::Listener;

/// Health of a cluster member as last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    /// Member answers health probes
    Healthy,
    /// Member fails health probes
    Unhealthy,
    /// Health could not be determined
    Unknown,
}

/// One member of the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMember {
    /// Unique member id
    pub id: u64,
    /// Human readable member name
    pub name: String,
    /// Peer addresses of the member
    pub peer_urls: Vec<String>,
    /// Whether the member is a non-voting learner
    pub is_learner: bool,
    /// Last observed health
    pub status: MemberStatus,
}

/// Errors from the cluster management endpoint
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MemberControlError {
    /// The management endpoint is unreachable or refused the request
    #[error("cluster management error: {0}")]
    Management(String),
}

/// Interface over the cluster's management endpoint
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterManagement: Send + Sync + 'static {
    /// Lists the current members with their observed health
    async fn list_members(&self) -> Result<Vec<ClusterMember>, MemberControlError>;

    /// Removes a member from the cluster
    async fn remove_member(&self, id: u64) -> Result<(), MemberControlError>;
}

/// Actions taken by one reconcile pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Ids of members removed this pass
    pub removed: Vec<u64>,
    /// Ids whose removal was refused to protect quorum
    pub quorum_skipped: Vec<u64>,
}

/// Membership reconciler
#[derive(Debug)]
pub struct MemberControl<C> {
    /// Cluster management endpoint
    mgmt: std::sync::Arc<C>,
    /// Reconciler configuration
    config: MemberControlConfig,
    /// When each member was first observed unhealthy
    unhealthy_since: Mutex<HashMap<u64, Instant>>,
}

impl<C> MemberControl<C>
where
    C: ClusterManagement,
{
    /// Creates a reconciler over the given management endpoint
    #[must_use]
    #[inline]
    pub fn new(mgmt: std::sync::Arc<C>, config: MemberControlConfig) -> Self {
        Self {
            mgmt,
            config,
            unhealthy_since: Mutex::new(HashMap::new()),
        }
    }

    /// Run loop, spawned as the `MemberControl` task
    #[inline]
    pub async fn run(&self, listener: Listener) {
        loop {
            tokio::select! {
                () = sleep(*self.config.reconcile_period()) => {}
                () = listener.wait() => break,
            }
            match self.reconcile().await {
                Ok(outcome) => {
                    if outcome != ReconcileOutcome::default() {
                        info!(
                            removed = ?outcome.removed,
                            quorum_skipped = ?outcome.quorum_skipped,
                            "membership reconciled"
                        );
                    }
                }
                // snapshotting is unaffected, retry at the next period
                Err(e) => warn!("membership reconcile failed: {e}"),
            }
        }
        debug!("member control run loop exits");
    }

    /// One reconcile pass over the live membership
    #[inline]
    pub async fn reconcile(&self) -> Result<ReconcileOutcome, MemberControlError> {
        let members = self.mgmt.list_members().await?;
        let due = self.track_health(&members);

        let expected: HashSet<&str> = self
            .config
            .expected_members()
            .iter()
            .map(String::as_str)
            .collect();
        let mut voting_total = members.iter().filter(|m| !m.is_learner).count();
        let healthy_voting = members
            .iter()
            .filter(|m| !m.is_learner && m.status == MemberStatus::Healthy)
            .count();

        let mut outcome = ReconcileOutcome::default();
        for member in &members {
            if expected.contains(member.name.as_str()) {
                continue;
            }
            if member.status != MemberStatus::Unhealthy || !due.contains(&member.id) {
                continue;
            }
            if !member.is_learner && !removal_keeps_quorum(healthy_voting, voting_total) {
                warn!(
                    id = member.id,
                    name = %member.name,
                    "removal refused, surviving voters would lose quorum"
                );
                outcome.quorum_skipped.push(member.id);
                continue;
            }
            self.mgmt.remove_member(member.id).await?;
            info!(id = member.id, name = %member.name, "unhealthy member removed");
            if !member.is_learner {
                voting_total = voting_total.saturating_sub(1);
            }
            let _prev = self
                .unhealthy_since
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&member.id);
            // `healthy_voting` is unchanged, the removed member was unhealthy
            outcome.removed.push(member.id);
        }
        Ok(outcome)
    }

    /// Updates the unhealthy timers and returns the ids past the grace period
    fn track_health(&self, members: &[ClusterMember]) -> HashSet<u64> {
        let now = Instant::now();
        let grace = *self.config.unhealthy_grace_period();
        let mut timers = self
            .unhealthy_since
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let live: HashSet<u64> = members.iter().map(|m| m.id).collect();
        timers.retain(|id, _| live.contains(id));

        let mut due = HashSet::new();
        for member in members {
            match member.status {
                MemberStatus::Healthy => {
                    let _prev = timers.remove(&member.id);
                }
                MemberStatus::Unhealthy => {
                    let since = *timers.entry(member.id).or_insert(now);
                    if now.saturating_duration_since(since) >= grace {
                        let _new = due.insert(member.id);
                    }
                }
                // never removed and never accrues unhealthy time
                MemberStatus::Unknown => {}
            }
        }
        due
    }
}

/// Whether the healthy voters still form a majority after one voting
/// member is removed
fn removal_keeps_quorum(healthy_voting: usize, voting_total: usize) -> bool {
    let voting_after = voting_total.saturating_sub(1);
    healthy_voting.wrapping_mul(2) > voting_after
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn member(id: u64, name: &str, is_learner: bool, status: MemberStatus) -> ClusterMember {
        ClusterMember {
            id,
            name: name.to_owned(),
            peer_urls: vec![format!("http://node{id}:2380")],
            is_learner,
            status,
        }
    }

    fn config(expected: &[&str], grace: Duration) -> MemberControlConfig {
        MemberControlConfig::new(
            Duration::from_secs(30),
            grace,
            expected.iter().map(|&s| s.to_owned()).collect(),
        )
    }

    fn control(
        members: Vec<ClusterMember>,
        cfg: MemberControlConfig,
        expect_removed: &[u64],
    ) -> MemberControl<MockClusterManagement> {
        let mut mgmt = MockClusterManagement::new();
        mgmt.expect_list_members()
            .returning(move || Ok(members.clone()));
        for &id in expect_removed {
            mgmt.expect_remove_member()
                .with(mockall::predicate::eq(id))
                .times(1)
                .returning(|_| Ok(()));
        }
        MemberControl::new(Arc::new(mgmt), cfg)
    }

    #[tokio::test(start_paused = true)]
    async fn straggler_is_removed_only_after_the_grace_period() {
        let members = vec![
            member(1, "a", false, MemberStatus::Healthy),
            member(2, "b", false, MemberStatus::Healthy),
            member(3, "ghost", false, MemberStatus::Unhealthy),
        ];
        let ctl = control(members, config(&["a", "b"], Duration::from_secs(300)), &[3]);

        let first = ctl.reconcile().await.unwrap();
        assert!(first.removed.is_empty());
        sleep(Duration::from_secs(301)).await;
        let second = ctl.reconcile().await.unwrap();
        assert_eq!(second.removed, vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn expected_members_are_never_removed() {
        let members = vec![
            member(1, "a", false, MemberStatus::Healthy),
            member(2, "b", false, MemberStatus::Unhealthy),
        ];
        let ctl = control(members, config(&["a", "b"], Duration::ZERO), &[]);
        assert_eq!(ctl.reconcile().await.unwrap(), ReconcileOutcome::default());
    }

    #[tokio::test(start_paused = true)]
    async fn removal_is_refused_when_quorum_would_be_lost() {
        // two of three voters unhealthy, removing one leaves 1 healthy of 2
        let members = vec![
            member(1, "a", false, MemberStatus::Healthy),
            member(2, "b", false, MemberStatus::Unhealthy),
            member(3, "ghost", false, MemberStatus::Unhealthy),
        ];
        let ctl = control(members, config(&["a", "b"], Duration::ZERO), &[]);
        let outcome = ctl.reconcile().await.unwrap();
        assert!(outcome.removed.is_empty());
        assert_eq!(outcome.quorum_skipped, vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn learners_bypass_the_quorum_check() {
        let members = vec![
            member(1, "a", false, MemberStatus::Healthy),
            member(2, "b", false, MemberStatus::Unhealthy),
            member(3, "ghost", true, MemberStatus::Unhealthy),
        ];
        let ctl = control(members, config(&["a", "b"], Duration::ZERO), &[3]);
        let outcome = ctl.reconcile().await.unwrap();
        assert_eq!(outcome.removed, vec![3]);
        assert!(outcome.quorum_skipped.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_health_is_never_removed() {
        let members = vec![
            member(1, "a", false, MemberStatus::Healthy),
            member(2, "ghost", false, MemberStatus::Unknown),
        ];
        let ctl = control(members, config(&["a"], Duration::ZERO), &[]);
        assert_eq!(ctl.reconcile().await.unwrap(), ReconcileOutcome::default());
        sleep(Duration::from_secs(3600)).await;
        assert_eq!(ctl.reconcile().await.unwrap(), ReconcileOutcome::default());
    }

    #[tokio::test(start_paused = true)]
    async fn a_recovery_restarts_the_grace_clock() {
        let grace = Duration::from_secs(300);
        let cfg = config(&["a"], grace);
        let mut mgmt = MockClusterManagement::new();
        let mut statuses = vec![
            MemberStatus::Unhealthy,
            MemberStatus::Healthy,
            MemberStatus::Unhealthy,
        ]
        .into_iter();
        mgmt.expect_list_members().returning(move || {
            let status = statuses.next().unwrap_or(MemberStatus::Unhealthy);
            Ok(vec![
                member(1, "a", false, MemberStatus::Healthy),
                member(2, "ghost", false, status),
            ])
        });
        mgmt.expect_remove_member().times(0);
        let ctl = MemberControl::new(Arc::new(mgmt), cfg);

        let _first = ctl.reconcile().await.unwrap();
        sleep(Duration::from_secs(200)).await;
        // recovery wipes the timer
        let _second = ctl.reconcile().await.unwrap();
        sleep(Duration::from_secs(200)).await;
        // unhealthy again, 200s on the new clock is inside the grace
        let third = ctl.reconcile().await.unwrap();
        assert!(third.removed.is_empty());
    }
}
