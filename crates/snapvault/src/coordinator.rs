//! Wires the sidecar tasks together.
//!
//! The coordinator owns the task manager, spawns the periodic tasks and
//! translates leadership transitions into snapshotter activation. It
//! carries no business logic of its own.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;
use utils::config::SidecarConfig;
use utils::task_manager::tasks::TaskName;
use utils::task_manager::TaskManager;

use crate::datasource::DataSource;
use crate::gc::GarbageCollector;
use crate::member::{ClusterManagement, MemberControl};
use crate::snapshotter::Snapshotter;
use crate::store::SnapStore;

/// Runs the sidecar's tasks and follows the leadership signal
#[derive(Debug)]
pub struct Coordinator<S, D, C> {
    /// Manages task spawn order and shutdown
    task_manager: Arc<TaskManager>,
    /// Snapshot scheduler, activated while this member leads
    snapshotter: Arc<Snapshotter<S, D>>,
    /// Snapshot garbage collector
    gc: Arc<GarbageCollector<S>>,
    /// Membership reconciler
    member_control: Arc<MemberControl<C>>,
}

impl<S, D, C> Coordinator<S, D, C>
where
    S: SnapStore,
    D: DataSource,
    C: ClusterManagement,
{
    /// Builds the sidecar from its configuration and backends
    #[must_use]
    #[inline]
    pub fn new(config: &SidecarConfig, store: Arc<S>, source: Arc<D>, mgmt: Arc<C>) -> Self {
        let snapshotter = Arc::new(Snapshotter::new(
            Arc::clone(&store),
            source,
            config.snapshotter().clone(),
        ));
        let gc = Arc::new(GarbageCollector::new(store, config.snapshotter().clone()));
        let member_control = Arc::new(MemberControl::new(mgmt, config.member_control().clone()));
        Self {
            task_manager: Arc::new(TaskManager::new()),
            snapshotter,
            gc,
            member_control,
        }
    }

    /// The task manager driving the spawned tasks
    #[must_use]
    #[inline]
    pub fn task_manager(&self) -> Arc<TaskManager> {
        Arc::clone(&self.task_manager)
    }

    /// Spawns all sidecar tasks.
    ///
    /// `leadership` is true while this member leads the cluster; the
    /// snapshotter only runs during leadership, the garbage collector
    /// and the membership reconciler run unconditionally.
    #[inline]
    pub fn spawn_tasks(&self, leadership: watch::Receiver<bool>) {
        let snapshotter = Arc::clone(&self.snapshotter);
        self.task_manager
            .spawn(TaskName::LeadershipWatcher, |listener| async move {
                follow_leadership(leadership, &snapshotter, listener).await;
            });
        let snapshotter = Arc::clone(&self.snapshotter);
        self.task_manager
            .spawn(TaskName::Snapshotter, |listener| async move {
                snapshotter.run(listener).await;
            });
        let gc = Arc::clone(&self.gc);
        self.task_manager
            .spawn(TaskName::GarbageCollector, |listener| async move {
                gc.run(listener).await;
            });
        let member_control = Arc::clone(&self.member_control);
        self.task_manager
            .spawn(TaskName::MemberControl, |listener| async move {
                member_control.run(listener).await;
            });
    }

    /// Shuts every task down and waits for them to finish
    #[inline]
    pub async fn shutdown(&self) {
        self.task_manager.shutdown(true).await;
    }
}

/// Forwards leadership transitions to the snapshotter
async fn follow_leadership<S, D>(
    mut leadership: watch::Receiver<bool>,
    snapshotter: &Snapshotter<S, D>,
    listener: utils::task_manager::Listener,
) where
    S: SnapStore,
    D: DataSource,
{
    if *leadership.borrow_and_update() {
        snapshotter.start();
    }
    loop {
        tokio::select! {
            changed = leadership.changed() => {
                if changed.is_err() {
                    info!("leadership signal sender dropped");
                    break;
                }
                if *leadership.borrow_and_update() {
                    snapshotter.start();
                } else {
                    snapshotter.stop();
                }
            }
            () = listener.wait() => break,
        }
    }
    snapshotter.stop();
}
