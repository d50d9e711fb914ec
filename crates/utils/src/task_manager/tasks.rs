//  LEADERSHIP_WATCHER
//          |
//      SNAPSHOTTER            MEMBER_CONTROL
//          |
//   GARBAGE_COLLECTOR

/// Generate enum with iterator
macro_rules! enum_with_iter {
    ( $($variant:ident),* $(,)? ) => {
        /// Task name
        #[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
        #[non_exhaustive]
        #[allow(missing_docs)]
        pub enum TaskName {
            $($variant),*
        }

        impl TaskName {
            /// Get iter of all task names
            #[inline]
            pub fn iter() -> impl Iterator<Item = TaskName> {
                static VARIANTS: &'static [TaskName] = &[
                    $(TaskName::$variant),*
                ];
                VARIANTS.iter().copied()
            }
        }
    }
}
enum_with_iter! {
    LeadershipWatcher,
    Snapshotter,
    GarbageCollector,
    MemberControl,
}

impl TaskName {
    /// Whether the task can be aborted mid-await without leaving partial work behind
    #[must_use]
    #[inline]
    pub fn cancel_safe(self) -> bool {
        match self {
            TaskName::LeadershipWatcher => true,
            TaskName::Snapshotter | TaskName::GarbageCollector | TaskName::MemberControl => false,
        }
    }
}

/// All edges of task graph, the first item in each pair must be shut down before the second item
pub const ALL_EDGES: [(TaskName, TaskName); 2] = [
    (TaskName::LeadershipWatcher, TaskName::Snapshotter),
    (TaskName::Snapshotter, TaskName::GarbageCollector),
];
