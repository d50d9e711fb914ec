//! snapvault
//!
//! A backup and membership sidecar for etcd-compatible metadata stores. It
//! takes scheduled full and delta snapshots of a data source into a snapshot
//! store, garbage collects old snapshot chains under a retention policy, and
//! reconciles cluster membership against an expected member set.
#![deny(
    missing_docs,
    missing_debug_implementations,
    unreachable_pub,
    unsafe_code,
    unused_qualifications,
    clippy::all,
    clippy::pedantic,

    // The followings are selected restriction lints
    clippy::dbg_macro,
    clippy::else_if_without_else,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::missing_docs_in_private_items,
    clippy::panic,
    clippy::print_stderr,
    clippy::print_stdout,
    clippy::str_to_string,
    clippy::todo,
    clippy::unimplemented,
    clippy::unwrap_used,
    clippy::wildcard_enum_match_arm,
)]
#![allow(
    clippy::multiple_crate_versions, // caused by the dependency, can't be fixed
    clippy::module_name_repetitions,
)]
#![cfg_attr(
    test,
    allow(
        clippy::indexing_slicing,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::arithmetic_side_effects,
        clippy::too_many_lines,
        clippy::default_trait_access,
    )
)]

/// Coordinator wiring the background tasks together
pub mod coordinator;
/// Data source boundary
pub mod datasource;
/// Garbage collector for old snapshot chains
pub mod gc;
/// Member control reconciler
pub mod member;
/// Snapshot metadata and chain model
pub mod snapshot;
/// Snapshot scheduler
pub mod snapshotter;
/// Snapshot store boundary
pub mod store;
/// Tracing subscriber setup
pub mod trace;
