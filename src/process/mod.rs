//! Process inspection and control.
//!
//! - [`liveness`] decides whether a recorded owner of shared state still
//!   exists, which is what makes stale claims reclaimable.
//! - [`tree`] snapshots the host's process table and delivers graduated
//!   termination to a process and all of its descendants. It is the only
//!   place in the crate that sends termination signals.

pub mod liveness;
pub mod tree;

pub use liveness::{OwnerIdentity, is_alive, process_start_time};
pub use tree::{ProcessEntry, ProcessTable, TerminationReport, terminate};
