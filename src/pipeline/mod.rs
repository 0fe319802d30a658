//! Pipeline stages for a feed.
//!
//! - `normalize`: Canonical bytes and fingerprint of a snapshot
//! - `diff`: Compare a fingerprint against the persisted one
//! - `cycle`: Fetch → detect → compose → publish → persist
//! - `scheduler`: Wall-clock grid and adaptive timing around cycles

pub mod cycle;
pub mod diff;
pub mod normalize;
pub mod scheduler;

pub use cycle::{CycleReport, FeedWorker, run_cycle};
pub use diff::{ChangeDetection, ChangeDetector};
pub use normalize::{fingerprint, normalize};
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerState, SchedulePlan, TriggerOutcome};
