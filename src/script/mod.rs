//! Script layer extraction and the script-stepping mutation tracker
//!
//! This module includes:
//! - ScriptBlock: one script with its cause-to-effects interaction map
//! - ScriptExtractor: the per-frame script store and run ordering
//! - MutationTracker: replays scripts one at a time and attributes structural diffs to them

pub mod block;
pub mod extractor;
pub mod tracker;

pub use block::{Cause, Effect, ScriptBlock, ScriptKind};
pub use extractor::ScriptExtractor;
pub use tracker::{DEFAULT_MAX_STEPS, DEFAULT_SETTLE_INTERVAL, MutationTracker, StepReport, TrackerPhase};
