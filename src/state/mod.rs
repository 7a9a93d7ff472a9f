//! State module for tracking pipeline progress
//!
//! # Components
//!
//! - `StageState`: the lifecycle of one pipeline stage (idle, running, draining, done)
//! - `StageTracker`: a shared, forward-only holder of a stage's state that the
//!   coordinator can await

mod stage_state;
mod tracker;

// Re-export main types
pub use stage_state::StageState;
pub use tracker::StageTracker;
