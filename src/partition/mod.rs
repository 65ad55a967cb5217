//! Partition rollover: plan the next time bucket, add it if it is missing.

pub mod applier;
pub mod planner;

pub use applier::PartitionOutcome;
pub use planner::{Granularity, PartitionPlan, plan};
