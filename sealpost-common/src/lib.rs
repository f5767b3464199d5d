//! Shared building blocks for the sealpost workspace: logging, audit events,
//! the shutdown signal and the ambient-state requirements that gate jobs.

pub mod audit;
pub mod logging;
pub mod requirement;

pub use requirement::{RequirementKind, SystemSnapshot, SystemState, all_satisfied};
pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
