//! ClipBridge
//!
//! Export pipeline split across an execution boundary: the planner compiles
//! user-facing export settings into a flat directive sequence, and an isolated
//! execution context parses that sequence back, resolves tracks, validates the
//! plan and runs the conversion while the session watches for stalls.

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod engine;
pub mod error;
pub mod planner;
pub mod ports;
pub mod protocol;
pub mod session;
pub mod streams;

// Re-export commonly used types
pub use domain::errors::DomainError;
pub use domain::model::{ExportSettings, SourceMedia, StreamDescriptor};
pub use error::{ExportError, ExportResult, TrackIssue};
pub use planner::{CompiledPlan, PlanCompiler};
pub use session::{ExportOutcome, ExportSession, SessionConfig};
