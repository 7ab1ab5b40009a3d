//! Execution side: directive parsing, frame filtering, GIF encoding and job control

pub mod controller;
pub mod filter;
pub mod gif_writer;
pub mod parser;
pub mod progress;
pub mod worker;

pub use controller::{ConversionJob, ExecutionController, JobState, TrackDecision};
pub use gif_writer::GifWriter;
pub use parser::{DirectiveParser, ParsedSettings};
pub use progress::{ProgressCallback, ProgressTracker, ProgressUpdate};
pub use worker::{ContextHandle, ExecutionContext};
