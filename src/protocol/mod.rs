//! Wire protocol between the planning side and the execution context

pub mod directive;
pub mod messages;

pub use directive::{Bitrate, CodecValue, Directive, DirectiveSequence, MapTarget};
pub use messages::{WorkerEvent, WorkerRequest};
