// Adapters - External system implementations

pub mod exec_ffmpeg;
#[cfg(feature = "libav")]
pub mod probe_libav;
pub mod synthetic;
pub mod toml_config;
pub mod tracing_log;

// Re-export adapters
pub use exec_ffmpeg::FfmpegBackend;
#[cfg(feature = "libav")]
pub use probe_libav::ProbeLibavAdapter;
pub use synthetic::{SyntheticBackend, SyntheticBehavior};
pub use toml_config::AppConfig;
