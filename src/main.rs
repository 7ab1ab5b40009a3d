//! ClipBridge command-line entry point
//!
//! ```bash
//! clipbridge compile --input talk.mp4 --start 00:01:00 --end 00:02:00 --tokens
//! clipbridge check --streams talk.streams.json --container webm
//! clipbridge export --input talk.mp4 --preset web --output clip.mp4
//! ```

use anyhow::Result;
use clap::Parser;

use clipbridge::cli::{self, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli::run(cli).await
}
