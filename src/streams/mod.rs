//! Track selection on the planning side

use serde::{Deserialize, Serialize};

pub mod mapper;

pub use mapper::StreamMapper;

/// Tracks of one media type chosen for export
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedTracks {
    /// Source stream indices, in source order
    pub indices: Vec<usize>,
    /// Every track of the type was requested
    pub wildcard: bool,
    /// A single-track request named an index that is not a track of this type
    pub missing: Option<usize>,
}

impl SelectedTracks {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Selections a UI would start from, derived from track dispositions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialSelection {
    pub audio: Option<usize>,
    pub subtitle: Option<usize>,
}
