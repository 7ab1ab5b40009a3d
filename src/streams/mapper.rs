//! Stream mapping utilities

use tracing::debug;

use crate::domain::model::{MediaKind, SourceMedia, TrackExportMode, TrackSelection};
use crate::streams::{InitialSelection, SelectedTracks};

/// Resolves track selections against probed source tracks
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamMapper;

impl StreamMapper {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a selection for one media type
    pub fn select(
        &self,
        source: &SourceMedia,
        selection: &TrackSelection,
        kind: MediaKind,
    ) -> SelectedTracks {
        match selection.mode {
            TrackExportMode::All => SelectedTracks {
                indices: source.streams_of(kind).map(|s| s.index).collect(),
                wildcard: true,
                missing: None,
            },
            TrackExportMode::Single => match selection.selected {
                None => SelectedTracks::default(),
                Some(index) => {
                    let exists = source.streams_of(kind).any(|s| s.index == index);
                    if exists {
                        SelectedTracks {
                            indices: vec![index],
                            wildcard: false,
                            missing: None,
                        }
                    } else {
                        debug!("Selected {:?} track {} not found in source", kind, index);
                        SelectedTracks {
                            indices: vec![],
                            wildcard: false,
                            missing: Some(index),
                        }
                    }
                }
            },
        }
    }

    /// Default audio is the first track flagged default, else the first one;
    /// default subtitle is the first forced track, else none
    pub fn initial_selection(&self, source: &SourceMedia) -> InitialSelection {
        let audio = source
            .streams_of(MediaKind::Audio)
            .find(|s| s.is_default)
            .or_else(|| source.streams_of(MediaKind::Audio).next())
            .map(|s| s.index);

        let subtitle = source
            .streams_of(MediaKind::Subtitle)
            .find(|s| s.is_forced)
            .map(|s| s.index);

        InitialSelection { audio, subtitle }
    }

    /// Track selections matching [`StreamMapper::initial_selection`]
    pub fn initial_track_selections(&self, source: &SourceMedia) -> (TrackSelection, TrackSelection) {
        let initial = self.initial_selection(source);
        let audio = initial
            .audio
            .map(TrackSelection::single)
            .unwrap_or_else(TrackSelection::none);
        let subtitles = initial
            .subtitle
            .map(TrackSelection::single)
            .unwrap_or_else(TrackSelection::none);
        (audio, subtitles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::StreamDescriptor;

    fn source() -> SourceMedia {
        SourceMedia::new(
            "movie.mkv",
            60.0,
            vec![
                StreamDescriptor::video(0, "h264", 1920, 1080, 24.0),
                StreamDescriptor::audio(1, "ac3", 48000, 6).with_language("eng"),
                StreamDescriptor::audio(2, "aac", 48000, 2).as_default(),
                StreamDescriptor::subtitle(3, "subrip"),
                StreamDescriptor::subtitle(4, "ass").as_forced(),
            ],
        )
    }

    #[test]
    fn test_select_all() {
        let selected = StreamMapper::new().select(&source(), &TrackSelection::all(), MediaKind::Audio);
        assert_eq!(selected.indices, vec![1, 2]);
        assert!(selected.wildcard);
    }

    #[test]
    fn test_select_single_and_missing() {
        let mapper = StreamMapper::new();
        let selected = mapper.select(&source(), &TrackSelection::single(3), MediaKind::Subtitle);
        assert_eq!(selected.indices, vec![3]);

        // Index 1 is audio, not a subtitle
        let missing = mapper.select(&source(), &TrackSelection::single(1), MediaKind::Subtitle);
        assert!(missing.is_empty());
        assert_eq!(missing.missing, Some(1));

        let none = mapper.select(&source(), &TrackSelection::none(), MediaKind::Subtitle);
        assert_eq!(none, SelectedTracks::default());
    }

    #[test]
    fn test_initial_selection_uses_dispositions() {
        let mapper = StreamMapper::new();
        let initial = mapper.initial_selection(&source());
        assert_eq!(initial.audio, Some(2));
        assert_eq!(initial.subtitle, Some(4));

        let plain = SourceMedia::new(
            "plain.mp4",
            5.0,
            vec![
                StreamDescriptor::video(0, "h264", 640, 360, 30.0),
                StreamDescriptor::audio(1, "aac", 44100, 2),
                StreamDescriptor::subtitle(2, "mov_text"),
            ],
        );
        let initial = mapper.initial_selection(&plain);
        assert_eq!(initial.audio, Some(1));
        assert_eq!(initial.subtitle, None);
    }
}
