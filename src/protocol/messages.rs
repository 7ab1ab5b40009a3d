//! Messages crossing the execution boundary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::model::{Container, SubtitleCue};
use crate::error::TrackIssue;

/// Requests accepted by the execution context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerRequest {
    /// Run one conversion
    Transcode {
        job_id: u64,
        /// Source file reference understood by the backend
        input: String,
        /// Wire tokens of the directive sequence
        directives: Vec<String>,
        output_name: String,
        /// Expected clip duration in seconds, used to derive media time
        expected_duration: Option<f64>,
    },
    /// Decode one subtitle track into cues for previewing
    ExtractSubtitles {
        request_id: u64,
        input: String,
        track: usize,
    },
}

/// Events emitted by the execution context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerEvent {
    Started {
        job_id: u64,
    },
    Progress {
        job_id: u64,
        /// Completed share of the job in [0, 1]
        fraction: f64,
        /// Estimated position in the output, in seconds
        media_time: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frames: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fps: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        speed: Option<f64>,
        at: DateTime<Utc>,
    },
    Done {
        job_id: u64,
        output_name: String,
        mime_type: String,
        bytes: Vec<u8>,
    },
    Error {
        job_id: u64,
        message: String,
        /// Populated when the plan failed validation
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        issues: Vec<TrackIssue>,
    },
    SubtitleCues {
        request_id: u64,
        cues: Vec<SubtitleCue>,
    },
    SubtitleError {
        request_id: u64,
        message: String,
    },
}

/// Message sent in reply to a transcode while another is running
pub const BUSY_MESSAGE: &str = "busy";

impl WorkerEvent {
    /// Job the event belongs to; `None` for preview replies
    pub fn job_id(&self) -> Option<u64> {
        match self {
            WorkerEvent::Started { job_id }
            | WorkerEvent::Progress { job_id, .. }
            | WorkerEvent::Done { job_id, .. }
            | WorkerEvent::Error { job_id, .. } => Some(*job_id),
            WorkerEvent::SubtitleCues { .. } | WorkerEvent::SubtitleError { .. } => None,
        }
    }

    /// Whether no further events follow for this job
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerEvent::Done { .. } | WorkerEvent::Error { .. })
    }
}

/// MIME type of an output file, chosen by its extension
pub fn mime_for_output(output_name: &str) -> &'static str {
    Container::from_file_name(output_name)
        .unwrap_or(Container::Mp4)
        .mime_type()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let request = WorkerRequest::Transcode {
            job_id: 3,
            input: "clip.mkv".to_string(),
            directives: vec!["-c:v".to_string(), "copy".to_string()],
            output_name: "clip_export.mp4".to_string(),
            expected_duration: Some(10.0),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["type"], "TRANSCODE");
        assert_eq!(json["directives"][1], "copy");

        let back: WorkerRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_event_job_ids() {
        assert_eq!(WorkerEvent::Started { job_id: 9 }.job_id(), Some(9));
        let cues = WorkerEvent::SubtitleCues {
            request_id: 2,
            cues: vec![],
        };
        assert_eq!(cues.job_id(), None);
        assert!(!cues.is_terminal());
    }

    #[test]
    fn test_mime_table() {
        assert_eq!(mime_for_output("a_export.mov"), "video/quicktime");
        assert_eq!(mime_for_output("a_export.mkv"), "video/x-matroska");
        assert_eq!(mime_for_output("a_export.gif"), "image/gif");
        assert_eq!(mime_for_output("a_export.unknown"), "video/mp4");
    }
}
