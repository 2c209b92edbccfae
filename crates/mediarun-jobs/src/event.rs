//! Events delivered to job subscribers, and their event-stream framing.

use std::fmt;

use mediarun_av::ProgressSnapshot;
use serde::{Deserialize, Serialize};

use crate::status::JobStatus;

/// Name of a job event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Payload is the new status name.
    Status,
    /// Payload is a [`ProgressPayload`] as JSON.
    Progress,
    /// Payload is a [`DonePayload`] as JSON. Terminal.
    Done,
    /// Payload is the diagnostic text. Terminal.
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Status => "status",
            EventKind::Progress => "progress",
            EventKind::Done => "done",
            EventKind::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Done | EventKind::Error)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress fields forwarded to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub frame: u64,
    pub fps: f64,
    pub bitrate: String,
    pub speed: String,
    /// Microseconds, under ffmpeg's own key name.
    pub out_time_ms: i64,
}

impl From<&ProgressSnapshot> for ProgressPayload {
    fn from(p: &ProgressSnapshot) -> Self {
        Self {
            frame: p.frame,
            fps: p.fps,
            bitrate: p.bitrate.clone(),
            speed: p.speed.clone(),
            out_time_ms: p.out_time_micros,
        }
    }
}

/// Where to fetch a finished job's artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonePayload {
    /// Download reference, e.g. `/jobs/<id>/artifact`.
    pub download: String,
    /// Suggested file name.
    pub name: String,
}

/// A named event with a string payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEvent {
    pub kind: EventKind,
    pub data: String,
}

impl JobEvent {
    pub fn new(kind: EventKind, data: impl Into<String>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }

    pub fn status(status: JobStatus) -> Self {
        Self::new(EventKind::Status, status.as_str())
    }

    pub fn progress(snapshot: &ProgressSnapshot) -> Self {
        Self::new(EventKind::Progress, to_json(&ProgressPayload::from(snapshot)))
    }

    pub fn done(payload: &DonePayload) -> Self {
        Self::new(EventKind::Done, to_json(payload))
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(EventKind::Error, text)
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    /// Render as one event-stream frame.
    ///
    /// Carriage returns are removed and each newline in the payload becomes
    /// the two characters `\n`, so a payload always fits on one `data:` line.
    pub fn to_sse_frame(&self) -> String {
        let data = self.data.replace('\r', "").replace('\n', "\\n");
        format!("event: {}\ndata: {}\n\n", self.kind, data)
    }
}

// Flat structs of numbers and strings always serialize.
fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}
