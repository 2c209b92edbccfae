//! Decoder for ffmpeg's `-progress` output.
//!
//! ffmpeg writes newline-delimited `key=value` pairs, grouped into blocks that
//! each end with `progress=continue`; the last block ends with `progress=end`.
//! Reporting is best-effort telemetry: malformed lines are dropped, never
//! surfaced as errors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Typed state of an in-flight run, as last reported by the tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub frame: u64,
    pub fps: f64,
    /// Unit-suffixed, e.g. `"1024.0kbits/s"`.
    pub bitrate: String,
    /// e.g. `"1.02x"`.
    pub speed: String,
    /// Output timestamp in microseconds. ffmpeg calls this `out_time_ms`.
    pub out_time_micros: i64,
    /// Set by `progress=end`.
    pub done: bool,
    /// Keys the decoder does not recognize, kept verbatim.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl ProgressSnapshot {
    /// Fold one pair into the snapshot. Unparsable numbers keep the old value.
    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "frame" => {
                if let Ok(n) = value.parse() {
                    self.frame = n;
                }
            }
            "fps" => {
                if let Ok(f) = value.parse() {
                    self.fps = f;
                }
            }
            "bitrate" => self.bitrate = value.to_string(),
            "speed" => self.speed = value.to_string(),
            "out_time_ms" => {
                if let Ok(n) = value.parse() {
                    self.out_time_micros = n;
                }
            }
            "progress" => self.done = value == "end",
            _ => {
                self.extra.insert(key.to_string(), value.to_string());
            }
        }
    }
}

/// What [`ProgressDecoder::feed`] did with a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fed {
    /// The line was folded into the snapshot.
    Folded,
    /// Blank, no separator, or empty key.
    Ignored,
    /// `progress=end` was already seen; the line was not folded.
    Finished,
}

/// Stateful fold of progress lines into a [`ProgressSnapshot`].
#[derive(Debug, Default)]
pub struct ProgressDecoder {
    snapshot: ProgressSnapshot,
    finished: bool,
}

impl ProgressDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (with or without its trailing newline).
    pub fn feed(&mut self, line: &str) -> Fed {
        if self.finished {
            return Fed::Finished;
        }

        let line = line.trim();
        let Some((key, value)) = line.split_once('=') else {
            return Fed::Ignored;
        };
        if key.is_empty() {
            return Fed::Ignored;
        }

        self.snapshot.apply(key, value);
        if self.snapshot.done {
            self.finished = true;
        }
        Fed::Folded
    }

    /// Whether `progress=end` has been seen. Callers stop reading once this
    /// is true.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn snapshot(&self) -> &ProgressSnapshot {
        &self.snapshot
    }

    pub fn into_snapshot(self) -> ProgressSnapshot {
        self.snapshot
    }
}
