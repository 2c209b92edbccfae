//! Human-readable rendering of job events for the terminal.

use mediarun_jobs::{DonePayload, EventKind, JobEvent, ProgressPayload};

/// One line describing `event`.
pub fn human_line(event: &JobEvent) -> String {
    match event.kind {
        EventKind::Status => format!("status: {}", event.data),
        EventKind::Progress => match serde_json::from_str::<ProgressPayload>(&event.data) {
            Ok(p) => format!(
                "frame={} fps={:.1} time={} bitrate={} speed={}",
                p.frame,
                p.fps,
                format_micros(p.out_time_ms),
                dash_if_empty(&p.bitrate),
                dash_if_empty(&p.speed),
            ),
            Err(_) => format!("progress: {}", event.data),
        },
        EventKind::Done => match serde_json::from_str::<DonePayload>(&event.data) {
            Ok(d) => format!("done: {} ({})", d.name, d.download),
            Err(_) => format!("done: {}", event.data),
        },
        EventKind::Error => format!("error: {}", event.data),
    }
}

/// `HH:MM:SS.mmm`; negative values clamp to zero.
pub fn format_micros(micros: i64) -> String {
    let total_ms = micros.max(0) / 1000;
    let (secs, ms) = (total_ms / 1000, total_ms % 1000);
    format!("{:02}:{:02}:{:02}.{:03}", secs / 3600, (secs / 60) % 60, secs % 60, ms)
}

fn dash_if_empty(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}
