//! Integration tests for job event delivery and event-stream framing.

use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use mediarun_av::ProgressSnapshot;
use mediarun_jobs::{Artifact, DonePayload, EventKind, Job, JobEvent, JobId, JobStatus};
use tokio_util::sync::CancellationToken;

fn job(buffer: usize) -> Arc<Job> {
    Arc::new(Job::new(
        JobId::new(),
        "testsrc",
        Artifact {
            path: PathBuf::from("/tmp/mediarun-events-test.mp4"),
            display_name: "clip.mp4".into(),
        },
        buffer,
        CancellationToken::new(),
    ))
}

fn frame(n: u64) -> ProgressSnapshot {
    ProgressSnapshot {
        frame: n,
        ..Default::default()
    }
}

#[tokio::test]
async fn slow_reader_never_blocks_producer() {
    let job = job(16);
    job.mark_running().unwrap();

    let slow = job.subscribe();
    let fast = job.subscribe();

    let fast_reader = tokio::spawn(fast.collect::<Vec<JobEvent>>());

    for i in 0..100 {
        job.publish_progress(&frame(i));
        // Give the fast reader a chance to keep up.
        tokio::task::yield_now().await;
    }
    job.finish_done(&DonePayload {
        download: "/jobs/x/artifact".into(),
        name: "clip.mp4".into(),
    })
    .unwrap();

    let fast_events = fast_reader.await.unwrap();
    let slow_events: Vec<JobEvent> = slow.collect().await;

    let progress = |events: &[JobEvent]| {
        events
            .iter()
            .filter(|e| e.kind == EventKind::Progress)
            .count()
    };
    assert_eq!(progress(&fast_events), 100);
    assert!(progress(&slow_events) <= 16);
    assert_eq!(slow_events.last().map(|e| e.kind), Some(EventKind::Done));
    assert_eq!(fast_events.last().map(|e| e.kind), Some(EventKind::Done));
}

#[tokio::test]
async fn sse_frames_concatenate_into_one_stream() {
    let job = job(32);
    let sub = job.subscribe();
    job.mark_running().unwrap();
    job.publish_progress(&frame(1));
    job.finish_error("line one\nline two").unwrap();

    let body: String = sub.map(|e| e.to_sse_frame()).collect::<Vec<_>>().await.concat();
    let frames: Vec<&str> = body.split_terminator("\n\n").collect();
    assert_eq!(frames.len(), 5);
    assert_eq!(frames[0], "event: status\ndata: created");
    assert_eq!(frames[1], "event: status\ndata: running");
    assert!(frames[2].starts_with("event: progress\ndata: {\"frame\":1"));
    assert_eq!(frames[3], "event: status\ndata: error");
    assert_eq!(frames[4], "event: error\ndata: line one\\nline two");
    assert!(frames.iter().all(|f| f.lines().count() == 2));
}

#[tokio::test]
async fn statuses_never_go_backwards() {
    let job = job(16);
    let subs: Vec<_> = (0..4).map(|_| job.subscribe()).collect();

    job.mark_running().unwrap();
    for i in 0..50 {
        job.publish_progress(&frame(i));
    }
    job.finish_done(&DonePayload {
        download: "/jobs/x/artifact".into(),
        name: "clip.mp4".into(),
    })
    .unwrap();

    for sub in subs {
        let events: Vec<JobEvent> = sub.collect().await;
        let ranks: Vec<u8> = events
            .iter()
            .filter(|e| e.kind == EventKind::Status)
            .map(|e| match e.data.as_str() {
                "created" => JobStatus::Created.rank(),
                "running" => JobStatus::Running.rank(),
                _ => JobStatus::Done.rank(),
            })
            .collect();
        assert!(ranks.windows(2).all(|w| w[0] < w[1]), "{ranks:?}");
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }
}
