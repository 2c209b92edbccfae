//! # mediarun-jobs
//!
//! Jobs wrap one supervised ffmpeg run each and fan its events out to any
//! number of live subscribers.
//!
//! - [`JobService`] starts jobs, hands out subscriptions and artifacts, and
//!   evicts finished jobs after a retention window.
//! - [`Job`] holds status, diagnostics and the subscriber hub under one lock.
//! - [`Subscription`] is a bounded, lossy-for-slow-readers [`futures::Stream`]
//!   of [`JobEvent`]s that always starts with the current status and always
//!   ends with `done` or `error`.
//! - [`JobEvent::to_sse_frame`] renders the event-stream wire format.

pub mod error;
pub mod event;
mod hub;
pub mod ids;
pub mod job;
pub mod scheduler;
pub mod service;
pub mod status;
pub mod store;

#[cfg(all(test, unix))]
mod test_support;

pub use error::{Error, Result};
pub use event::{DonePayload, EventKind, JobEvent, ProgressPayload};
pub use hub::MIN_SUBSCRIBER_BUFFER;
pub use ids::JobId;
pub use job::{Artifact, Job, Subscription};
pub use scheduler::EvictionScheduler;
pub use service::{sanitize_filename, JobRequest, JobService, JobSettings};
pub use status::JobStatus;
pub use store::JobStore;
