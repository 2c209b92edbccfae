//! # mediarun-av
//!
//! Supervised execution of ffmpeg for the mediarun job runner.
//!
//! This crate provides:
//!
//! - **Tool readiness** ([`ProcessTool`]) -- resolve the binary on `PATH` and
//!   health-check it once, caching the outcome for every later call.
//! - **Command building** ([`CommandSpec`], [`presets`]) -- ordered argument
//!   lists with typed flag helpers and a few ready-made recipes.
//! - **Progress decoding** ([`ProgressDecoder`]) -- fold ffmpeg's
//!   `-progress` `key=value` lines into a typed [`ProgressSnapshot`].
//! - **Run supervision** ([`supervise`]) -- spawn, drain both pipes
//!   concurrently, forward progress, and map exit, cancellation and deadline
//!   to a single result.

pub mod command;
pub mod error;
pub mod presets;
pub mod progress;
pub mod supervisor;
pub mod tools;

#[cfg(all(test, unix))]
mod test_support;

// ---- Re-exports for convenience ----

pub use command::CommandSpec;
pub use presets::{Preset, PresetOptions};
pub use error::{Error, Result};
pub use progress::{Fed, ProgressDecoder, ProgressSnapshot};
pub use supervisor::{supervise, RunRequest};
pub use tools::{ProcessTool, Readiness, ToolSettings, UNKNOWN_VERSION};
