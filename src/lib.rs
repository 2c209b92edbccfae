//! mediarun - supervised ffmpeg jobs with live progress
//!
//! This library crate exposes configuration and event rendering to the
//! binary and the integration tests.

pub mod config;
pub mod render;
