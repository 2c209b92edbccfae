//! Ready-made command specs for common jobs.
//!
//! These are plain argument recipes. All of them pass `-hide_banner -v error`
//! so stderr only carries diagnostics worth surfacing on failure.

use std::fmt;
use std::str::FromStr;

use crate::command::CommandSpec;
use crate::Error;

/// Default CRF when the caller passes 0.
pub const DEFAULT_CRF: u32 = 23;
/// Default x264 preset when the caller passes an empty string.
pub const DEFAULT_PRESET: &str = "medium";
/// Default AAC bitrate when the caller passes an empty string.
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";

fn base() -> CommandSpec {
    let mut cmd = CommandSpec::new();
    cmd.hide_banner().log_level("error");
    cmd
}

/// Transcode to MP4 with H.264 video and AAC audio, `+faststart`.
pub fn transcode_mp4_h264_aac(input: &str, output: &str, crf: u32, preset: &str) -> CommandSpec {
    let crf = if crf == 0 { DEFAULT_CRF } else { crf };
    let preset = if preset.is_empty() { DEFAULT_PRESET } else { preset };

    let mut cmd = base();
    cmd.input(input)
        .video_codec("libx264")
        .audio_codec("aac")
        .crf(crf)
        .preset(preset)
        .movflags_faststart()
        .output(output);
    cmd
}

/// Change container without re-encoding.
pub fn remux(input: &str, output: &str) -> CommandSpec {
    let mut cmd = base();
    cmd.input(input).copy_video().copy_audio().output(output);
    cmd
}

/// Extract the audio as AAC.
pub fn extract_aac(input: &str, output: &str, bitrate: &str) -> CommandSpec {
    let bitrate = if bitrate.is_empty() {
        DEFAULT_AUDIO_BITRATE
    } else {
        bitrate
    };

    let mut cmd = base();
    cmd.input(input)
        .no_video()
        .audio_codec("aac")
        .audio_bitrate(bitrate)
        .output(output);
    cmd
}

/// Grab a single frame at `at_seconds`.
///
/// The seek goes before `-i`: fast, but snapped to the nearest keyframe.
pub fn snapshot(input: &str, output: &str, at_seconds: f64) -> CommandSpec {
    let mut cmd = base();
    cmd.start_at(at_seconds.max(0.0))
        .input(input)
        .frames(1)
        .output(output);
    cmd
}

/// Knobs a [`Preset`] may use. Zero and empty values fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresetOptions {
    pub crf: u32,
    pub preset: String,
    pub audio_bitrate: String,
    pub at_seconds: f64,
}

/// A named recipe, selectable by string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preset {
    #[default]
    TranscodeMp4,
    Remux,
    ExtractAac,
    Snapshot,
}

impl Preset {
    pub const ALL: [Preset; 4] = [
        Preset::TranscodeMp4,
        Preset::Remux,
        Preset::ExtractAac,
        Preset::Snapshot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::TranscodeMp4 => "transcode",
            Preset::Remux => "remux",
            Preset::ExtractAac => "extract_aac",
            Preset::Snapshot => "snapshot",
        }
    }

    /// Output name offered when the caller does not choose one.
    pub fn default_output_name(&self) -> &'static str {
        match self {
            Preset::TranscodeMp4 | Preset::Remux => "out.mp4",
            Preset::ExtractAac => "out.aac",
            Preset::Snapshot => "shot.jpg",
        }
    }

    pub fn build(&self, input: &str, output: &str, opts: &PresetOptions) -> CommandSpec {
        match self {
            Preset::TranscodeMp4 => transcode_mp4_h264_aac(input, output, opts.crf, &opts.preset),
            Preset::Remux => remux(input, output),
            Preset::ExtractAac => extract_aac(input, output, &opts.audio_bitrate),
            Preset::Snapshot => snapshot(input, output, opts.at_seconds),
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "transcode" | "transcode_mp4" => Ok(Preset::TranscodeMp4),
            "remux" => Ok(Preset::Remux),
            "extract_aac" => Ok(Preset::ExtractAac),
            "snapshot" => Ok(Preset::Snapshot),
            other => Err(Error::InvalidCommand(format!("unknown preset: {other}"))),
        }
    }
}
