//! Argument builder for ffmpeg invocations.

/// An ordered ffmpeg argument list.
///
/// Every typed mutator appends a flag together with its value, so the
/// resulting vector is always a complete invocation. [`CommandSpec::arg`] and
/// [`CommandSpec::args`] are the escape hatch for anything not covered here.
///
/// # Example
///
/// ```
/// use mediarun_av::CommandSpec;
///
/// let mut cmd = CommandSpec::new();
/// cmd.hide_banner()
///     .input("in.mkv")
///     .video_codec("libx264")
///     .crf(23)
///     .output("out.mp4");
/// assert_eq!(
///     cmd.to_args(),
///     ["-y", "-hide_banner", "-i", "in.mkv", "-c:v", "libx264", "-crf", "23", "out.mp4"]
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    args: Vec<String>,
}

impl Default for CommandSpec {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandSpec {
    /// Create a command that overwrites its output (`-y`), so ffmpeg never
    /// stops to ask on an existing file.
    pub fn new() -> Self {
        Self {
            args: vec!["-y".to_string()],
        }
    }

    /// Create a command from a raw argument list, without the default `-y`.
    pub fn from_args(iter: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            args: iter.into_iter().map(Into::into).collect(),
        }
    }

    /// Borrow the current arguments.
    pub fn args_slice(&self) -> &[String] {
        &self.args
    }

    /// Owned copy of the current arguments.
    pub fn to_args(&self) -> Vec<String> {
        self.args.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    fn flag(&mut self, flag: &str, value: impl Into<String>) -> &mut Self {
        self.args.push(flag.to_string());
        self.args.push(value.into());
        self
    }

    pub fn hide_banner(&mut self) -> &mut Self {
        self.arg("-hide_banner")
    }

    /// Set the log level (`quiet`, `error`, `warning`, `info`, ...).
    pub fn log_level(&mut self, level: &str) -> &mut Self {
        self.flag("-v", level)
    }

    pub fn input(&mut self, path: impl Into<String>) -> &mut Self {
        self.flag("-i", path)
    }

    /// Append a positional output path.
    pub fn output(&mut self, path: impl Into<String>) -> &mut Self {
        self.arg(path)
    }

    /// Choose between overwriting (`-y`) and refusing to overwrite (`-n`) an
    /// existing output. Any previous choice is replaced.
    pub fn overwrite(&mut self, on: bool) -> &mut Self {
        let keep = if on { "-y" } else { "-n" };
        self.args.retain(|a| a != "-y" && a != "-n");
        self.args.insert(0, keep.to_string());
        self
    }

    pub fn video_codec(&mut self, codec: &str) -> &mut Self {
        self.flag("-c:v", codec)
    }

    pub fn audio_codec(&mut self, codec: &str) -> &mut Self {
        self.flag("-c:a", codec)
    }

    pub fn copy_video(&mut self) -> &mut Self {
        self.video_codec("copy")
    }

    pub fn copy_audio(&mut self) -> &mut Self {
        self.audio_codec("copy")
    }

    /// Drop all video streams from the output (`-vn`).
    pub fn no_video(&mut self) -> &mut Self {
        self.arg("-vn")
    }

    pub fn crf(&mut self, crf: u32) -> &mut Self {
        self.flag("-crf", crf.to_string())
    }

    pub fn preset(&mut self, preset: &str) -> &mut Self {
        self.flag("-preset", preset)
    }

    pub fn tune(&mut self, tune: &str) -> &mut Self {
        self.flag("-tune", tune)
    }

    /// Target video bitrate, unit-suffixed (e.g. `"5M"`).
    pub fn video_bitrate(&mut self, bitrate: &str) -> &mut Self {
        self.flag("-b:v", bitrate)
    }

    /// Target audio bitrate, unit-suffixed (e.g. `"128k"`).
    pub fn audio_bitrate(&mut self, bitrate: &str) -> &mut Self {
        self.flag("-b:a", bitrate)
    }

    /// Move the moov atom to the front for progressive download.
    pub fn movflags_faststart(&mut self) -> &mut Self {
        self.flag("-movflags", "+faststart")
    }

    /// Select a stream, e.g. `"0:v:0"` or `"0:a?"`.
    pub fn map(&mut self, spec: &str) -> &mut Self {
        self.flag("-map", spec)
    }

    /// Add a video filter. Filters accumulate into a single `-vf` chain.
    pub fn filter(&mut self, filter: &str) -> &mut Self {
        if let Some(pos) = self.args.iter().position(|a| a == "-vf") {
            if let Some(chain) = self.args.get_mut(pos + 1) {
                chain.push(',');
                chain.push_str(filter);
                return self;
            }
        }
        self.flag("-vf", filter)
    }

    pub fn scale(&mut self, width: i32, height: i32) -> &mut Self {
        self.filter(&format!("scale={width}:{height}"))
    }

    /// Output frame rate, e.g. `"30"` or `"30000/1001"`.
    pub fn frame_rate(&mut self, fps: &str) -> &mut Self {
        self.flag("-r", fps)
    }

    /// Seek to `seconds`. Placed wherever the call happens in the chain, so
    /// call it before [`CommandSpec::input`] for a fast input seek.
    pub fn start_at(&mut self, seconds: f64) -> &mut Self {
        self.flag("-ss", trim_float(seconds))
    }

    /// Stop after `n` video frames.
    pub fn frames(&mut self, n: u32) -> &mut Self {
        self.flag("-frames:v", n.to_string())
    }
}

/// Format with at most three decimals and no trailing zeros.
fn trim_float(f: f64) -> String {
    let s = format!("{f:.3}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}
