use mediarun_av::ToolSettings;
use mediarun_jobs::JobSettings;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// The ffmpeg binary and its run limits.
    #[serde(default)]
    pub tool: ToolSettings,

    /// Job retention and subscriber buffering.
    #[serde(default)]
    pub jobs: JobSettings,
}
