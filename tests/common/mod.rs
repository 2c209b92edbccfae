//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which owns a scratch directory, writes stand-in
//! ffmpeg scripts into it and builds a [`JobService`] or a config file that
//! points at them.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mediarun_av::{ProcessTool, ToolSettings};
use mediarun_jobs::{JobEvent, JobService, JobSettings, Subscription};
use tempfile::TempDir;

/// Script body that reports two progress blocks and then writes `data` to its
/// output, taken as the last argument before `-progress`.
pub const WRITES_OUTPUT: &str = r#"out=""
for a in "$@"; do
  case "$a" in -progress) break ;; esac
  out="$a"
done
echo frame=1
echo fps=10.0
echo out_time_ms=100000
echo speed=1.00x
echo progress=continue
echo frame=10
echo out_time_ms=1000000
echo progress=end
echo data > "$out""#;

pub struct TestHarness {
    pub dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write an executable `ffmpeg` script that answers `-version` and runs
    /// `body` otherwise.
    #[cfg(unix)]
    pub fn fake_ffmpeg(&self, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.path().join("ffmpeg");
        let script = format!(
            "#!/bin/sh\nif [ \"$1\" = \"-version\" ]; then\n  echo 'ffmpeg version 9.9-fake'\n  exit 0\nfi\n{body}\n"
        );
        std::fs::write(&path, script).expect("failed to write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("failed to chmod script");
        path
    }

    /// Job settings that keep artifacts inside the scratch directory.
    pub fn settings(&self) -> JobSettings {
        JobSettings {
            output_dir: Some(self.path().to_path_buf()),
            ..Default::default()
        }
    }

    pub fn service(&self, program: &Path) -> JobService {
        self.service_with(ToolSettings::with_program(program), self.settings())
    }

    pub fn service_with(&self, tool: ToolSettings, jobs: JobSettings) -> JobService {
        JobService::new(Arc::new(ProcessTool::new(tool)), jobs)
    }

    /// Write a config file pointing at `program` and return its path.
    pub fn write_config(&self, program: &Path) -> PathBuf {
        let path = self.path().join("mediarun.toml");
        let content = format!(
            "[tool]\nprogram = {:?}\nhealth_timeout_secs = 5\n\n[jobs]\noutput_dir = {:?}\n",
            program.display().to_string(),
            self.path().display().to_string(),
        );
        std::fs::write(&path, content).expect("failed to write config");
        path
    }
}

/// Drain `sub` to the end, failing the test if it takes longer than 20s.
pub async fn collect(mut sub: Subscription) -> Vec<JobEvent> {
    tokio::time::timeout(Duration::from_secs(20), async move {
        let mut events = Vec::new();
        while let Some(event) = sub.recv().await {
            events.push(event);
        }
        events
    })
    .await
    .expect("event stream did not end")
}
