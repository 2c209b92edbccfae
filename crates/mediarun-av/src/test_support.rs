//! Fake tool scripts for unit tests.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Write an executable script named `name` into `dir`.
pub(crate) fn write_script(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// A stand-in ffmpeg that answers `-version` and otherwise runs `body`.
pub(crate) fn fake_tool(dir: &Path, body: &str) -> PathBuf {
    write_script(
        dir,
        "ffmpeg",
        &format!(
            "#!/bin/sh\n\
             if [ \"$1\" = \"-version\" ]; then\n  \
               echo 'ffmpeg version 9.9-fake Copyright (c) the test suite'\n  \
               exit 0\n\
             fi\n\
             {body}\n"
        ),
    )
}
