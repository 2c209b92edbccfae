//! Supervision of a single tool run.
//!
//! [`supervise`] spawns the process with both output streams piped and drives
//! three futures inside one `tokio::join!`: the wait, the stderr drain and the
//! stdout drain. Both pipes are read from the moment the process starts, so a
//! chatty process can never block on a full pipe, and nothing outlives the
//! call: the function returns only after all three futures have completed.
//!
//! A descendant of the tool can inherit the pipes and keep them open after
//! the tool itself is gone. On Unix the tool leads its own process group and
//! a kill reaches the whole group. Once the tool has exited the drains get
//! [`DRAIN_GRACE`] to reach EOF; after that they are dropped, which closes our
//! ends of the pipes.

use std::future::Future;
use std::io;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::progress::{Fed, ProgressDecoder, ProgressSnapshot};
use crate::{Error, Result};

/// Flags that make ffmpeg write `key=value` progress to stdout and drop its
/// interactive status line from stderr.
const PROGRESS_FLAGS: [&str; 3] = ["-progress", "pipe:1", "-nostats"];

/// How long the pipe drains may keep reading after the process exited.
pub const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// A fully resolved invocation.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Short tool name for messages.
    pub tool: String,
    /// Resolved executable.
    pub program: PathBuf,
    /// Argument snapshot; never touched by the caller after launch.
    pub args: Vec<String>,
    /// Run deadline; `None` for unbounded.
    pub timeout: Option<Duration>,
    /// Bytes of stderr tail kept for diagnostics.
    pub stderr_limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Cancelled,
    Deadline,
}

struct Exit {
    status: io::Result<ExitStatus>,
    stopped: Option<Stop>,
}

/// Execute `request`, forwarding decoded progress to `sink`.
///
/// With a sink, progress flags are appended to the arguments and stdout is
/// decoded line by line; every folded line produces one snapshot for the
/// sink. The sink returning [`ControlFlow::Break`] cancels the run, as does
/// cancelling `cancel`. Without a sink stdout is discarded.
///
/// Outcome, highest priority first:
/// 1. deadline expired: [`Error::Timeout`]
/// 2. cancelled and the process did not exit cleanly: [`Error::Aborted`]
/// 3. non-zero exit: [`Error::ProcessFailed`]
/// 4. other wait failure: [`Error::Exec`]
/// 5. success with the last snapshot (default when there was no sink)
///
/// A cancellation that loses the race against a clean exit is a success.
pub async fn supervise<F>(
    request: RunRequest,
    sink: Option<F>,
    cancel: &CancellationToken,
) -> Result<ProgressSnapshot>
where
    F: FnMut(&ProgressSnapshot) -> ControlFlow<()> + Send,
{
    let RunRequest {
        tool,
        program,
        mut args,
        timeout,
        stderr_limit,
    } = request;

    if args.is_empty() {
        return Err(Error::InvalidCommand("empty argument list".into()));
    }

    let mut sink = sink;
    if sink.is_some() {
        args.extend(PROGRESS_FLAGS.iter().map(|s| s.to_string()));
    }

    let scope = cancel.child_token();
    tracing::debug!(tool = %tool, args = ?args, "Launching");

    let mut command = Command::new(&program);
    command
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command
        .spawn()
        .map_err(|e| Error::launch_failed(&tool, format!("{}: {e}", program.display())))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::launch_failed(&tool, "stdout pipe unavailable"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::launch_failed(&tool, "stderr pipe unavailable"))?;

    let started = Instant::now();
    let exited = CancellationToken::new();
    let mut stderr_tail = Vec::new();
    let mut decoder = ProgressDecoder::new();
    let (exit, (), ()) = tokio::join!(
        async {
            let exit = wait_for_exit(&mut child, &scope, timeout).await;
            exited.cancel();
            exit
        },
        within_grace(drain_tail(stderr, &mut stderr_tail, stderr_limit), &exited, "stderr"),
        within_grace(
            drain_stdout(stdout, sink.as_mut(), &mut decoder, &scope),
            &exited,
            "stdout"
        ),
    );
    let stderr = tail_to_string(&stderr_tail, stderr_limit);
    let snapshot = decoder.into_snapshot();

    tracing::debug!(
        tool = %tool,
        elapsed_ms = started.elapsed().as_millis() as u64,
        status = ?exit.status,
        stopped = ?exit.stopped,
        "Run finished"
    );

    classify(tool, timeout, exit, stderr, snapshot)
}

/// Map a finished run to its outcome, in the priority documented on
/// [`supervise`].
fn classify(
    tool: String,
    timeout: Option<Duration>,
    exit: Exit,
    stderr: String,
    snapshot: ProgressSnapshot,
) -> Result<ProgressSnapshot> {
    if exit.stopped == Some(Stop::Deadline) {
        return Err(Error::Timeout {
            tool,
            after: timeout.unwrap_or_default(),
            stderr,
        });
    }

    match exit.status {
        Ok(status) if status.success() => Ok(snapshot),
        Ok(_) if exit.stopped == Some(Stop::Cancelled) => Err(Error::Aborted { tool, stderr }),
        Ok(status) => Err(Error::ProcessFailed {
            tool,
            status: status.to_string(),
            stderr,
        }),
        Err(e) => Err(Error::Exec {
            tool,
            message: e.to_string(),
            stderr,
        }),
    }
}

async fn wait_for_exit(
    child: &mut Child,
    scope: &CancellationToken,
    timeout: Option<Duration>,
) -> Exit {
    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        status = child.wait() => Exit { status, stopped: None },
        _ = scope.cancelled() => Exit {
            status: kill_and_reap(child).await,
            stopped: Some(Stop::Cancelled),
        },
        _ = deadline => Exit {
            status: kill_and_reap(child).await,
            stopped: Some(Stop::Deadline),
        },
    }
}

/// Kill the child's process group and the child itself, then collect
/// whatever status the child actually ended with. A child that had already
/// exited keeps its own status.
async fn kill_and_reap(child: &mut Child) -> io::Result<ExitStatus> {
    // An unreaped child keeps its pid, so the group id cannot have been reused.
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            tracing::debug!("killpg failed (group likely gone): {e}");
        }
    }
    if let Err(e) = child.start_kill() {
        tracing::debug!("kill failed (process likely gone): {e}");
    }
    child.wait().await
}

/// Run `drain` until it finishes, or until [`DRAIN_GRACE`] after `exited`
/// fires. Dropping an unfinished drain closes its pipe.
async fn within_grace<F>(drain: F, exited: &CancellationToken, pipe: &str)
where
    F: Future<Output = ()>,
{
    tokio::pin!(drain);
    tokio::select! {
        () = &mut drain => return,
        () = exited.cancelled() => {}
    }
    if tokio::time::timeout(DRAIN_GRACE, drain).await.is_err() {
        tracing::debug!(pipe, "Pipe still open after exit, closing it");
    }
}

/// Read `reader` to EOF, keeping only the last `limit` bytes in `tail`.
async fn drain_tail<R: AsyncRead + Unpin>(mut reader: R, tail: &mut Vec<u8>, limit: usize) {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > limit {
                    let excess = tail.len() - limit;
                    tail.drain(..excess);
                }
            }
            Err(e) => {
                tracing::debug!("stderr read ended: {e}");
                break;
            }
        }
    }
}

/// Decode stdout into `decoder`, handing each folded snapshot to `sink`.
async fn drain_stdout<R, F>(
    mut reader: R,
    sink: Option<&mut F>,
    decoder: &mut ProgressDecoder,
    scope: &CancellationToken,
) where
    R: AsyncRead + Unpin,
    F: FnMut(&ProgressSnapshot) -> ControlFlow<()>,
{
    let Some(sink) = sink else {
        if let Err(e) = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await {
            tracing::debug!("stdout read ended: {e}");
        }
        return;
    };

    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("stdout read ended: {e}");
                break;
            }
        }

        match decoder.feed(&String::from_utf8_lossy(&line)) {
            Fed::Ignored => continue,
            Fed::Finished => break,
            Fed::Folded => {}
        }

        if sink(decoder.snapshot()).is_break() {
            tracing::debug!("Progress sink requested abort");
            scope.cancel();
            break;
        }
        if decoder.is_finished() {
            break;
        }
    }

    // Keep the pipe open until EOF so a tool still writing after the final
    // block is not killed by SIGPIPE.
    if let Err(e) = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await {
        tracing::debug!("stdout read ended: {e}");
    }
}

/// Lossy, trimmed UTF-8 view of the last `limit` bytes of `data`, starting on a
/// character boundary.
pub(crate) fn tail_to_string(data: &[u8], limit: usize) -> String {
    let keep_from = data.len().saturating_sub(limit);
    // Skip UTF-8 continuation bytes (0b10xx_xxxx) so we never split a character.
    let start = (keep_from..data.len())
        .find(|&i| (data[i] as i8) >= -64)
        .unwrap_or(data.len());
    String::from_utf8_lossy(&data[start..]).trim().to_string()
}
