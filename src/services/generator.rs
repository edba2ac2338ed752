//! Invokes the external knowledge-graph generator as a subprocess.
//!
//! The generator is treated as an opaque function of `(input, output)`: it is
//! spawned with an explicit argument vector (never through a shell), must exit
//! with status 0, and must leave a readable UTF-8 file at the output path.

use crate::models::generation::GeneratedArtifact;
use std::{
    ffi::OsString,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    process::Stdio,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::{fs, process::Command};
use tracing::{debug, info, warn};

/// Captured stderr is truncated to this many bytes before being surfaced.
const MAX_DIAGNOSTIC_BYTES: usize = 4096;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("generation timed out after {} seconds", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("generator exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("failed to start generator `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("generator produced no output")]
    MissingOutput(PathBuf),
    #[error("generator output is not valid UTF-8")]
    InvalidOutput(PathBuf),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type GeneratorResult<T> = Result<T, GeneratorError>;

/// Builds and runs generator invocations.
#[derive(Clone, Debug)]
pub struct GeneratorInvoker {
    /// Executable to run (looked up on `PATH` if not absolute).
    program: OsString,

    /// Arguments placed before the input and output paths.
    args: Vec<OsString>,
}

impl GeneratorInvoker {
    pub fn new<I, A>(program: impl Into<OsString>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    fn command(&self, input: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(input)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so helpers it spawns can be killed with it.
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    /// Run the generator on `input`, writing to `output`, within `timeout`.
    ///
    /// On timeout the child is killed and any partial output is removed; the
    /// caller never sees a half-written artifact.
    pub async fn invoke(
        &self,
        input: &Path,
        output: &Path,
        timeout: Duration,
    ) -> GeneratorResult<GeneratedArtifact> {
        let started = Instant::now();
        let child = self.command(input, output).spawn().map_err(|source| {
            GeneratorError::Spawn {
                program: self.program.to_string_lossy().into_owned(),
                source,
            }
        })?;

        let pid = child.id();
        debug!(
            pid = ?pid,
            program = %self.program.to_string_lossy(),
            input = %input.display(),
            output = %output.display(),
            "generator spawned"
        );

        // Dropping the wait future on timeout drops the child, which kills it.
        let outcome = tokio::time::timeout(timeout, child.wait_with_output()).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let output_status = match outcome {
            Ok(Ok(out)) => out,
            Ok(Err(err)) => {
                kill_process_group(pid);
                discard_partial(output).await;
                return Err(GeneratorError::Io(err));
            }
            Err(_) => {
                warn!(
                    elapsed_ms,
                    timeout_secs = timeout.as_secs_f64(),
                    "generator timed out, process killed"
                );
                kill_process_group(pid);
                discard_partial(output).await;
                return Err(GeneratorError::Timeout(timeout));
            }
        };

        if !output_status.status.success() {
            kill_process_group(pid);
            discard_partial(output).await;
            let stderr = diagnostic_text(&output_status.stderr);
            let status = match output_status.status.code() {
                Some(code) => format!("exit code {code}"),
                None => "termination by signal".to_string(),
            };
            warn!(elapsed_ms, %status, stderr = %stderr, "generator failed");
            return Err(GeneratorError::Failed { status, stderr });
        }

        let bytes = match fs::read(output).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(GeneratorError::MissingOutput(output.to_path_buf()));
            }
            Err(err) => return Err(GeneratorError::Io(err)),
        };
        let content = String::from_utf8(bytes)
            .map_err(|_| GeneratorError::InvalidOutput(output.to_path_buf()))?;

        info!(
            elapsed_ms,
            output_bytes = content.len(),
            "generator finished"
        );

        Ok(GeneratedArtifact {
            path: output.to_path_buf(),
            content,
        })
    }
}

/// SIGKILL every process left in the generator's group.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::{
        errno::Errno,
        sys::signal::{Signal, killpg},
        unistd::Pid,
    };

    let Some(pid) = pid else { return };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => debug!("could not kill generator process group {pid}: {err}"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Remove whatever a failed or killed run left behind.
async fn discard_partial(path: &Path) {
    match fs::remove_file(path).await {
        Ok(_) => debug!("removed partial output {}", path.display()),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => debug!("could not remove partial output {}: {}", path.display(), err),
    }
}

/// Lossy, trimmed and bounded rendering of captured stderr.
fn diagnostic_text(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    if text.len() <= MAX_DIAGNOSTIC_BYTES {
        return text.to_string();
    }
    let mut cut = MAX_DIAGNOSTIC_BYTES;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}... [truncated]", &text[..cut])
}
