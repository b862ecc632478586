//! Child process execution behind the [`ProcessRunner`] seam.
//!
//! git, the validation command and the PR tool all run through this trait so
//! the pipeline, pruner and guard can be driven by scripted runners in tests.
//! There are no timeouts: every child runs to completion or failure.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

use tracing::{debug, error, instrument, warn};

use crate::core::types::ProcessOutput;
use crate::error::{GateError, GateResult};

pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

/// How a child's stdout/stderr are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Captured (bounded) and returned in [`ProcessOutput`].
    Capture,
    /// Inherited from the parent so the user sees it live; nothing is captured.
    Passthrough,
}

/// A command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    pub output: OutputMode,
}

impl CommandSpec {
    pub fn new<I, S>(program: &str, args: I, workdir: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            workdir: workdir.into(),
            output: OutputMode::Capture,
        }
    }

    /// Run `script` through `sh -c`.
    pub fn shell(script: &str, workdir: impl Into<PathBuf>) -> Self {
        Self::new("sh", ["-c", script], workdir)
    }

    pub fn passthrough(mut self) -> Self {
        self.output = OutputMode::Passthrough;
        self
    }

    /// Human-readable command line used in logs and error messages.
    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Abstraction over process execution.
pub trait ProcessRunner {
    /// Run the command to completion.
    ///
    /// A nonzero exit is reported through [`ProcessOutput::exit_code`], not as an
    /// error. Errors are reserved for failing to start the process at all.
    fn run(&self, spec: &CommandSpec) -> GateResult<ProcessOutput>;
}

/// Runner that spawns real processes.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    output_limit_bytes: usize,
}

impl SystemRunner {
    pub fn new(output_limit_bytes: usize) -> Self {
        Self { output_limit_bytes }
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_LIMIT_BYTES)
    }
}

impl ProcessRunner for SystemRunner {
    #[instrument(skip_all, fields(command = %spec.display()))]
    fn run(&self, spec: &CommandSpec) -> GateResult<ProcessOutput> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.workdir)
            .stdin(Stdio::null());

        match spec.output {
            OutputMode::Passthrough => {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
                debug!("spawning child process (passthrough)");
                let status = cmd.status().map_err(|err| spawn_error(spec, &err))?;
                debug!(exit_code = ?status.code(), "command finished");
                Ok(ProcessOutput {
                    exit_code: status.code(),
                    stdout: String::new(),
                    stderr: String::new(),
                })
            }
            OutputMode::Capture => run_captured(cmd, spec, self.output_limit_bytes),
        }
    }
}

/// Capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs; bytes beyond
/// `output_limit_bytes` are drained and discarded.
fn run_captured(
    mut cmd: Command,
    spec: &CommandSpec,
    output_limit_bytes: usize,
) -> GateResult<ProcessOutput> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = cmd.spawn().map_err(|err| spawn_error(spec, &err))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_handle = thread::spawn(move || read_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_limited(stderr, output_limit_bytes));

    let status = child.wait().map_err(|err| spawn_error(spec, &err))?;

    let (stdout, stdout_truncated) = join_output(stdout_handle);
    let (stderr, stderr_truncated) = join_output(stderr_handle);
    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), "command finished");
    Ok(ProcessOutput {
        exit_code: status.code(),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

fn spawn_error(spec: &CommandSpec, err: &std::io::Error) -> GateError {
    error!(err = %err, "failed to run command");
    GateError::ExternalTool {
        command: spec.display(),
        code: None,
        stderr: err.to_string(),
    }
}

fn join_output(handle: thread::JoinHandle<(Vec<u8>, usize)>) -> (Vec<u8>, usize) {
    match handle.join() {
        Ok(result) => result,
        Err(_) => {
            warn!("output reader thread panicked");
            (Vec::new(), 0)
        }
    }
}

fn read_limited<R: Read>(reader: Option<R>, limit: usize) -> (Vec<u8>, usize) {
    let Some(mut reader) = reader else {
        return (Vec::new(), 0);
    };
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(err = %err, "read child output");
                break;
            }
        };
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    (buf, truncated)
}
