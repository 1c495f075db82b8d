//! Safe command execution: fast-fail preconditions, then a subprocess in
//! its own process group with a hard deadline.
//!
//! The absurd-command scan detects AI reasoning failure to avoid wasting
//! tokens; it is explicitly not a security sandbox. On Unix the child runs
//! in a new session so the whole process group can be reaped on timeout
//! (SIGTERM, brief delay, SIGKILL). Other platforms fall back to killing
//! the direct child only.

use std::collections::HashSet;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use regex::RegexSet;
use thiserror::Error;
use tracing::{debug, warn};

use evolvai_types::ConstraintViolation;

/// Shell built-ins that never resolve in PATH.
const SHELL_BUILTINS: &[&str] = &["cd", "echo", "export", "set", "pwd", "test", "["];

/// Poll interval while waiting on the child.
const WAIT_POLL: Duration = Duration::from_millis(10);

/// Grace period between SIGTERM and SIGKILL.
const TERM_GRACE: Duration = Duration::from_millis(100);

/// Lines kept at each end of stdout/stderr before eliding the middle.
const OUTPUT_HEAD_TAIL_LINES: usize = 50;

/// Absurd command patterns. Deliberately a small closed set: these detect
/// reasoning collapse, not dangerous commands in general.
const ABSURD_PATTERNS: &[(&str, &str)] = &[
    (
        r"(?i)rm\s+(-rf|--recursive\s+--force)\s+/\s*$",
        "Deleting root directory",
    ),
    (
        r"(?i)rm\s+(-rf|--recursive\s+--force)\s+/\*",
        "Deleting root with wildcard",
    ),
    (r"(?i)mkfs\.", "Formatting filesystem"),
    (r":\(\)\s*\{\s*:\|:&\s*\}\s*;:", "Fork bomb pattern"),
];

#[derive(Debug, Error)]
pub enum ExecError {
    /// A precondition failed: invalid working directory, absurd or empty
    /// command, or a command that does not exist.
    #[error(transparent)]
    Precondition(#[from] ConstraintViolation),
}

/// Outcome of one command execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub precondition_passed: bool,
    pub timeout_occurred: bool,
    pub error_message: Option<String>,
}

/// Execution counters, snapshotted via [`SafeExec::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    /// Calls rejected by the precondition gate.
    pub blocked: u64,
    pub total_duration: Duration,
    pub live_processes: usize,
}

/// Subprocess wrapper with precondition checks and process-group timeouts.
#[derive(Debug)]
pub struct SafeExec {
    working_dir: PathBuf,
    absurd: RegexSet,
    absurd_reasons: Vec<&'static str>,
    live: HashSet<u32>,
    stats: ExecStats,
}

impl SafeExec {
    /// Resolve and validate the working directory.
    pub fn new(working_dir: impl Into<PathBuf>) -> Result<Self, ExecError> {
        let requested = working_dir.into();
        let resolved = requested.canonicalize().map_err(|e| {
            ConstraintViolation::single(
                "working_dir",
                format!(
                    "Invalid working directory: {}\nThis path cannot be resolved: {e}",
                    requested.display()
                ),
            )
        })?;
        if !resolved.is_dir() {
            return Err(ConstraintViolation::single(
                "working_dir",
                format!(
                    "Invalid working directory: {}\nResolved to: {}\nThis is not a directory.",
                    requested.display(),
                    resolved.display()
                ),
            )
            .into());
        }

        let absurd = RegexSet::new(ABSURD_PATTERNS.iter().map(|(p, _)| *p)).map_err(|e| {
            ConstraintViolation::single(
                "absurd_patterns",
                format!("failed to compile absurd-command patterns: {e}"),
            )
        })?;
        let absurd_reasons = ABSURD_PATTERNS.iter().map(|(_, r)| *r).collect();

        Ok(Self {
            working_dir: resolved,
            absurd,
            absurd_reasons,
            live: HashSet::new(),
            stats: ExecStats::default(),
        })
    }

    #[must_use]
    pub fn working_dir(&self) -> &std::path::Path {
        &self.working_dir
    }

    #[must_use]
    pub fn stats(&self) -> ExecStats {
        ExecStats {
            live_processes: self.live.len(),
            ..self.stats
        }
    }

    /// Run `command` through a shell with a hard deadline.
    ///
    /// Precondition failures return `Err`. Everything past the gate,
    /// including spawn errors, non-zero exits and timeouts, comes back as
    /// an [`ExecutionResult`].
    pub fn execute(&mut self, command: &str, timeout: Duration) -> Result<ExecutionResult, ExecError> {
        let start = Instant::now();
        self.stats.total += 1;

        if let Err(violation) = self.check_preconditions(command) {
            self.stats.blocked += 1;
            return Err(violation.into());
        }

        let result = self.spawn_and_wait(command, timeout, start);
        if result.success {
            self.stats.successful += 1;
        } else {
            self.stats.failed += 1;
        }
        self.stats.total_duration += result.duration;
        Ok(result)
    }

    /// Kill any process groups still alive. Called on shutdown.
    pub fn reap_all(&mut self) {
        for pid in self.live.drain() {
            #[cfg(unix)]
            {
                unsafe {
                    let _ = libc::killpg(pid as i32, libc::SIGKILL);
                }
            }
            #[cfg(not(unix))]
            let _ = pid;
        }
    }

    // ── Preconditions ────────────────────────────────────────

    fn check_preconditions(&self, command: &str) -> Result<(), ConstraintViolation> {
        if let Some(idx) = self.absurd.matches(command).iter().next() {
            return Err(ConstraintViolation::single(
                "command",
                format!(
                    "Absurd command detected: {}\nCommand: {command}\n\n\
                     This suggests AI reasoning failure. Please reconsider the task goal.\n\n\
                     Note: this is NOT a security check. In a version-controlled development\n\
                     environment most operations are reversible; this check exists to detect\n\
                     when reasoning has gone off track and avoid wasting tokens.",
                    self.absurd_reasons[idx]
                ),
            ));
        }

        let Some(base_command) = command.split_whitespace().next() else {
            return Err(ConstraintViolation::single(
                "command",
                "Empty command provided. Please specify a command to execute.",
            ));
        };

        let has_shell_plumbing = command.contains('|') || command.contains('>');
        if !SHELL_BUILTINS.contains(&base_command)
            && !has_shell_plumbing
            && which::which(base_command).is_err()
        {
            return Err(ConstraintViolation::single(
                "command",
                format!(
                    "Command not found: {base_command}\nFull command: {command}\n\n\
                     The command '{base_command}' is not available on this system.\n\
                     This check avoids wasting tokens on unavailable commands."
                ),
            ));
        }

        Ok(())
    }

    // ── Execution ────────────────────────────────────────────

    fn spawn_and_wait(&mut self, command: &str, timeout: Duration, start: Instant) -> ExecutionResult {
        let (shell, shell_arg) = platform_shell();
        let mut cmd = Command::new(shell);
        cmd.arg(shell_arg)
            .arg(command)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        put_in_new_process_group(&mut cmd);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecutionResult {
                    success: false,
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: e.to_string(),
                    duration: start.elapsed(),
                    precondition_passed: true,
                    timeout_occurred: false,
                    error_message: Some(e.to_string()),
                };
            }
        };

        let pid = child.id();
        self.live.insert(pid);
        debug!(pid, command, "spawned command in new process group");

        // Drain pipes on background threads so a chatty child never blocks
        // on a full pipe while we poll for exit.
        let stdout_handle = drain_pipe(child.stdout.take());
        let stderr_handle = drain_pipe(child.stderr.take());

        let deadline = start + timeout;
        let outcome = loop {
            match child.try_wait() {
                Ok(Some(status)) => break WaitOutcome::Exited(status.code().unwrap_or(-1)),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        break WaitOutcome::TimedOut;
                    }
                    thread::sleep(WAIT_POLL);
                }
                Err(e) => break WaitOutcome::WaitFailed(e.to_string()),
            }
        };

        match outcome {
            WaitOutcome::TimedOut => {
                kill_process_group(&mut child, pid);
                let _ = child.wait();
            }
            WaitOutcome::Exited(_) | WaitOutcome::WaitFailed(_) => {}
        }
        self.live.remove(&pid);

        let stdout = truncate_output(&join_pipe(stdout_handle));
        let stderr_captured = truncate_output(&join_pipe(stderr_handle));
        let duration = start.elapsed();

        match outcome {
            WaitOutcome::Exited(exit_code) => {
                let success = exit_code == 0;
                ExecutionResult {
                    success,
                    exit_code,
                    stdout,
                    error_message: if success {
                        None
                    } else {
                        Some(stderr_captured.clone())
                    },
                    stderr: stderr_captured,
                    duration,
                    precondition_passed: true,
                    timeout_occurred: false,
                }
            }
            WaitOutcome::TimedOut => {
                let message = format!("Command timed out after {}s", timeout.as_secs_f64());
                warn!(pid, command, "{message}");
                ExecutionResult {
                    success: false,
                    exit_code: -1,
                    stdout,
                    stderr: message.clone(),
                    duration,
                    precondition_passed: true,
                    timeout_occurred: true,
                    error_message: Some(message),
                }
            }
            WaitOutcome::WaitFailed(message) => ExecutionResult {
                success: false,
                exit_code: -1,
                stdout,
                stderr: message.clone(),
                duration,
                precondition_passed: true,
                timeout_occurred: false,
                error_message: Some(message),
            },
        }
    }
}

impl Drop for SafeExec {
    fn drop(&mut self) {
        self.reap_all();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WaitOutcome {
    Exited(i32),
    TimedOut,
    WaitFailed(String),
}

fn drain_pipe<R: Read + Send + 'static>(pipe: Option<R>) -> Option<thread::JoinHandle<Vec<u8>>> {
    pipe.map(|mut reader| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = reader.read_to_end(&mut buf);
            buf
        })
    })
}

fn join_pipe(handle: Option<thread::JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}

/// Clip output to the first and last [`OUTPUT_HEAD_TAIL_LINES`] lines.
fn truncate_output(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let keep = OUTPUT_HEAD_TAIL_LINES;
    if lines.len() <= keep * 2 {
        return text.to_string();
    }
    let elided = lines.len() - keep * 2;
    let mut out = lines[..keep].join("\n");
    out.push_str(&format!("\n... [{elided} lines elided] ...\n"));
    out.push_str(&lines[lines.len() - keep..].join("\n"));
    out.push('\n');
    out
}

#[cfg(unix)]
fn platform_shell() -> (&'static str, &'static str) {
    ("/bin/sh", "-c")
}

#[cfg(windows)]
fn platform_shell() -> (&'static str, &'static str) {
    ("cmd", "/C")
}

/// Put the child in its own session (Unix) so the entire process group can
/// be signalled as a unit.
#[cfg(unix)]
fn put_in_new_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn put_in_new_process_group(_cmd: &mut Command) {}

/// SIGTERM the group, wait briefly, SIGKILL if it still exists.
#[cfg(unix)]
fn kill_process_group(_child: &mut Child, pid: u32) {
    unsafe {
        let _ = libc::killpg(pid as i32, libc::SIGTERM);
        thread::sleep(TERM_GRACE);
        if libc::killpg(pid as i32, 0) == 0 {
            let _ = libc::killpg(pid as i32, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child, _pid: u32) {
    let _ = child.kill();
}
