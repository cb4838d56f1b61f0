//! Command execution utilities

use crate::utils::error::{BootSetupError, Result};
use std::cell::RefCell;
use std::io::Read;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn command_line(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

fn spawn_error(program: &str, e: std::io::Error) -> BootSetupError {
    if e.kind() == std::io::ErrorKind::NotFound {
        BootSetupError::CommandNotFound(program.to_string())
    } else {
        BootSetupError::Io(e)
    }
}

/// Read a child pipe to the end on its own thread so the child never blocks
/// on a full pipe while we poll it.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// Wait for the child until `limit` elapses. Returns `None` (after killing
/// the child) on expiry.
fn wait_with_deadline(child: &mut Child, limit: Duration) -> Result<Option<ExitStatus>> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() >= limit {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Execute a command and return the output
pub fn run_command(program: &str, args: &[&str]) -> Result<Output> {
    run_command_with_timeout(program, args, None)
}

/// Execute a command, killing it if it runs longer than `timeout`.
///
/// The child gets its own process group, so a terminal Ctrl-C reaches only
/// bootsetup and a boot loader tool is never cut off mid-write.
pub fn run_command_with_timeout(
    program: &str,
    args: &[&str],
    timeout: Option<Duration>,
) -> Result<Output> {
    let line = command_line(program, args);
    debug!("Running: {}", line);

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = match timeout {
        Some(limit) => match wait_with_deadline(&mut child, limit)? {
            Some(status) => status,
            None => {
                // Reader threads are left detached: grandchildren may still
                // hold the pipes open.
                warn!("Command timed out after {}s: {}", limit.as_secs(), line);
                return Err(BootSetupError::CommandTimeout {
                    command: line,
                    seconds: limit.as_secs(),
                });
            }
        },
        None => child.wait()?,
    };

    let output = Output {
        status,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        warn!("Command failed: {}\n  stderr: {}", line, stderr.trim());
        return Err(BootSetupError::CommandFailed {
            command: line,
            stderr,
        });
    }

    Ok(output)
}

/// Execute a command and return stdout as string
pub fn run_command_output(program: &str, args: &[&str]) -> Result<String> {
    let output = run_command(program, args)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Execute a command, allowing it to fail (returns None on failure)
pub fn run_command_optional(program: &str, args: &[&str]) -> Option<String> {
    run_command_output(program, args).ok()
}

/// Check if a command exists in PATH
pub fn command_exists(program: &str) -> bool {
    Command::new("which")
        .arg(program)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Run a program attached to the current terminal (e.g. a text editor).
/// It stays in the foreground process group to keep terminal access.
pub fn run_interactive(program: &str, args: &[&str]) -> Result<()> {
    let line = command_line(program, args);
    debug!("Running interactively: {}", line);

    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|e| spawn_error(program, e))?;

    if !status.success() {
        return Err(BootSetupError::CommandFailed {
            command: line,
            stderr: format!("exited with {}", status),
        });
    }
    Ok(())
}

/// Log a command that would be run (for dry-run mode)
fn log_dry_run(line: &str) {
    info!("[dry-run] {}", line);
}

fn basename(token: &str) -> &str {
    Path::new(token)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(token)
}

/// Wrapper for privileged command execution that respects dry-run mode.
///
/// Every command line, executed or not, is appended to an in-memory history
/// so callers can inspect exactly what an operation did (or would do).
#[derive(Debug)]
pub struct CommandRunner {
    dry_run: bool,
    timeout: Option<Duration>,
    history: RefCell<Vec<String>>,
    failures: Vec<String>,
}

impl CommandRunner {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            timeout: None,
            history: RefCell::new(Vec::new()),
            failures: Vec::new(),
        }
    }

    /// Kill external tools that run longer than `timeout`. A zero duration
    /// disables the limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = if timeout.is_zero() { None } else { Some(timeout) };
        self
    }

    /// Make every dry-run command mentioning `program` fail.
    #[cfg(test)]
    pub(crate) fn fail_on(mut self, program: &str) -> Self {
        self.failures.push(program.to_string());
        self
    }

    fn simulated_failure(&self, program: &str, args: &[&str]) -> bool {
        std::iter::once(program)
            .chain(args.iter().copied())
            .any(|token| self.failures.iter().any(|f| f == basename(token)))
    }

    pub fn run(&self, program: &str, args: &[&str]) -> Result<()> {
        let line = command_line(program, args);
        self.history.borrow_mut().push(line.clone());

        if self.dry_run {
            log_dry_run(&line);
            if self.simulated_failure(program, args) {
                return Err(BootSetupError::CommandFailed {
                    command: line,
                    stderr: "simulated failure".to_string(),
                });
            }
            return Ok(());
        }

        run_command_with_timeout(program, args, self.timeout).map(|_| ())
    }

    /// Run a program with `root` as its filesystem root. A root of `/` runs
    /// the program directly.
    pub fn run_in_chroot(&self, root: &Path, program: &str, args: &[&str]) -> Result<()> {
        if root == Path::new("/") {
            return self.run(program, args);
        }
        let root = root.to_string_lossy();
        let mut chroot_args = vec![root.as_ref(), program];
        chroot_args.extend_from_slice(args);
        self.run("chroot", &chroot_args)
    }

    /// Command lines issued so far, in order.
    pub fn history(&self) -> Vec<String> {
        self.history.borrow().clone()
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}
