//! Child process helpers.
//!
//! `run_command` is the evaluator runner: bounded in time and optionally in
//! memory, reporting only the last line of output. `run_tool` wraps the
//! external CLIs we drive (git, docker, kubectl, gcloud).

use crate::core::error::HiveError;
use regex::Regex;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::sync::LazyLock;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);
/// How long pipes may stay open after the child exits at its deadline.
const PIPE_GRACE: Duration = Duration::from_millis(100);

/// Flags whose following argument is a credential.
const SECRET_FLAGS: &[&str] = &["--token", "--password"];

static URL_CREDENTIALS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"://([^/@\s:]+):[^/@\s]+@").unwrap());

/// Captured result of a bounded run.
#[derive(Debug, Clone)]
pub struct Captured {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Run a command with a timeout and return the last line of its output.
pub fn run_command(
    argv: &[String],
    cwd: &Path,
    timeout: Duration,
    memory_limit_mb: Option<u64>,
) -> Result<String, HiveError> {
    let captured = run_bounded(argv, cwd, timeout, memory_limit_mb)?;

    if let Some(sig) = terminating_signal(&captured.status) {
        return Err(HiveError::ExecutionError(signal_description(sig)));
    }
    if !captured.status.success() {
        return Err(HiveError::ExecutionError(format!(
            "Error: {}",
            captured.stderr
        )));
    }
    Ok(last_line(&captured.stdout))
}

/// Spawn `argv` in its own process group, drain both pipes and wait up to
/// `timeout`.
///
/// On timeout the whole group is killed, so helpers forked by the command
/// do not outlive it or keep its pipes open.
pub fn run_bounded(
    argv: &[String],
    cwd: &Path,
    timeout: Duration,
    memory_limit_mb: Option<u64>,
) -> Result<Captured, HiveError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| HiveError::ValidationError("empty command".to_string()))?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    own_process_group(&mut cmd);
    if let Some(limit) = memory_limit_mb {
        apply_memory_limit(&mut cmd, limit);
    }

    let mut child = cmd
        .spawn()
        .map_err(|err| spawn_error(err, memory_limit_mb))?;
    let deadline = Instant::now().checked_add(timeout);

    let stdout_reader = drain(child.stdout.take());
    let stderr_reader = drain(child.stderr.take());

    let Some(status) = wait_until(&mut child, deadline)? else {
        return Err(timed_out());
    };

    // A descendant that inherited the pipes can hold them open after the
    // child itself has exited.
    let drain_deadline = deadline.and_then(|d| d.max(Instant::now()).checked_add(PIPE_GRACE));
    let stdout = collect(stdout_reader, drain_deadline);
    let stderr = collect(stderr_reader, drain_deadline);
    match (stdout, stderr) {
        (Some(stdout), Some(stderr)) => Ok(Captured {
            status,
            stdout,
            stderr,
        }),
        _ => {
            kill_tree(&mut child);
            Err(timed_out())
        }
    }
}

fn timed_out() -> HiveError {
    HiveError::ExecutionError("Timeout".to_string())
}

/// Returns `None` when the child was killed at `deadline`.
fn wait_until(child: &mut Child, deadline: Option<Instant>) -> Result<Option<ExitStatus>, HiveError> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            kill_tree(child);
            let _ = child.wait();
            return Ok(None);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn drain<R: Read + Send + 'static>(stream: Option<R>) -> Option<Receiver<String>> {
    stream.map(|mut stream| {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let text = match stream.read_to_end(&mut buf) {
                Ok(_) => String::from_utf8_lossy(&buf).into_owned(),
                Err(err) => format!("[Error reading stream] {}", err),
            };
            let _ = tx.send(text);
        });
        rx
    })
}

/// `None` when the stream is still open at `deadline`.
fn collect(reader: Option<Receiver<String>>, deadline: Option<Instant>) -> Option<String> {
    let Some(reader) = reader else {
        return Some(String::new());
    };
    let received = match deadline {
        Some(deadline) => reader.recv_timeout(deadline.saturating_duration_since(Instant::now())),
        None => reader.recv().map_err(|_| RecvTimeoutError::Disconnected),
    };
    match received {
        Ok(text) => Some(text),
        Err(RecvTimeoutError::Disconnected) => Some(String::new()),
        Err(RecvTimeoutError::Timeout) => None,
    }
}

#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

/// SIGKILL the child's process group, falling back to the child alone.
#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    let killed = match libc::pid_t::try_from(child.id()) {
        // SAFETY: `killpg` has no memory effects; the group id is our
        // child's pid, which leads the group it was spawned into.
        Ok(pgid) => unsafe { libc::killpg(pgid, libc::SIGKILL) == 0 },
        Err(_) => false,
    };
    if !killed {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
}

/// A spawn failure while a memory limit is requested means the limit could
/// not be installed.
fn spawn_error(err: std::io::Error, memory_limit_mb: Option<u64>) -> HiveError {
    if memory_limit_mb.is_some() && is_limit_failure(&err) {
        tracing::error!(error = %err, "failed to apply memory limit");
        return HiveError::MemoryLimitExceeded;
    }
    HiveError::IoError(err)
}

#[cfg(unix)]
fn is_limit_failure(err: &std::io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EINVAL | libc::EPERM | libc::ENOMEM)
    )
}

#[cfg(not(unix))]
fn is_limit_failure(_err: &std::io::Error) -> bool {
    false
}

pub fn last_line(output: &str) -> String {
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
        .to_string()
}

#[cfg(unix)]
fn apply_memory_limit(cmd: &mut Command, limit_mb: u64) {
    use std::os::unix::process::CommandExt;

    let bytes = limit_mb.saturating_mul(1024 * 1024) as libc::rlim_t;
    // SAFETY: the closure runs between fork and exec and only calls the
    // async-signal-safe `setrlimit`.
    unsafe {
        cmd.pre_exec(move || {
            let limit = libc::rlimit {
                rlim_cur: bytes,
                rlim_max: bytes,
            };
            if libc::setrlimit(libc::RLIMIT_AS, &limit) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn apply_memory_limit(_cmd: &mut Command, limit_mb: u64) {
    tracing::warn!(limit_mb, "memory limits are only enforced on unix");
}

#[cfg(unix)]
fn terminating_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn terminating_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Convert a signal number to a human readable termination message.
pub fn signal_description(sig: i32) -> String {
    format!(
        "Terminated by signal {} ({}): {}",
        sig,
        signal_name(sig),
        signal_text(sig)
    )
}

#[cfg(unix)]
fn signal_name(sig: i32) -> &'static str {
    match sig {
        libc::SIGHUP => "SIGHUP",
        libc::SIGINT => "SIGINT",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGILL => "SIGILL",
        libc::SIGTRAP => "SIGTRAP",
        libc::SIGABRT => "SIGABRT",
        libc::SIGBUS => "SIGBUS",
        libc::SIGFPE => "SIGFPE",
        libc::SIGKILL => "SIGKILL",
        libc::SIGUSR1 => "SIGUSR1",
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGUSR2 => "SIGUSR2",
        libc::SIGPIPE => "SIGPIPE",
        libc::SIGALRM => "SIGALRM",
        libc::SIGTERM => "SIGTERM",
        libc::SIGCHLD => "SIGCHLD",
        libc::SIGCONT => "SIGCONT",
        libc::SIGSTOP => "SIGSTOP",
        libc::SIGTSTP => "SIGTSTP",
        libc::SIGTTIN => "SIGTTIN",
        libc::SIGTTOU => "SIGTTOU",
        libc::SIGURG => "SIGURG",
        libc::SIGXCPU => "SIGXCPU",
        libc::SIGXFSZ => "SIGXFSZ",
        libc::SIGVTALRM => "SIGVTALRM",
        libc::SIGPROF => "SIGPROF",
        libc::SIGWINCH => "SIGWINCH",
        libc::SIGIO => "SIGIO",
        libc::SIGSYS => "SIGSYS",
        #[cfg(any(target_os = "linux", target_os = "android"))]
        libc::SIGPWR => "SIGPWR",
        _ => "UNKNOWN",
    }
}

#[cfg(not(unix))]
fn signal_name(_sig: i32) -> &'static str {
    "UNKNOWN"
}

#[cfg(unix)]
fn signal_text(sig: i32) -> String {
    // SAFETY: `strsignal` returns null or a NUL-terminated string that
    // stays valid until the next call on this thread; it is copied at once.
    unsafe {
        let ptr = libc::strsignal(sig);
        if ptr.is_null() {
            "Unknown signal".to_string()
        } else {
            std::ffi::CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    }
}

#[cfg(not(unix))]
fn signal_text(_sig: i32) -> String {
    "Unknown signal".to_string()
}

pub fn command_exists(cmd: &str) -> bool {
    Command::new(cmd)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Run an external tool to completion; non-zero exit is an error carrying stderr.
pub fn run_tool(program: &str, args: &[String], cwd: Option<&Path>) -> Result<Output, HiveError> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    tracing::debug!(command = %render_command(program, args), "running");
    let output = cmd.output().map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            HiveError::NotFound(format!("'{}' is not installed or not on PATH", program))
        } else {
            HiveError::IoError(err)
        }
    })?;
    if !output.status.success() {
        return Err(HiveError::tool(
            program,
            format!(
                "{} (exit {:?})",
                String::from_utf8_lossy(&output.stderr).trim(),
                output.status.code()
            ),
        ));
    }
    Ok(output)
}

/// `run_tool` returning trimmed stdout.
pub fn tool_output(program: &str, args: &[String], cwd: Option<&Path>) -> Result<String, HiveError> {
    let output = run_tool(program, args, cwd)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Run a tool with inherited stdio (streamed to the terminal).
pub fn run_tool_streamed(program: &str, args: &[String], cwd: Option<&Path>) -> Result<(), HiveError> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let status = cmd.status()?;
    if !status.success() {
        return Err(HiveError::tool(
            program,
            format!("exit {:?}", status.code()),
        ));
    }
    Ok(())
}

/// Fire and forget; output is discarded.
pub fn spawn_detached(program: &str, args: &[String]) -> Result<(), HiveError> {
    Command::new(program)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(())
}

/// Render a command line for logs, masking credentials in URLs and after
/// secret flags.
pub fn render_command(program: &str, args: &[String]) -> String {
    let mut words = vec![program.to_string()];
    let mut mask_next = false;
    for arg in args {
        if mask_next {
            words.push("***".to_string());
            mask_next = false;
            continue;
        }
        mask_next = SECRET_FLAGS.contains(&arg.as_str());
        words.push(redact_arg(arg));
    }
    words.join(" ")
}

fn redact_arg(arg: &str) -> String {
    match arg.split_once('=') {
        Some((flag, _)) if SECRET_FLAGS.contains(&flag) => format!("{}=***", flag),
        _ => URL_CREDENTIALS.replace_all(arg, "://$1:***@").into_owned(),
    }
}
