use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::TransferError;

const WAIT_STEP: Duration = Duration::from_millis(50);
pub const DEFAULT_TICK: Duration = Duration::from_millis(500);

/// A request to run an external executable.
#[derive(Debug, Clone)]
pub struct ProcessInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl ProcessInvocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// The command as a single line, quoting arguments that need it.
    pub fn command_line(&self) -> String {
        let mut line = quote_arg(&self.program.to_string_lossy());
        for arg in &self.args {
            line.push(' ');
            line.push_str(&quote_arg(arg));
        }
        line
    }
}

pub fn quote_arg(arg: &str) -> String {
    let needs_quotes = arg.is_empty() || arg.chars().any(|ch| ch.is_whitespace() || ch == '"');
    if !needs_quotes {
        return arg.to_string();
    }
    format!("\"{}\"", arg.replace('"', "\\\""))
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines().chain(self.stderr.lines())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Receives child output as it arrives and a periodic tick while the child
/// is alive. Lines come from reader threads, ticks from the waiting thread.
pub trait OutputObserver: Sync {
    fn on_line(&self, _stream: StreamKind, _line: &str) {}
    fn on_tick(&self) {}
}

pub struct Silent;

impl OutputObserver for Silent {}

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    tick: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_TICK)
    }
}

impl ProcessRunner {
    pub fn new(tick: Duration) -> Self {
        Self { tick }
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    pub fn run(&self, invocation: &ProcessInvocation) -> Result<ProcessResult, TransferError> {
        self.run_observed(invocation, &Silent)
    }

    pub fn run_observed(
        &self,
        invocation: &ProcessInvocation,
        observer: &dyn OutputObserver,
    ) -> Result<ProcessResult, TransferError> {
        let command_line = invocation.command_line();
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &invocation.working_dir {
            command.current_dir(dir);
        }
        platform::isolate(&mut command);

        tracing::debug!(command = %command_line, "spawning process");
        let mut child = command.spawn().map_err(|err| TransferError::Spawn {
            command: command_line.clone(),
            message: err.to_string(),
        })?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (waited, stdout, stderr) = thread::scope(|scope| {
            let out = stdout.map(|stream| scope.spawn(move || pump(stream, StreamKind::Stdout, observer)));
            let err = stderr.map(|stream| scope.spawn(move || pump(stream, StreamKind::Stderr, observer)));
            let waited = self.wait(&mut child, invocation.timeout, observer);
            let stdout = out.and_then(|handle| handle.join().ok()).unwrap_or_default();
            let stderr = err.and_then(|handle| handle.join().ok()).unwrap_or_default();
            (waited, stdout, stderr)
        });

        match waited? {
            Waited::Exited(status) => Ok(ProcessResult {
                exit_code: status.code().unwrap_or(-1),
                stdout,
                stderr,
            }),
            Waited::TimedOut(timeout) => {
                tracing::error!(command = %command_line, "process timed out and was killed");
                Err(TransferError::Timeout {
                    command: command_line,
                    timeout,
                })
            }
        }
    }

    fn wait(
        &self,
        child: &mut Child,
        timeout: Option<Duration>,
        observer: &dyn OutputObserver,
    ) -> Result<Waited, TransferError> {
        let started = Instant::now();
        let mut last_tick: Option<Instant> = None;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(Waited::Exited(status)),
                Ok(None) => {}
                Err(err) => {
                    platform::kill_tree(child);
                    let _ = child.wait();
                    return Err(TransferError::Filesystem(format!(
                        "failed to wait on child process: {err}"
                    )));
                }
            }

            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    platform::kill_tree(child);
                    let _ = child.wait();
                    return Ok(Waited::TimedOut(limit));
                }
            }

            if last_tick.map_or(true, |at| at.elapsed() >= self.tick) {
                observer.on_tick();
                last_tick = Some(Instant::now());
            }

            thread::sleep(WAIT_STEP);
        }
    }
}

enum Waited {
    Exited(ExitStatus),
    TimedOut(Duration),
}

fn pump(stream: impl Read, kind: StreamKind, observer: &dyn OutputObserver) -> String {
    let mut reader = BufReader::new(stream);
    let mut captured = String::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let decoded = String::from_utf8_lossy(&buf);
        let line = decoded.trim_end_matches(['\n', '\r']);
        observer.on_line(kind, line);
        captured.push_str(line);
        captured.push('\n');
    }
    captured
}

#[cfg(windows)]
mod platform {
    use std::os::windows::process::CommandExt;
    use std::process::{Child, Command, Stdio};
    use std::sync::Once;

    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    const SEM_FAILCRITICALERRORS: u32 = 0x0001;
    const SEM_NOGPFAULTERRORBOX: u32 = 0x0002;
    const SEM_NOOPENFILEERRORBOX: u32 = 0x8000;

    #[link(name = "kernel32")]
    unsafe extern "system" {
        fn SetErrorMode(mode: u32) -> u32;
    }

    static ERROR_MODE: Once = Once::new();

    /// Children inherit the error mode, so a crashing tool cannot raise a
    /// dialog box and stall an unattended run.
    pub fn isolate(command: &mut Command) {
        ERROR_MODE.call_once(|| {
            // SAFETY: SetErrorMode only updates a process-wide flag word.
            unsafe {
                SetErrorMode(SEM_FAILCRITICALERRORS | SEM_NOGPFAULTERRORBOX | SEM_NOOPENFILEERRORBOX);
            }
        });
        command.creation_flags(CREATE_NO_WINDOW);
    }

    /// Kills the child and everything it started.
    pub fn kill_tree(child: &mut Child) {
        let status = Command::new("taskkill.exe")
            .args(["/T", "/F", "/PID", &child.id().to_string()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .creation_flags(CREATE_NO_WINDOW)
            .status();
        if let Err(err) = status {
            tracing::debug!(%err, "taskkill failed");
        }
        let _ = child.kill();
    }
}

#[cfg(unix)]
mod platform {
    use std::os::unix::process::CommandExt;
    use std::process::{Child, Command};

    const SIGKILL: i32 = 9;

    unsafe extern "C" {
        fn kill(pid: i32, sig: i32) -> i32;
    }

    /// The child leads its own process group so a timeout can take down
    /// whatever it spawned along with it.
    pub fn isolate(command: &mut Command) {
        command.process_group(0);
    }

    pub fn kill_tree(child: &mut Child) {
        if let Ok(pid) = i32::try_from(child.id()) {
            // SAFETY: kill only sends a signal; a negative pid addresses the
            // group the child leads.
            unsafe {
                kill(-pid, SIGKILL);
            }
        }
        let _ = child.kill();
    }
}

#[cfg(not(any(unix, windows)))]
mod platform {
    use std::process::{Child, Command};

    pub fn isolate(_command: &mut Command) {}

    pub fn kill_tree(child: &mut Child) {
        let _ = child.kill();
    }
}
