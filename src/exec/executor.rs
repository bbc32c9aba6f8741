/// Command execution against host networking state
///
/// One `HostCommand` per imperative operation. The executor never retries;
/// callers pick the capability that matches their phase:
/// - `run_strict`: any failure is an error the caller must surface
/// - `run_best_effort`: failures are logged and returned as data (teardown)
/// - `query`: read-only commands whose failure is expected and quiet
use crate::config::types::{NetsegError, Result};
use log::{debug, info, warn};
use std::fmt;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Polling interval while waiting on a bounded command
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A single external operation: program, arguments, optional time bound
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostCommand {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl HostCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
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

    /// Kill the command and report a timeout once `limit` elapses
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Captured result of one command
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub succeeded: bool,
    pub stdout: String,
    pub stderr: String,
    /// None when the process was killed by a signal or never started
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            stdout: stdout.into(),
            exit_code: Some(0),
            ..Self::default()
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            stderr: stderr.into(),
            exit_code: Some(exit_code),
            ..Self::default()
        }
    }

    fn into_error(self, command: &HostCommand) -> NetsegError {
        let stderr = if self.timed_out {
            format!("timed out; {}", self.stderr.trim())
        } else {
            self.stderr.trim().to_string()
        };
        NetsegError::CommandFailed {
            command: command.to_string(),
            exit_code: self.exit_code,
            stderr,
        }
    }
}

/// Spawns commands. `Err` means the process could not be started at all.
pub trait CommandRunner {
    fn run(&self, command: &HostCommand) -> Result<CommandOutput>;
}

/// Runs commands on the host with captured pipes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, command: &HostCommand) -> Result<CommandOutput> {
        let mut child = Command::new(command.program())
            .args(command.arguments())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| NetsegError::Spawn {
                command: command.to_string(),
                reason: e.to_string(),
            })?;

        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let (status, timed_out) = match command.timeout() {
            Some(limit) => wait_bounded(&mut child, limit)?,
            None => (Some(child.wait()?), false),
        };

        let stdout = join_reader(stdout_reader);
        let stderr = join_reader(stderr_reader);

        Ok(CommandOutput {
            succeeded: !timed_out && status.map_or(false, |s| s.success()),
            stdout,
            stderr,
            exit_code: status.and_then(|s| s.code()),
            timed_out,
        })
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut stream: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Err(e) = stream.read_to_end(&mut buffer) {
            debug!("Output stream closed early: {}", e);
        }
        buffer
    })
}

fn join_reader(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

fn wait_bounded(child: &mut Child, limit: Duration) -> Result<(Option<ExitStatus>, bool)> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((Some(status), false));
        }
        if Instant::now() >= deadline {
            if let Err(e) = child.kill() {
                warn!("Failed to kill timed out process {}: {}", child.id(), e);
            }
            // Reap to avoid a zombie; the status is irrelevant after a kill.
            let _ = child.wait();
            return Ok((None, true));
        }
        thread::sleep(WAIT_POLL_INTERVAL);
    }
}

/// Logs commands and reports success without running anything
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunRunner;

impl CommandRunner for DryRunRunner {
    fn run(&self, command: &HostCommand) -> Result<CommandOutput> {
        info!("[dry-run] {}", command);
        Ok(CommandOutput::success(""))
    }
}

/// Executes host commands with strict, best-effort or query semantics
pub struct CommandExecutor {
    runner: Box<dyn CommandRunner>,
}

impl CommandExecutor {
    pub fn new(runner: Box<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Executor backed by real processes
    pub fn system() -> Self {
        Self::new(Box::new(SystemRunner))
    }

    /// Executor that only logs
    pub fn dry_run() -> Self {
        Self::new(Box::new(DryRunRunner))
    }

    /// Run a command whose failure must abort the caller's current step
    pub fn run_strict(&self, command: &HostCommand) -> Result<CommandOutput> {
        let output = self.execute(command)?;
        if !output.succeeded {
            return Err(output.into_error(command));
        }
        Ok(output)
    }

    /// Run a teardown command; failures are logged and returned, never raised
    pub fn run_best_effort(&self, command: &HostCommand) -> CommandOutput {
        match self.execute(command) {
            Ok(output) => {
                if !output.succeeded {
                    warn!(
                        "Ignoring failure of '{}' (exit {:?}): {}",
                        command,
                        output.exit_code,
                        output.stderr.trim()
                    );
                }
                output
            }
            Err(e) => {
                warn!("Ignoring failure of '{}': {}", command, e);
                CommandOutput {
                    stderr: e.to_string(),
                    ..CommandOutput::default()
                }
            }
        }
    }

    /// Run a read-only command; failure is an answer, not an incident
    pub fn query(&self, command: &HostCommand) -> CommandOutput {
        match self.execute(command) {
            Ok(output) => {
                if !output.succeeded {
                    debug!(
                        "Query '{}' failed (exit {:?}, timed out: {})",
                        command, output.exit_code, output.timed_out
                    );
                }
                output
            }
            Err(e) => {
                debug!("Query '{}' could not run: {}", command, e);
                CommandOutput {
                    stderr: e.to_string(),
                    ..CommandOutput::default()
                }
            }
        }
    }

    fn execute(&self, command: &HostCommand) -> Result<CommandOutput> {
        info!("Running: {}", command);
        let output = self.runner.run(command)?;
        debug!(
            "'{}' finished: succeeded={} exit={:?}",
            command, output.succeeded, output.exit_code
        );
        Ok(output)
    }
}
