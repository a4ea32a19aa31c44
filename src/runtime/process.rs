use super::cancel::CancelFlag;
use crate::error::{ForgeError, Result};
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Captured result of one child process
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Runs external commands with a deadline and cooperative cancellation
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
    poll_interval: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            poll_interval: Duration::from_millis(25),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Spawns `command`, draining stdout and stderr on their own threads
    /// so a chatty child cannot block on a full pipe. The child is killed
    /// when the deadline passes or `cancel` is set.
    pub fn run(&self, mut command: Command, cancel: &CancelFlag) -> Result<ProcessOutput> {
        let program = format!("{:?}", command.get_program());
        let started = Instant::now();

        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ForgeError::backend(format!("Failed to start {}: {}", program, e)))?;

        log::debug!("Spawned {} (pid {})", program, child.id());

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if cancel.is_cancelled() {
                log::warn!("Cancelling {} (pid {})", program, child.id());
                kill(&mut child);
                return Err(ForgeError::Cancelled);
            }
            if started.elapsed() >= self.timeout {
                log::warn!(
                    "{} exceeded {}s, killing pid {}",
                    program,
                    self.timeout.as_secs(),
                    child.id()
                );
                kill(&mut child);
                return Err(ForgeError::Timeout(self.timeout.as_secs()));
            }
            thread::sleep(self.poll_interval);
        };

        let output = ProcessOutput {
            status,
            stdout: collect(stdout),
            stderr: collect(stderr),
            elapsed: started.elapsed(),
        };

        log::debug!(
            "{} finished with {} in {:.2}s",
            program,
            output.status,
            output.elapsed.as_secs_f64()
        );
        Ok(output)
    }

    /// Like `run`, but a non-zero exit becomes a backend error carrying
    /// the child's stderr
    pub fn run_checked(&self, command: Command, cancel: &CancelFlag) -> Result<ProcessOutput> {
        let output = self.run(command, cancel)?;
        if !output.status.success() {
            let stderr = output.stderr.trim();
            log::error!("Backend process failed ({}): {}", output.status, stderr);
            return Err(ForgeError::backend(format!(
                "process exited with {}: {}",
                output.status,
                if stderr.is_empty() { "<no stderr>" } else { stderr }
            )));
        }
        if !output.stderr.trim().is_empty() {
            log::debug!("Backend stderr: {}", output.stderr.trim());
        }
        Ok(output)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = pipe.read_to_end(&mut buffer);
            String::from_utf8_lossy(&buffer).into_owned()
        })
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

fn kill(child: &mut Child) {
    if let Err(e) = child.kill() {
        log::warn!("Failed to kill pid {}: {}", child.id(), e);
    }
    let _ = child.wait();
}

/// Parses backend stdout as JSON. Scripts may print progress before the
/// result, so the last non-empty line is tried first, then the whole text.
pub fn parse_json_output(stdout: &str) -> Result<serde_json::Value> {
    let last_line = stdout.lines().rev().find(|l| !l.trim().is_empty());

    if let Some(line) = last_line {
        if let Ok(value) = serde_json::from_str(line.trim()) {
            return Ok(value);
        }
    }

    serde_json::from_str(stdout.trim()).map_err(|e| ForgeError::Parse {
        message: e.to_string(),
        raw: stdout.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_last_line() {
        let stdout = "loading data\nfitting\n{\"accuracy\": 0.91}\n\n";
        let value = parse_json_output(stdout).unwrap();
        assert_eq!(value["accuracy"], 0.91);
    }

    #[test]
    fn test_parse_multiline_document() {
        let stdout = "{\n  \"accuracy\": 0.5\n}\n";
        let value = parse_json_output(stdout).unwrap();
        assert_eq!(value["accuracy"], 0.5);
    }

    #[test]
    fn test_parse_failure_keeps_raw_output() {
        match parse_json_output("Traceback (most recent call last)") {
            Err(ForgeError::Parse { raw, .. }) => assert!(raw.contains("Traceback")),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_captures_stdout_and_stderr_separately() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo out; echo err 1>&2"]);

        let output = ProcessRunner::new(Duration::from_secs(10))
            .run(command, &CancelFlag::new())
            .unwrap();
        assert!(output.status.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[test]
    fn test_non_zero_exit_is_backend_error() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo 'ValueError: bad input' 1>&2; exit 3"]);

        let err = ProcessRunner::new(Duration::from_secs(10))
            .run_checked(command, &CancelFlag::new())
            .unwrap_err();
        assert!(err.to_string().contains("ValueError: bad input"));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_child() {
        let mut command = Command::new("sh");
        command.args(["-c", "sleep 5"]);

        let started = Instant::now();
        let err = ProcessRunner::new(Duration::from_millis(200))
            .run(command, &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, ForgeError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn test_cancel_stops_child() {
        let cancel = CancelFlag::new();
        let remote = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            remote.cancel();
        });

        let mut command = Command::new("sh");
        command.args(["-c", "sleep 5"]);
        let err = ProcessRunner::new(Duration::from_secs(30))
            .run(command, &cancel)
            .unwrap_err();
        canceller.join().unwrap();
        assert!(matches!(err, ForgeError::Cancelled));
    }

    #[test]
    fn test_missing_program_is_backend_error() {
        let command = Command::new("definitely-not-a-real-binary-xyz");
        let err = ProcessRunner::new(Duration::from_secs(1))
            .run(command, &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, ForgeError::Backend { .. }));
    }
}
