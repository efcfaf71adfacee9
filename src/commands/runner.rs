use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout as tokio_timeout, Duration};
use tracing::{debug, warn};

/// What a finished subprocess left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal or by the timeout
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

/// Runs one command line to completion.
///
/// Every executor path goes through this seam so tests can substitute canned
/// output for real processes. `Err` means the process could not be started or
/// awaited at all; a non-zero exit is still `Ok`.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command_line: &str) -> Result<ProcessOutput>;
}

/// Production runner: `sh -c <line>` on tokio's process driver.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    timeout: Duration,
    grace: Duration,
}

impl ShellRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            grace: Duration::from_secs(10),
        }
    }

    fn soft_timeout(&self) -> Duration {
        self.timeout.mul_f64(0.8)
    }

    #[cfg(unix)]
    async fn graceful_stop(&self, child: &mut Child) -> bool {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = child.id() else {
            return false;
        };
        debug!(pid, "sending SIGTERM");
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
            && tokio_timeout(self.grace, child.wait()).await.is_ok()
    }

    #[cfg(not(unix))]
    async fn graceful_stop(&self, _child: &mut Child) -> bool {
        false
    }

    /// SIGTERM first, SIGKILL once the grace period runs out.
    async fn terminate(&self, child: &mut Child) {
        if self.graceful_stop(child).await {
            return;
        }
        if let Err(e) = child.kill().await {
            warn!(error = %e, "failed to kill timed out command");
        }
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command_line: &str) -> Result<ProcessOutput> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn `{command_line}`"))?;

        debug!(pid = ?child.id(), command = %command_line, "spawned");

        let mut stdout = child.stdout.take().context("failed to capture stdout")?;
        let mut stderr = child.stderr.take().context("failed to capture stderr")?;

        // drain both pipes while waiting, a full pipe would block the child
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf).await;
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        });

        let soft = sleep(self.soft_timeout());
        let hard = sleep(self.timeout);
        tokio::pin!(soft);
        tokio::pin!(hard);
        let mut warned = false;

        let status = loop {
            tokio::select! {
                status = child.wait() => {
                    break Some(status.context("failed to wait for child")?);
                }
                _ = &mut soft, if !warned => {
                    warned = true;
                    warn!(
                        command = %command_line,
                        timeout_secs = self.timeout.as_secs(),
                        "command is taking longer than expected"
                    );
                }
                _ = &mut hard => {
                    warn!(command = %command_line, "command timed out, terminating");
                    self.terminate(&mut child).await;
                    break None;
                }
            }
        };

        let Some(status) = status else {
            // grandchildren may still hold the pipes open
            stdout_task.abort();
            stderr_task.abort();
            return Ok(ProcessOutput {
                exit_code: None,
                stdout: String::new(),
                stderr: format!("timed out after {}s", self.timeout.as_secs()),
                timed_out: true,
            });
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        Ok(ProcessOutput {
            exit_code: status.code(),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            timed_out: false,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_simple_command() {
        let runner = ShellRunner::new(Duration::from_secs(10));
        let out = runner.run("echo hello").await.unwrap();

        assert!(out.success());
        assert_eq!(out.stdout, "hello\n");
    }

    #[tokio::test]
    async fn test_shell_features_pass_through() {
        let runner = ShellRunner::new(Duration::from_secs(10));
        let out = runner
            .run("printf 'Serial Number: ABC\\n' | grep Serial")
            .await
            .unwrap();

        assert!(out.success());
        assert!(out.stdout.contains("ABC"));
    }

    #[tokio::test]
    async fn test_failed_command() {
        let runner = ShellRunner::new(Duration::from_secs(10));
        let out = runner.run("echo oops >&2; exit 3").await.unwrap();

        assert!(!out.success());
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_failed_run() {
        let runner = ShellRunner::new(Duration::from_secs(10));
        let out = runner.run("definitely-not-a-real-binary-xyz").await.unwrap();

        assert!(!out.success());
        assert_eq!(out.exit_code, Some(127));
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let mut runner = ShellRunner::new(Duration::from_secs(1));
        runner.grace = Duration::from_millis(200);
        let out = runner.run("sleep 30").await.unwrap();

        assert!(out.timed_out);
        assert!(!out.success());
    }

    /// Gone or a zombie awaiting reaping.
    #[cfg(target_os = "linux")]
    fn process_is_dead(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.trim_start().chars().next())
                == Some('Z'),
            Err(_) => true,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_abandoned_run_kills_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let line = format!("echo $$ > {}; exec sleep 30", pid_file.display());

        let runner = ShellRunner::new(Duration::from_secs(60));
        let task = tokio::spawn(async move { runner.run(&line).await });

        let pid = tokio_timeout(Duration::from_secs(5), async {
            loop {
                if let Some(pid) = std::fs::read_to_string(&pid_file)
                    .ok()
                    .and_then(|raw| raw.trim().parse::<i32>().ok())
                {
                    break pid;
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(!process_is_dead(pid));

        task.abort();
        let _ = task.await;

        tokio_timeout(Duration::from_secs(5), async {
            while !process_is_dead(pid) {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("child survived its dropped run");
    }
}
