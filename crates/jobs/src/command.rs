use std::{
    fmt,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    task::JoinHandle,
};

/// One external process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new<I, S>(program: &str, args: I, cwd: &Path) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: cwd.to_path_buf(),
            env: vec![],
        }
    }

    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.push((key.to_string(), value.into()));
        self
    }

    /// Whether the argument list starts with `args`.
    pub fn starts_with(&self, program: &str, args: &[&str]) -> bool {
        self.program == program
            && self.args.len() >= args.len()
            && self.args.iter().zip(args).all(|(a, b)| a == b)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process could not be spawned, was killed or timed out.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    /// Output exceeded the buffer cap.
    pub overflowed: bool,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self { code: Some(0), stdout: stdout.into(), ..Self::default() }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self { code: Some(code), stderr: stderr.into(), ..Self::default() }
    }

    /// Zero exit within the time and output limits.
    pub fn success(&self) -> bool { self.code == Some(0) && !self.timed_out && !self.overflowed }

    /// Stderr followed by stdout, as used for error messages and tool detection.
    pub fn combined(&self) -> String { format!("{}{}", self.stderr, self.stdout) }
}

/// Runs external commands. Never fails: spawn errors, timeouts and oversized output
/// are all reported as an unsuccessful [`CommandOutput`].
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &CommandSpec) -> CommandOutput;
}

pub struct TokioCommandRunner {
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl TokioCommandRunner {
    pub fn new(timeout: Duration, max_output_bytes: usize) -> Self {
        Self { timeout, max_output_bytes }
    }
}

/// Read until EOF, keeping at most `max` bytes.
async fn read_capped<R: AsyncRead + Unpin>(reader: Option<R>, max: usize) -> (Vec<u8>, bool) {
    let Some(mut reader) = reader else {
        return (vec![], false);
    };
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut overflowed = false;
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = max.saturating_sub(buf.len());
                if n > room {
                    overflowed = true;
                }
                buf.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    (buf, overflowed)
}

/// How long output readers may keep draining once the process is gone. Anything that
/// escaped the process group and still holds a pipe is cut off after this.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// SIGKILL the whole process group led by `pid`.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let ret = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
    if ret != 0 {
        let e = std::io::Error::last_os_error();
        tracing::debug!("Failed to kill process group {}: {}", pid, e);
    }
}

/// Kills the process group if dropped while the child is still running, e.g. when the
/// caller gives up on the whole run.
struct ProcessGroup(Option<u32>);

impl ProcessGroup {
    fn disarm(&mut self) { self.0 = None; }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.0 {
            kill_process_group(pid);
        }
    }
}

async fn drain(mut task: JoinHandle<(Vec<u8>, bool)>) -> (Vec<u8>, bool) {
    match tokio::time::timeout(DRAIN_GRACE, &mut task).await {
        Ok(result) => result.unwrap_or_default(),
        Err(_) => {
            task.abort();
            (vec![], false)
        }
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, command: &CommandSpec) -> CommandOutput {
        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(&command.cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .envs(command.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own group, so a timeout also takes down node/eslint grandchildren.
        #[cfg(unix)]
        cmd.process_group(0);
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::debug!("Failed to spawn {}: {}", command.program, e);
                return CommandOutput {
                    code: None,
                    stderr: e.to_string(),
                    ..CommandOutput::default()
                };
            }
        };
        let pid = child.id();
        let mut group = ProcessGroup(pid);

        let max = self.max_output_bytes;
        let stdout_task = tokio::spawn(read_capped(child.stdout.take(), max));
        let stderr_task = tokio::spawn(read_capped(child.stderr.take(), max));

        let (timed_out, code) = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => (false, status.code()),
            Ok(Err(e)) => {
                tracing::debug!("Failed to wait for {}: {}", command.program, e);
                (false, None)
            }
            Err(_) => {
                #[cfg(unix)]
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                let _ = child.kill().await;
                (true, None)
            }
        };
        group.disarm();

        let (stdout, stdout_overflow) = drain(stdout_task).await;
        let (stderr, stderr_overflow) = drain(stderr_task).await;
        let mut stderr = String::from_utf8_lossy(&stderr).into_owned();
        if timed_out {
            tracing::warn!("Command {} timed out after {:?}", command.program, self.timeout);
            stderr.push_str("\ncommand timed out");
        }
        CommandOutput {
            code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr,
            timed_out,
            overflowed: stdout_overflow || stderr_overflow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> TokioCommandRunner { TokioCommandRunner::new(Duration::from_secs(5), 64) }

    #[test]
    fn matches_command_prefix() {
        let cmd = CommandSpec::new("git", ["diff", "--relative", "--name-only"], Path::new("."));
        assert!(cmd.starts_with("git", &["diff", "--relative"]));
        assert!(!cmd.starts_with("git", &["diff", "--name-only"]));
        assert!(!cmd.starts_with("npx", &[]));
        assert_eq!(cmd.to_string(), "git diff --relative --name-only");
    }

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let out = runner()
            .run(&CommandSpec::new("sh", ["-c", "echo hi; echo oops >&2; exit 3"], dir.path()))
            .await;
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout, "hi\n");
        assert_eq!(out.stderr, "oops\n");
        assert!(!out.success());
    }

    #[tokio::test]
    async fn passes_environment() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = CommandSpec::new("sh", ["-c", "printf %s \"$FOO\""], dir.path()).env("FOO", "bar");
        let out = runner().run(&cmd).await;
        assert!(out.success());
        assert_eq!(out.stdout, "bar");
    }

    #[tokio::test]
    async fn oversized_output_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let out = runner()
            .run(&CommandSpec::new("sh", ["-c", "head -c 1000 /dev/zero"], dir.path()))
            .await;
        assert_eq!(out.code, Some(0));
        assert!(out.overflowed);
        assert_eq!(out.stdout.len(), 64);
        assert!(!out.success());
    }

    #[tokio::test]
    async fn timeout_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TokioCommandRunner::new(Duration::from_millis(100), 1024);
        let out = runner.run(&CommandSpec::new("sleep", ["5"], dir.path())).await;
        assert!(out.timed_out);
        assert!(!out.success());
    }

    #[tokio::test]
    async fn timeout_kills_grandchildren_holding_the_pipes() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TokioCommandRunner::new(Duration::from_millis(200), 1024);
        let started = std::time::Instant::now();
        let out = runner.run(&CommandSpec::new("sh", ["-c", "sleep 4; echo done"], dir.path())).await;
        let elapsed = started.elapsed();
        assert!(out.timed_out);
        assert!(!out.stdout.contains("done"));
        assert!(elapsed < Duration::from_secs(1), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn cancelled_run_kills_the_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let cmd = CommandSpec::new("sh", ["-c", "(sleep 1; touch marker) & wait"], dir.path());
        let runner = runner();
        let cancelled = tokio::time::timeout(Duration::from_millis(200), runner.run(&cmd)).await;
        assert!(cancelled.is_err());
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn background_writers_do_not_hold_up_completion() {
        let dir = tempfile::tempdir().unwrap();
        let started = std::time::Instant::now();
        let out = runner()
            .run(&CommandSpec::new("sh", ["-c", "echo hi; (sleep 4; echo late) & exit 0"], dir.path()))
            .await;
        assert_eq!(out.code, Some(0));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn spawn_errors_are_failures() {
        let dir = tempfile::tempdir().unwrap();
        let out = runner().run(&CommandSpec::new("definitely-not-a-binary", ["x"], dir.path())).await;
        assert_eq!(out.code, None);
        assert!(!out.success());
        assert!(!out.stderr.is_empty());
    }
}
