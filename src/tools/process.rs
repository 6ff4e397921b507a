//! Supervised subprocess execution.

use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ToolError;

const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Default)]
pub struct ProcessOutput {
    /// Stdout lines, kept only for commands built with [`ToolCommand::capture_stdout`].
    pub stdout: Vec<String>,
    /// Last lines of stderr, for error messages.
    pub stderr_tail: Vec<String>,
}

/// Everything needed to launch one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub capture_stdout: bool,
}

impl ToolCommand {
    pub fn new(program: &str, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            timeout,
            capture_stdout: false,
        }
    }

    /// Keeps stdout in [`ProcessOutput::stdout`]. Progress chatter of long
    /// downloads is otherwise only streamed to the line callback.
    pub fn capture_stdout(mut self) -> Self {
        self.capture_stdout = true;
        self
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
}

fn forward_lines<R>(reader: R, stream: OutputStream, tx: mpsc::UnboundedSender<(OutputStream, String)>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send((stream, line)).is_err() {
                break;
            }
        }
    });
}

/// Runs a tool to completion, handing every output line to `on_line`.
///
/// The child is killed when `cancel` fires, when the timeout elapses, or
/// when the returned future is dropped.
pub async fn run_tool<F>(
    command: &ToolCommand,
    cancel: &CancellationToken,
    mut on_line: F,
) -> Result<ProcessOutput, ToolError>
where
    F: FnMut(OutputStream, &str),
{
    debug!("Running {} {:?}", command.program, command.args);

    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ToolError::Spawn {
            program: command.program.clone(),
            source: e,
        })?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        forward_lines(stdout, OutputStream::Stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        forward_lines(stderr, OutputStream::Stderr, tx.clone());
    }
    drop(tx);

    let mut output = ProcessOutput::default();
    let mut stderr_tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let deadline = tokio::time::sleep(command.timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            line = rx.recv() => {
                let Some((stream, line)) = line else { break };
                on_line(stream, &line);
                match stream {
                    OutputStream::Stdout => {
                        if command.capture_stdout {
                            output.stdout.push(line);
                        }
                    }
                    OutputStream::Stderr => {
                        if stderr_tail.len() == STDERR_TAIL_LINES {
                            stderr_tail.pop_front();
                        }
                        stderr_tail.push_back(line);
                    }
                }
            }
            _ = cancel.cancelled() => {
                warn!("Cancelling {}", command.program);
                let _ = child.kill().await;
                return Err(ToolError::Cancelled);
            }
            _ = &mut deadline => {
                warn!("{} timed out after {:?}", command.program, command.timeout);
                let _ = child.kill().await;
                return Err(ToolError::Timeout {
                    program: command.program.clone(),
                    secs: command.timeout.as_secs(),
                });
            }
        }
    }

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            return Err(ToolError::Cancelled);
        }
    };
    output.stderr_tail = stderr_tail.into_iter().collect();

    if !status.success() {
        return Err(ToolError::Failed {
            program: command.program.clone(),
            code: status.code(),
            stderr: output.stderr_tail.join("\n"),
        });
    }

    Ok(output)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ToolCommand {
        ToolCommand::new("sh", Duration::from_secs(10)).args(["-c", script])
    }

    #[tokio::test]
    async fn test_collects_both_streams() {
        let mut seen = Vec::new();
        let output = run_tool(
            &sh("echo out1; echo err1 1>&2; echo out2").capture_stdout(),
            &CancellationToken::new(),
            |stream, line| seen.push((stream, line.to_string())),
        )
        .await
        .unwrap();

        assert_eq!(output.stdout, vec!["out1", "out2"]);
        assert_eq!(output.stderr_tail, vec!["err1"]);
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn test_stdout_not_kept_unless_requested() {
        let mut streamed = 0;
        let output = run_tool(
            &sh("for i in 1 2 3 4 5; do echo \"[download] $i%\"; done"),
            &CancellationToken::new(),
            |_, _| streamed += 1,
        )
        .await
        .unwrap();

        assert_eq!(streamed, 5);
        assert!(output.stdout.is_empty());
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let err = run_tool(
            &sh("echo 'ERROR: nope' 1>&2; exit 3"),
            &CancellationToken::new(),
            |_, _| {},
        )
        .await
        .unwrap_err();

        match err {
            ToolError::Failed { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("ERROR: nope"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program() {
        let command = ToolCommand::new("definitely-not-a-real-binary-1234", Duration::from_secs(1));
        let err = run_tool(&command, &CancellationToken::new(), |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_cancel_kills_child() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = run_tool(&sh("sleep 30"), &cancel, |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_timeout() {
        let command = ToolCommand::new("sh", Duration::from_millis(100)).args(["-c", "sleep 30"]);
        let err = run_tool(&command, &CancellationToken::new(), |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
    }
}
