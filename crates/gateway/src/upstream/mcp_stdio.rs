//! MCP target transport: a child process speaking line-delimited JSON-RPC
//! over its own stdin/stdout.
//!
//! Grounded on the teacher's `turbomcp-transport::child_process` module
//! (`tokio::process::Command` + `BufReader`/`BufWriter` over the child's
//! stdio pipes), trimmed to the one shape this gateway needs: one request
//! in, one response out, honouring [`CancelSignal`] while waiting.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::{CancelSignal, UpstreamInvoker, UpstreamRequest, UpstreamResponse, UpstreamTransportFailure};

/// Where to find and how to launch the child process backing an MCP
/// target.
#[derive(Debug, Clone)]
pub struct McpStdioConfig {
    pub command: String,
    pub args: Vec<String>,
    pub startup_timeout: Duration,
}

struct ChildPipes {
    child: Child,
    stdin: BufWriter<tokio::process::ChildStdin>,
    stdout: BufReader<tokio::process::ChildStdout>,
}

/// Invokes one persistent child process per target, serializing requests
/// through it one line at a time.
///
/// The per-target queue already caps concurrent execution (default 1
/// inflight), so the internal mutex is about correctness under
/// misconfiguration (`max_inflight_per_target > 1` against a process that
/// only speaks one request at a time), not the common path.
pub struct McpStdioInvoker {
    config: McpStdioConfig,
    pipes: Mutex<Option<ChildPipes>>,
}

impl McpStdioInvoker {
    /// Builds an invoker that spawns its child process lazily, on first
    /// request.
    #[must_use]
    pub fn new(config: McpStdioConfig) -> Self {
        Self {
            config,
            pipes: Mutex::new(None),
        }
    }

    fn spawn(&self) -> Result<ChildPipes, UpstreamTransportFailure> {
        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| UpstreamTransportFailure(format!("spawning {}: {e}", self.config.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| UpstreamTransportFailure("child process has no stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| UpstreamTransportFailure("child process has no stdout".to_string()))?;

        Ok(ChildPipes {
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
        })
    }

    async fn round_trip(
        &self,
        pipes: &mut ChildPipes,
        request: &UpstreamRequest,
    ) -> Result<serde_json::Value, UpstreamTransportFailure> {
        let mut line = serde_json::to_string(&request.payload)
            .map_err(|e| UpstreamTransportFailure(format!("encoding request: {e}")))?;
        line.push('\n');

        pipes
            .stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| UpstreamTransportFailure(format!("writing to child stdin: {e}")))?;
        pipes
            .stdin
            .flush()
            .await
            .map_err(|e| UpstreamTransportFailure(format!("flushing child stdin: {e}")))?;

        let mut response_line = String::new();
        let bytes_read = pipes
            .stdout
            .read_line(&mut response_line)
            .await
            .map_err(|e| UpstreamTransportFailure(format!("reading child stdout: {e}")))?;
        if bytes_read == 0 {
            return Err(UpstreamTransportFailure("child process closed stdout".to_string()));
        }

        serde_json::from_str(response_line.trim_end())
            .map_err(|e| UpstreamTransportFailure(format!("decoding response: {e}")))
    }
}

#[async_trait::async_trait]
impl UpstreamInvoker for McpStdioInvoker {
    async fn invoke(
        &self,
        request: UpstreamRequest,
        mut cancel: CancelSignal,
    ) -> Result<UpstreamResponse, UpstreamTransportFailure> {
        let started = tokio::time::Instant::now();
        let mut guard = self.pipes.lock().await;

        if guard.is_none() {
            *guard = Some(self.spawn()?);
        }

        let outcome = {
            let pipes = guard.as_mut().expect("just populated above");
            tokio::select! {
                biased;
                () = cancel.cancelled() => Err(UpstreamTransportFailure("cancelled before upstream responded".to_string())),
                result = self.round_trip(pipes, &request) => result,
            }
        };

        if let Err(ref err) = outcome {
            tracing::warn!(target = %request.target, error = %err, "mcp stdio round trip failed, will respawn on next request");
            if let Some(mut pipes) = guard.take() {
                let _ = pipes.child.start_kill();
            }
        }

        outcome.map(|body| UpstreamResponse {
            body,
            upstream_latency: started.elapsed(),
        })
    }
}
