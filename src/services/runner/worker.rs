//! Worker subprocess management.
//!
//! One worker per runner at a time. The worker is the provider's CLI,
//! handed the agent prompt and task context; stdout and stderr are teed to
//! a per-task log file and a bounded in-memory tail buffer.

use chrono::Utc;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::ProviderConfig;

use super::output::OutputBuffer;

/// How to start one worker session.
#[derive(Debug, Clone)]
pub struct WorkerSpawn {
    pub agent_id: String,
    pub provider: String,
    pub provider_config: ProviderConfig,
    pub model: Option<String>,
    /// Agent prompt file; task context is prepended when present.
    pub prompt_path: PathBuf,
    pub task_context: Option<String>,
    pub working_dir: PathBuf,
    /// Per-task log file; output is appended as it streams.
    pub output_path: Option<PathBuf>,
    pub buffer_chars: usize,
    /// Extra environment entries (session ids, injected secrets).
    pub env: Vec<(String, String)>,
}

/// A live (or finished) worker subprocess.
pub struct WorkerProcess {
    pub session_id: String,
    pub provider: String,
    pub output_path: Option<PathBuf>,
    child: Child,
    buffer: Arc<Mutex<OutputBuffer>>,
    drain_handles: Vec<JoinHandle<()>>,
}

impl WorkerProcess {
    /// Spawn the provider CLI for one session.
    pub fn spawn(params: WorkerSpawn) -> DomainResult<Self> {
        let session_id = format!(
            "{}_{}",
            params.agent_id,
            Utc::now().format("%Y%m%d_%H%M%S")
        );

        let agent_prompt = std::fs::read_to_string(&params.prompt_path).map_err(|e| {
            DomainError::ExecutionFailed(format!(
                "Agent prompt not found at {}: {e}",
                params.prompt_path.display()
            ))
        })?;

        let full_prompt = match &params.task_context {
            Some(context) => {
                format!("## Current Task Context\n\n{context}\n\n---\n\n{agent_prompt}")
            }
            None => agent_prompt,
        };

        let mut args = params.provider_config.args.clone();
        if params.provider == "claude" && args.is_empty() {
            args = vec![
                "--dangerously-skip-permissions".to_string(),
                "--print".to_string(),
                "--output-format".to_string(),
                "json".to_string(),
            ];
        }

        std::fs::create_dir_all(&params.working_dir)?;

        let mut cmd = Command::new(&params.provider_config.command);
        cmd.args(&args);
        if let Some(model) = &params.model {
            cmd.arg("--model").arg(model);
        }
        if params.provider_config.prompt_flag.is_empty() {
            cmd.arg(&full_prompt);
        } else {
            cmd.arg(&params.provider_config.prompt_flag).arg(&full_prompt);
        }

        cmd.current_dir(&params.working_dir)
            .env("FOREMAN_SESSION_ID", &session_id)
            .env("FOREMAN_AGENT_ID", &params.agent_id)
            .env("FOREMAN_PROVIDER", &params.provider)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &params.env {
            cmd.env(key, value);
        }

        tracing::info!(
            session_id = %session_id,
            agent_id = %params.agent_id,
            provider = %params.provider,
            model = params.model.as_deref().unwrap_or("default"),
            "Starting worker session"
        );

        let mut child = cmd
            .spawn()
            .map_err(|e| DomainError::ExecutionFailed(format!("Failed to spawn worker: {e}")))?;

        let buffer = Arc::new(Mutex::new(OutputBuffer::new(params.buffer_chars)));

        let log_file = match &params.output_path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                Some(Arc::new(Mutex::new(file)))
            }
            None => None,
        };

        let mut drain_handles = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            drain_handles.push(drain_pipe(stdout, buffer.clone(), log_file.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            drain_handles.push(drain_pipe(stderr, buffer.clone(), log_file));
        }

        Ok(Self {
            session_id,
            provider: params.provider,
            output_path: params.output_path,
            child,
            buffer,
            drain_handles,
        })
    }

    /// Whether the subprocess is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Exit code once the subprocess has finished; -1 for signal deaths.
    pub fn exit_code(&mut self) -> Option<i32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.code().unwrap_or(-1)),
            _ => None,
        }
    }

    /// Join the output drains and return (buffered tail, truncated flag).
    /// Call after the subprocess exits; the buffer holds at most the
    /// configured number of trailing characters.
    pub async fn finish(&mut self) -> (String, bool) {
        for handle in self.drain_handles.drain(..) {
            let _ = handle.await;
        }
        let buffer = self.buffer.lock().expect("output buffer lock");
        (buffer.contents(), buffer.truncated())
    }

    /// Stop the worker: SIGTERM, grace period, then SIGKILL.
    pub async fn stop(&mut self, grace: Duration) -> i32 {
        if let Ok(Some(status)) = self.child.try_wait() {
            return status.code().unwrap_or(-1);
        }

        tracing::info!(session_id = %self.session_id, "Stopping worker session");

        if let Some(pid) = self.child.id() {
            #[allow(clippy::cast_possible_wrap)]
            let pid = nix::unistd::Pid::from_raw(pid as i32);
            let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM);
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => status.code().unwrap_or(-1),
            Ok(Err(_)) => -1,
            Err(_) => {
                tracing::warn!(session_id = %self.session_id, "Worker did not terminate, killing");
                let _ = self.child.start_kill();
                match self.child.wait().await {
                    Ok(status) => status.code().unwrap_or(-1),
                    Err(_) => -1,
                }
            }
        }
    }
}

/// Drain one pipe line by line into the tail buffer and the log file.
fn drain_pipe<R>(
    pipe: R,
    buffer: Arc<Mutex<OutputBuffer>>,
    log_file: Option<Arc<Mutex<std::fs::File>>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let reader = BufReader::new(pipe);
        let mut lines = reader.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(file) = &log_file {
                use std::io::Write;
                if let Ok(mut file) = file.lock() {
                    let _ = writeln!(file, "{line}");
                }
            }
            if let Ok(mut buffer) = buffer.lock() {
                buffer.push_line(&line);
            }
        }
    })
}
