//! One external interactive agent process, direct or pane-backed (§4.1).

use crate::pane::PaneManager;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

/// Default ring-buffer capacity for direct-mode output (lines).
pub const RING_BUFFER_CAPACITY: usize = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel is closed")]
    ChannelClosed,
    #[error("channel target is gone")]
    ChannelGone,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Pane(#[from] crate::pane::PaneError),
}

#[derive(Debug, Serialize)]
struct AgentInfo<'a> {
    session_id: &'a str,
    agent_uid: &'a str,
    agent_id: usize,
}

/// Write the session-id file and agent-info JSON coordination files into the
/// agent's working directory, as described in §4.1 `start`.
async fn write_coordination_files(
    working_dir: &Path,
    session_id: &str,
    agent_uid: &str,
    agent_id: usize,
) -> Result<(), ChannelError> {
    tokio::fs::write(working_dir.join(".xenosync_session"), session_id).await?;
    let info = AgentInfo {
        session_id,
        agent_uid,
        agent_id,
    };
    let json = serde_json::to_string_pretty(&info).unwrap_or_default();
    tokio::fs::write(working_dir.join(".xenosync_agent.json"), json).await?;
    Ok(())
}

/// A direct-spawned CLI process with stdout/stderr piped into a bounded ring
/// buffer of lines and stdin kept open for message injection.
pub struct DirectChannel {
    command: String,
    args: Vec<String>,
    working_dir: PathBuf,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    buffer: Arc<Mutex<VecDeque<String>>>,
}

impl DirectChannel {
    pub fn new(command: impl Into<String>, args: Vec<String>, working_dir: PathBuf) -> Self {
        Self {
            command: command.into(),
            args,
            working_dir,
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(RING_BUFFER_CAPACITY))),
        }
    }

    pub async fn start(
        &self,
        session_id: &str,
        agent_uid: &str,
        agent_id: usize,
        initial_wait: Duration,
    ) -> Result<(), ChannelError> {
        tokio::fs::create_dir_all(&self.working_dir).await?;
        write_coordination_files(&self.working_dir, session_id, agent_uid, agent_id).await?;

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .current_dir(&self.working_dir)
            .env("XENOSYNC_SESSION_ID", session_id)
            .env("XENOSYNC_AGENT_UID", agent_uid)
            .env("XENOSYNC_PROJECT_PATH", &self.working_dir)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take();

        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, self.buffer.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, self.buffer.clone());
        }

        *self.child.lock().await = Some(child);
        *self.stdin.lock().await = stdin;

        sleep(initial_wait).await;
        Ok(())
    }

    pub async fn send(&self, message: &str) -> Result<(), ChannelError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(ChannelError::ChannelClosed)?;
        stdin.write_all(message.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    pub async fn recent_output(&self, n_lines: usize, offset: usize) -> String {
        let buffer = self.buffer.lock().await;
        let len = buffer.len();
        let end = len.saturating_sub(offset);
        let start = end.saturating_sub(n_lines);
        buffer
            .iter()
            .skip(start)
            .take(end - start)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub async fn is_running(&self) -> bool {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub async fn stop(&self) -> Result<(), ChannelError> {
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        Ok(())
    }
}

fn spawn_line_reader<R>(reader: R, buffer: Arc<Mutex<VecDeque<String>>>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let mut buffer = buffer.lock().await;
            if buffer.len() >= RING_BUFFER_CAPACITY {
                buffer.pop_front();
            }
            buffer.push_back(line);
        }
    });
}

/// An agent attached to an existing pane of a terminal-multiplexer session.
pub struct PaneChannel {
    pane_manager: Arc<PaneManager>,
    pane_id: usize,
    working_dir: PathBuf,
    command_line: String,
}

impl PaneChannel {
    pub fn new(
        pane_manager: Arc<PaneManager>,
        pane_id: usize,
        working_dir: PathBuf,
        command_line: impl Into<String>,
    ) -> Self {
        Self {
            pane_manager,
            pane_id,
            working_dir,
            command_line: command_line.into(),
        }
    }

    /// `cd <dir>`, export env vars, then the CLI command line, each with a
    /// small settle delay so the shell processes them in order.
    pub async fn start(
        &self,
        session_id: &str,
        agent_uid: &str,
        agent_id: usize,
        initial_wait: Duration,
    ) -> Result<(), ChannelError> {
        tokio::fs::create_dir_all(&self.working_dir).await?;
        write_coordination_files(&self.working_dir, session_id, agent_uid, agent_id).await?;

        let cd = format!("cd {}", self.working_dir.display());
        self.pane_manager.send_to_pane(self.pane_id, &cd, true).await?;
        sleep(Duration::from_millis(300)).await;

        for (key, value) in [
            ("XENOSYNC_SESSION_ID", session_id),
            ("XENOSYNC_AGENT_UID", agent_uid),
            ("XENOSYNC_PROJECT_PATH", &self.working_dir.display().to_string()),
        ] {
            let export = format!("export {key}={value}");
            self.pane_manager.send_to_pane(self.pane_id, &export, true).await?;
            sleep(Duration::from_millis(200)).await;
        }
        let _ = agent_id;

        self.pane_manager
            .send_to_pane(self.pane_id, &self.command_line, true)
            .await?;
        sleep(initial_wait).await;
        Ok(())
    }

    /// Quotes are escaped and newlines collapsed to spaces, then keystrokes
    /// are sent followed by a delayed Enter (the wrapped CLI redraws its
    /// input line asynchronously).
    pub async fn send(&self, message: &str) -> Result<(), ChannelError> {
        let flattened = message.replace('\n', " ").replace('"', "\\\"");
        self.pane_manager
            .send_to_pane(self.pane_id, &flattened, false)
            .await?;
        sleep(Duration::from_millis(500)).await;
        self.pane_manager.send_to_pane(self.pane_id, "", true).await?;
        Ok(())
    }

    pub async fn recent_output(&self, n_lines: usize, offset: usize) -> String {
        match self.pane_manager.capture_pane(self.pane_id, n_lines + offset).await {
            Ok(text) => {
                let lines: Vec<&str> = text.lines().collect();
                let len = lines.len();
                let end = len.saturating_sub(offset);
                let start = end.saturating_sub(n_lines);
                lines[start..end].join("\n")
            }
            Err(_) => String::new(),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.pane_manager.pane_exists(self.pane_id).await
    }

    /// Interrupt keystroke, then "exit" + Enter; the pane itself is left
    /// alive (the pane manager owns the multiplexer session).
    pub async fn stop(&self) -> Result<(), ChannelError> {
        let _ = self.pane_manager.send_interrupt(self.pane_id).await;
        sleep(Duration::from_millis(200)).await;
        self.pane_manager.send_to_pane(self.pane_id, "exit", true).await?;
        Ok(())
    }
}

/// Unifies direct- and pane-mode channels behind one call surface so the
/// agent manager doesn't need to match on mode at every call site.
pub enum AgentChannel {
    Direct(DirectChannel),
    Pane(PaneChannel),
}

impl AgentChannel {
    pub async fn start(
        &self,
        session_id: &str,
        agent_uid: &str,
        agent_id: usize,
        initial_wait: Duration,
    ) -> Result<(), ChannelError> {
        match self {
            AgentChannel::Direct(c) => c.start(session_id, agent_uid, agent_id, initial_wait).await,
            AgentChannel::Pane(c) => c.start(session_id, agent_uid, agent_id, initial_wait).await,
        }
    }

    pub async fn send(&self, message: &str) -> Result<(), ChannelError> {
        match self {
            AgentChannel::Direct(c) => c.send(message).await,
            AgentChannel::Pane(c) => c.send(message).await,
        }
    }

    pub async fn recent_output(&self, n_lines: usize, offset: usize) -> String {
        match self {
            AgentChannel::Direct(c) => c.recent_output(n_lines, offset).await,
            AgentChannel::Pane(c) => c.recent_output(n_lines, offset).await,
        }
    }

    pub async fn is_running(&self) -> bool {
        match self {
            AgentChannel::Direct(c) => c.is_running().await,
            AgentChannel::Pane(c) => c.is_running().await,
        }
    }

    pub async fn stop(&self) -> Result<(), ChannelError> {
        match self {
            AgentChannel::Direct(c) => c.stop().await,
            AgentChannel::Pane(c) => c.stop().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn direct_channel_runs_echo_and_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let channel = DirectChannel::new(
            "sh",
            vec!["-c".into(), "echo hello-from-agent".into()],
            dir.path().to_path_buf(),
        );
        channel
            .start("sess-1", "sess-1-agent-0", 0, Duration::from_millis(50))
            .await
            .unwrap();

        // Give the line reader a moment to drain stdout.
        sleep(Duration::from_millis(200)).await;
        let output = channel.recent_output(10, 0).await;
        assert!(output.contains("hello-from-agent"), "output was: {output:?}");
    }

    #[tokio::test]
    async fn direct_channel_writes_coordination_files() {
        let dir = tempfile::tempdir().unwrap();
        let channel = DirectChannel::new(
            "sh",
            vec!["-c".into(), "sleep 0.2".into()],
            dir.path().to_path_buf(),
        );
        channel
            .start("sess-1", "sess-1-agent-0", 0, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(dir.path().join(".xenosync_session").exists());
        assert!(dir.path().join(".xenosync_agent.json").exists());
    }

    #[tokio::test]
    async fn direct_channel_is_running_reflects_process_exit() {
        let dir = tempfile::tempdir().unwrap();
        let channel = DirectChannel::new(
            "sh",
            vec!["-c".into(), "exit 0".into()],
            dir.path().to_path_buf(),
        );
        channel
            .start("sess-1", "sess-1-agent-0", 0, Duration::from_millis(200))
            .await
            .unwrap();
        assert!(!channel.is_running().await);
    }

    #[tokio::test]
    async fn send_on_closed_channel_errors() {
        let dir = tempfile::tempdir().unwrap();
        let channel = DirectChannel::new(
            "sh",
            vec!["-c".into(), "exit 0".into()],
            dir.path().to_path_buf(),
        );
        // Never started: stdin slot is empty.
        let result = channel.send("hello").await;
        assert!(matches!(result, Err(ChannelError::ChannelClosed)));
    }
}
