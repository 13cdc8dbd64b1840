//! Terminal-multiplexer pane management, shelled out to `tmux`.
//!
//! Grounded on the original `TmuxManager`: one session, three windows
//! (`orchestrator`, `agents`, `monitor`), N panes in `agents` created by
//! repeated splits with a tiled layout reapplied after each split.

use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum PaneError {
    #[error("tmux command failed: {0}")]
    CommandFailed(String),
    #[error("tmux not available: {0}")]
    Io(#[from] std::io::Error),
    #[error("pane {0} not found")]
    PaneNotFound(usize),
}

/// Dashboard layout, chosen by agent count, mirrored from the original
/// `create_dashboard_layout` heuristic.
fn layout_for_pane_count(n: usize) -> &'static str {
    match n {
        0..=2 => "even-horizontal",
        3..=4 => "tiled",
        5..=6 => "main-horizontal",
        _ => "tiled",
    }
}

pub struct PaneManager {
    session_name: String,
    panes: Mutex<HashMap<usize, String>>,
}

impl PaneManager {
    pub fn new(session_name: impl Into<String>) -> Self {
        Self {
            session_name: session_name.into(),
            panes: Mutex::new(HashMap::new()),
        }
    }

    async fn run(args: &[&str]) -> Result<std::process::Output, PaneError> {
        let output = Command::new("tmux")
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;
        Ok(output)
    }

    async fn run_ok(args: &[&str]) -> Result<(), PaneError> {
        let output = Self::run(args).await?;
        if !output.status.success() {
            return Err(PaneError::CommandFailed(format!(
                "tmux {:?}: {}",
                args,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }

    async fn session_exists(&self) -> bool {
        Self::run(&["has-session", "-t", &self.session_name])
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Create the session, its three windows, and N panes in `agents`.
    /// Idempotent: kills any same-named session first.
    pub async fn create_session(&self, num_agents: usize) -> Result<(), PaneError> {
        if self.session_exists().await {
            let _ = Self::run(&["kill-session", "-t", &self.session_name]).await;
        }

        Self::run_ok(&[
            "new-session",
            "-d",
            "-s",
            &self.session_name,
            "-n",
            "orchestrator",
        ])
        .await?;
        Self::run_ok(&["new-window", "-t", &self.session_name, "-n", "agents"]).await?;
        Self::run_ok(&["new-window", "-t", &self.session_name, "-n", "monitor"]).await?;

        let agents_window = format!("{}:agents", self.session_name);
        let mut panes = self.panes.lock().await;
        panes.clear();
        panes.insert(0, format!("{agents_window}.0"));

        for i in 1..num_agents {
            Self::run_ok(&["split-window", "-t", &agents_window]).await?;
            let layout = layout_for_pane_count(i + 1);
            Self::run_ok(&["select-layout", "-t", &agents_window, layout]).await?;
            panes.insert(i, format!("{agents_window}.{i}"));
        }

        Self::run_ok(&["set-option", "-t", &self.session_name, "aggressive-resize", "on"]).await?;
        Self::run_ok(&["set-option", "-t", &self.session_name, "mouse", "on"]).await?;
        Self::run_ok(&[
            "set-option",
            "-t",
            &self.session_name,
            "pane-border-status",
            "top",
        ])
        .await?;

        for (id, target) in panes.iter() {
            let title = format!("agent-{id}");
            let _ = Self::run(&["select-pane", "-t", target, "-T", &title]).await;
        }

        Ok(())
    }

    /// Split one additional pane for the finalization agent.
    pub async fn add_pane(&self, id: usize) -> Result<(), PaneError> {
        let agents_window = format!("{}:agents", self.session_name);
        Self::run_ok(&["split-window", "-t", &agents_window]).await?;
        let mut panes = self.panes.lock().await;
        let layout = layout_for_pane_count(panes.len() + 1);
        Self::run_ok(&["select-layout", "-t", &agents_window, layout]).await?;
        let target = format!("{agents_window}.{id}");
        let _ = Self::run(&["select-pane", "-t", &target, "-T", &format!("agent-{id}")]).await;
        panes.insert(id, target);
        Ok(())
    }

    async fn target(&self, id: usize) -> Result<String, PaneError> {
        self.panes
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(PaneError::PaneNotFound(id))
    }

    /// Line-oriented send. Multi-line text is pasted via a tmux paste buffer
    /// to avoid shell-by-line quoting hazards; a single Enter follows.
    pub async fn send_to_pane(&self, id: usize, text: &str, send_enter: bool) -> Result<(), PaneError> {
        let target = self.target(id).await?;
        if text.contains('\n') {
            Self::run_ok(&["set-buffer", text]).await?;
            Self::run_ok(&["paste-buffer", "-t", &target]).await?;
        } else {
            Self::run_ok(&["send-keys", "-t", &target, "-l", text]).await?;
        }
        if send_enter {
            Self::run_ok(&["send-keys", "-t", &target, "Enter"]).await?;
        }
        Ok(())
    }

    pub async fn send_interrupt(&self, id: usize) -> Result<(), PaneError> {
        let target = self.target(id).await?;
        Self::run_ok(&["send-keys", "-t", &target, "C-c"]).await
    }

    /// Last `n_lines` of the pane's visible+scrollback, as plain text.
    pub async fn capture_pane(&self, id: usize, n_lines: usize) -> Result<String, PaneError> {
        let target = self.target(id).await?;
        let start = format!("-{n_lines}");
        let output = Self::run(&["capture-pane", "-t", &target, "-p", "-S", &start]).await?;
        if !output.status.success() {
            return Err(PaneError::CommandFailed(format!(
                "capture-pane failed for pane {id}"
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub async fn pane_exists(&self, id: usize) -> bool {
        match self.target(id).await {
            Ok(target) => Self::run(&["list-panes", "-t", &target])
                .await
                .map(|o| o.status.success())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Best-effort, platform-aware terminal launcher. Refuses to open if
    /// already inside a multiplexer (avoids nesting).
    pub fn open_attached_terminal(&self, preference: Option<&str>) -> Result<(), PaneError> {
        if std::env::var("TMUX").is_ok() {
            return Ok(());
        }
        let candidates: &[&str] = if cfg!(target_os = "macos") {
            &["Terminal.app", "iTerm.app"]
        } else {
            &["gnome-terminal", "konsole", "xterm"]
        };
        let order: Vec<&str> = match preference {
            Some(p) => std::iter::once(p).chain(candidates.iter().copied()).collect(),
            None => candidates.to_vec(),
        };
        for term in order {
            if std::process::Command::new("which")
                .arg(term)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|s| s.success())
                .unwrap_or(false)
            {
                let attach = format!("tmux attach -t {}", self.session_name);
                let _ = std::process::Command::new(term).arg("-e").arg(&attach).spawn();
                return Ok(());
            }
        }
        Ok(())
    }

    /// Tear everything down. Must be callable from a signal handler path, so
    /// it swallows already-dead errors.
    pub async fn kill_session(&self) {
        let _ = Self::run(&["kill-session", "-t", &self.session_name]).await;
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_scales_with_agent_count() {
        assert_eq!(layout_for_pane_count(1), "even-horizontal");
        assert_eq!(layout_for_pane_count(2), "even-horizontal");
        assert_eq!(layout_for_pane_count(3), "tiled");
        assert_eq!(layout_for_pane_count(4), "tiled");
        assert_eq!(layout_for_pane_count(5), "main-horizontal");
        assert_eq!(layout_for_pane_count(6), "main-horizontal");
        assert_eq!(layout_for_pane_count(8), "tiled");
    }

    #[tokio::test]
    async fn pane_not_found_without_session() {
        let manager = PaneManager::new("xenosync-test-nonexistent");
        let result = manager.send_to_pane(0, "hello", true).await;
        assert!(matches!(result, Err(PaneError::PaneNotFound(0))));
    }
}
