//! Orchestrator (§4.8): wires the workspace coordinator, agent manager, and
//! pane manager together, drives the monitor loop, and answers to signals.

use crate::agent::{Agent, AgentStatus};
use crate::agent_manager::AgentManager;
use crate::channel::{AgentChannel, DirectChannel, PaneChannel};
use crate::completion::{file_activity_signal, pattern_signal, time_signal, CompletionSignals, SignalWeights};
use crate::config::XenosyncConfig;
use crate::pane::PaneManager;
use crate::prompt::Prompt;
use crate::session::{FileSessionManager, Session, SessionStatus, StepStatus};
use crate::strategy::{self, AgentQueue};
use crate::workspace::WorkspaceCoordinator;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{interval, Duration};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error(transparent)]
    Session(#[from] crate::session::SessionError),
    #[error(transparent)]
    Workspace(#[from] crate::workspace::WorkspaceError),
    #[error(transparent)]
    AgentManager(#[from] crate::agent_manager::AgentManagerError),
    #[error(transparent)]
    Pane(#[from] crate::pane::PaneError),
    #[error(transparent)]
    Prompt(#[from] crate::prompt::PromptError),
    #[error(transparent)]
    Strategy(#[from] crate::strategy::StrategyError),
    #[error("interrupted")]
    Interrupted,
}

/// Shared flags flipped by the signal-handling task; the monitor loop polls
/// them every tick rather than selecting directly on signal futures, so the
/// same flags can be driven from tests without a real process signal.
#[derive(Clone)]
pub struct ShutdownFlags {
    pub graceful_shutdown: Arc<AtomicBool>,
    pub force_merge: Arc<AtomicBool>,
}

impl ShutdownFlags {
    pub fn new() -> Self {
        Self {
            graceful_shutdown: Arc::new(AtomicBool::new(false)),
            force_merge: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for ShutdownFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Sentinel file an operator can touch to request a force-merge without
/// sending a signal; consumed once observed.
pub fn sentinel_path(project_path: &std::path::Path) -> PathBuf {
    project_path.join(".xenosync_merge_now")
}

pub fn consume_sentinel(project_path: &std::path::Path) -> bool {
    let path = sentinel_path(project_path);
    if path.exists() {
        let _ = std::fs::remove_file(&path);
        true
    } else {
        false
    }
}

/// Install SIGINT/SIGTERM (graceful shutdown) and SIGUSR1 (force merge)
/// handlers on Unix, flipping the shared flags. No-op background task on
/// non-Unix targets, where only the sentinel file remains available.
#[cfg(unix)]
pub fn install_signal_handlers(flags: ShutdownFlags) {
    use tokio::signal::unix::{signal, SignalKind};
    tokio::spawn(async move {
        let mut sigint = signal(SignalKind::interrupt()).expect("sigint handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("sigterm handler");
        let mut sigusr1 = signal(SignalKind::user_defined1()).expect("sigusr1 handler");
        loop {
            tokio::select! {
                _ = sigint.recv() => flags.graceful_shutdown.store(true, Ordering::SeqCst),
                _ = sigterm.recv() => flags.graceful_shutdown.store(true, Ordering::SeqCst),
                _ = sigusr1.recv() => flags.force_merge.store(true, Ordering::SeqCst),
            }
        }
    });
}

#[cfg(not(unix))]
pub fn install_signal_handlers(_flags: ShutdownFlags) {}

pub struct Orchestrator {
    config: XenosyncConfig,
    session_manager: FileSessionManager,
    workspace: WorkspaceCoordinator,
    agent_manager: AgentManager,
    pane_manager: Option<Arc<PaneManager>>,
    session: Session,
    queues: Vec<AgentQueue>,
    flags: ShutdownFlags,
}

impl Orchestrator {
    pub async fn start(
        config: XenosyncConfig,
        sessions_root: PathBuf,
        project_path: PathBuf,
        prompt: Prompt,
    ) -> Result<Self, OrchestratorError> {
        let session_manager = FileSessionManager::new(sessions_root);
        let task_descriptions: Vec<String> = prompt.tasks.iter().map(|t| t.description.clone()).collect();
        let session = session_manager.create_session(
            &prompt.name,
            config.num_agents,
            project_path.clone(),
            task_descriptions,
        )?;

        let mut workspace = WorkspaceCoordinator::new(
            project_path.join("agent-workspaces"),
            matches!(config.project_merge_strategy.as_str(), "git"),
            config.conflict_resolution.clone(),
        );

        let pane_manager = if config.use_tmux {
            let manager = Arc::new(PaneManager::new(FileSessionManager::tmux_session_name(&session.id)));
            manager.create_session(config.num_agents).await?;
            Some(manager)
        } else {
            None
        };

        let mut agent_manager = AgentManager::new(&config);
        for id in 0..config.num_agents {
            let project = workspace.create_agent_workspace(id)?;
            let agent = Agent::new(id, &session.id, project.path.clone());
            let channel = match &pane_manager {
                Some(pm) => AgentChannel::Pane(PaneChannel::new(
                    pm.clone(),
                    id,
                    project.path.clone(),
                    format!("{} {}", config.claude_command, config.claude_args.join(" ")),
                )),
                None => {
                    let mut args = vec![config.claude_command.clone()];
                    args.extend(config.claude_args.clone());
                    AgentChannel::Direct(DirectChannel::new(
                        args.remove(0),
                        args,
                        project.path.clone(),
                    ))
                }
            };
            agent_manager.register(agent, channel);
        }

        agent_manager
            .initialize_agents(&session.id, Duration::from_secs(config.initial_wait_secs))
            .await?;

        let queues = strategy::distribute(&prompt.tasks, config.num_agents)?
            .into_iter()
            .enumerate()
            .map(|(id, q)| AgentQueue::new(id, q))
            .collect();

        session_manager.log_event(&session.id, None, "start", "session started")?;

        Ok(Self {
            config,
            session_manager,
            workspace,
            agent_manager,
            pane_manager,
            session,
            queues,
            flags: ShutdownFlags::new(),
        })
    }

    pub fn flags(&self) -> ShutdownFlags {
        self.flags.clone()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Send each agent its first queued task.
    pub async fn dispatch_initial_tasks(&mut self) -> Result<(), OrchestratorError> {
        for queue in &mut self.queues {
            if let Some(task) = queue.peek_next().cloned() {
                let total = queue.pending.len();
                let message = strategy::task_message(&task, 0, total);
                self.agent_manager.send_to_agent(queue.agent_id, &message).await?;
                self.session_manager.update_step_progress(
                    &self.session.id,
                    task.number,
                    StepStatus::InProgress,
                    Some(queue.agent_id),
                )?;
            }
        }
        Ok(())
    }

    /// One pass of the monitor loop: poll every agent, advance queues for
    /// agents that report completion, and check the shutdown/force-merge
    /// flags. Returns `true` once every queue is drained and finalization
    /// should begin.
    pub async fn monitor_tick(&mut self) -> Result<bool, OrchestratorError> {
        if self.flags.graceful_shutdown.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Interrupted);
        }
        if self.flags.force_merge.load(Ordering::SeqCst) || consume_sentinel(&self.session.project_path) {
            return Ok(true);
        }

        for queue in &mut self.queues {
            if queue.is_exhausted() {
                continue;
            }
            let status = self.agent_manager.poll_agent(queue.agent_id).await?;
            self.workspace.track_agent_progress(queue.agent_id)?;

            if status == AgentStatus::Completed {
                if !self.confirm_completion(queue.agent_id).await? {
                    self.agent_manager.revert_to_working(queue.agent_id).await?;
                    continue;
                }
                let completed_task = queue.advance()?;
                self.session_manager.update_step_progress(
                    &self.session.id,
                    completed_task.number,
                    StepStatus::Completed,
                    Some(queue.agent_id),
                )?;
                self.session_manager.log_event(
                    &self.session.id,
                    Some(queue.agent_id),
                    "task_completed",
                    &completed_task.description,
                )?;

                if let Some(next_task) = queue.peek_next().cloned() {
                    let position = queue.completed.len();
                    let total = position + queue.pending.len();
                    let message = strategy::task_message(&next_task, position, total);
                    self.agent_manager.send_to_agent(queue.agent_id, &message).await?;
                } else {
                    self.workspace.complete_agent_project(queue.agent_id)?;
                }
            } else if status == AgentStatus::Error {
                match self.agent_manager.attempt_recovery(queue.agent_id).await {
                    Ok(delay) => {
                        tokio::time::sleep(delay).await;
                        self.agent_manager.mark_recovered(queue.agent_id).await?;
                        if let Some(task) = queue.peek_next().cloned() {
                            let message = strategy::task_message(&task, queue.completed.len(), queue.completed.len() + queue.pending.len());
                            self.agent_manager.send_to_agent(queue.agent_id, &message).await?;
                        }
                    }
                    Err(_) => {
                        self.session_manager.log_event(
                            &self.session.id,
                            Some(queue.agent_id),
                            "recovery_exhausted",
                            "agent abandoned after repeated errors",
                        )?;
                    }
                }
            }
        }

        Ok(strategy::all_queues_exhausted(&self.queues))
    }

    /// Decide whether an agent that `poll_agent` provisionally marked
    /// `Completed` should actually be allowed to advance (§4.5/§4.6 step 3):
    /// skip entirely if it hasn't worked the configured minimum duration,
    /// otherwise blend the weighted confidence signals and require both the
    /// threshold and the project-quality gate.
    async fn confirm_completion(&mut self, agent_id: usize) -> Result<bool, OrchestratorError> {
        let elapsed_minutes = self.agent_manager.task_duration_minutes(agent_id).await?;
        if elapsed_minutes < self.config.minimum_work_duration_minutes as f64 {
            return Ok(false);
        }

        let project = self.workspace.track_agent_progress(agent_id)?;
        let file_activity_score = file_activity_signal(
            &project.path,
            self.config.file_activity_window_minutes,
            self.config.file_activity_timeout_minutes,
        );
        let verification_score = self.verification_score(agent_id).await?;
        let task_started_at = self.agent_manager.task_started_at(agent_id).await?;
        let time_score = time_signal(task_started_at, self.config.task_minimum_duration_secs);

        let signals = CompletionSignals {
            // poll_agent already ran the pattern/working check to reach here.
            pattern_score: 1.0,
            file_activity_score,
            verification_score,
            time_score,
        };
        let weights = SignalWeights {
            patterns: self.config.completion_weight_patterns,
            file_activity: self.config.completion_weight_file_activity,
            verification: self.config.completion_weight_verification,
            time: self.config.completion_weight_time,
        };
        let overall = signals.overall(&weights);
        self.agent_manager.record_confidence(agent_id, overall).await?;

        if overall < self.config.completion_confidence_threshold {
            return Ok(false);
        }
        Ok(self.workspace.passes_quality_gate(
            agent_id,
            self.config.project_quality_threshold,
            self.config.project_substantial_work_threshold,
        ))
    }

    /// Semantic-verification signal (§4.5 signal 3): re-verify only once
    /// `completion_verification_interval_secs` has elapsed since the last
    /// check, otherwise reuse the cached score.
    async fn verification_score(&self, agent_id: usize) -> Result<f64, OrchestratorError> {
        if !self.config.completion_verification_enabled {
            return Ok(0.5);
        }
        let cached = self.agent_manager.last_verification(agent_id).await?;
        let stale = match cached {
            None => true,
            Some((_, at)) => {
                (chrono::Utc::now() - at).num_seconds() > self.config.completion_verification_interval_secs as i64
            }
        };
        if !stale {
            return Ok(cached.map(|(score, _)| score).unwrap_or(0.5));
        }
        let (score, _confirmed) = self
            .agent_manager
            .verify_completion(
                agent_id,
                &self.config.completion_verification_message,
                Duration::from_secs(self.config.verification_response_wait_secs),
                self.config.verification_response_lines,
            )
            .await?;
        Ok(score)
    }

    /// Run the monitor loop until every queue drains, a shutdown signal
    /// arrives, or a force-merge is requested.
    pub async fn run_until_complete(&mut self) -> Result<(), OrchestratorError> {
        let mut ticker = interval(Duration::from_secs(self.config.agent_monitor_interval_secs));
        loop {
            ticker.tick().await;
            if self.monitor_tick().await? {
                break;
            }
        }
        Ok(())
    }

    /// Run the finalization agent (§4.7) against the merged project, using
    /// the default task list unless the operator configured an override.
    pub async fn run_finalization(&mut self) -> Result<(), OrchestratorError> {
        if !self.config.enable_finalization {
            return Ok(());
        }
        let ids: Vec<usize> = (0..self.config.num_agents).collect();
        let final_project = self.workspace.merge_agent_projects(&ids)?;

        let finalization_id = self.config.num_agents;
        if let Some(pm) = &self.pane_manager {
            pm.add_pane(finalization_id).await?;
        }
        let channel = match &self.pane_manager {
            Some(pm) => AgentChannel::Pane(PaneChannel::new(
                pm.clone(),
                finalization_id,
                final_project.path.clone(),
                format!("{} {}", self.config.claude_command, self.config.claude_args.join(" ")),
            )),
            None => {
                let mut args = vec![self.config.claude_command.clone()];
                args.extend(self.config.claude_args.clone());
                AgentChannel::Direct(DirectChannel::new(args.remove(0), args, final_project.path.clone()))
            }
        };

        let agent = self
            .agent_manager
            .spawn_finalization_agent(finalization_id, &self.session.id, final_project.path.clone(), channel)
            .await;
        self.agent_manager
            .start_agent(&self.session.id, finalization_id, Duration::from_secs(self.config.initial_wait_secs))
            .await?;

        let tasks = if self.config.finalization_tasks.is_empty() {
            strategy::default_finalization_tasks()
        } else {
            self.config.finalization_tasks.clone()
        };
        let combined = tasks.join("\n");
        self.agent_manager.send_to_agent(agent.id, &combined).await?;

        let timeout = Duration::from_secs(self.config.finalization_timeout_secs);
        let deadline = tokio::time::Instant::now() + timeout;
        let mut ticker = interval(Duration::from_secs(self.config.wait_check_interval_secs));
        loop {
            ticker.tick().await;
            let status = self.agent_manager.poll_agent(agent.id).await?;
            if status == crate::agent::AgentStatus::Completed || tokio::time::Instant::now() >= deadline {
                break;
            }
        }
        Ok(())
    }

    /// Graceful or force shutdown: stop every agent and kill the pane
    /// session, leaving the merged project untouched on disk.
    pub async fn shutdown(&mut self, status: SessionStatus) -> Result<(), OrchestratorError> {
        self.agent_manager.stop_all().await;
        if let Some(pm) = &self.pane_manager {
            pm.kill_session().await;
        }
        self.session_manager.update_session_status(&self.session.id, status)?;
        if self.config.archive_completed && status == SessionStatus::Completed {
            let archive_root = self.session.project_path.join("xsync-archive");
            let _ = self.session_manager.archive_completed(&archive_root);
        }
        Ok(())
    }

    /// Composite confidence signal used purely for status reporting (the
    /// monitor loop itself drives off pattern/error recognition; this is
    /// what `xenosync status` surfaces to the operator).
    pub async fn completion_confidence(&self, agent_id: usize) -> Result<f64, OrchestratorError> {
        let output = self.agent_manager.recent_output(agent_id, 20).await?;
        let project = self.workspace.project(agent_id)?;
        let cached_verification = self.agent_manager.last_verification(agent_id).await?;
        let task_started_at = self.agent_manager.task_started_at(agent_id).await?;

        let signals = CompletionSignals {
            pattern_score: pattern_signal(&output, &[]),
            file_activity_score: file_activity_signal(
                &project.path,
                self.config.file_activity_window_minutes,
                self.config.file_activity_timeout_minutes,
            ),
            verification_score: cached_verification.map(|(score, _)| score).unwrap_or(0.5),
            time_score: time_signal(task_started_at, self.config.task_minimum_duration_secs),
        };
        let weights = SignalWeights {
            patterns: self.config.completion_weight_patterns,
            file_activity: self.config.completion_weight_file_activity,
            verification: self.config.completion_weight_verification,
            time: self.config.completion_weight_time,
        };
        Ok(signals.overall(&weights))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_path_is_project_relative() {
        let path = sentinel_path(std::path::Path::new("/tmp/proj"));
        assert_eq!(path, PathBuf::from("/tmp/proj/.xenosync_merge_now"));
    }

    #[test]
    fn consume_sentinel_removes_file_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(sentinel_path(dir.path()), "").unwrap();
        assert!(consume_sentinel(dir.path()));
        assert!(!consume_sentinel(dir.path()));
    }

    #[tokio::test]
    async fn shutdown_flags_default_to_false() {
        let flags = ShutdownFlags::new();
        assert!(!flags.graceful_shutdown.load(Ordering::SeqCst));
        assert!(!flags.force_merge.load(Ordering::SeqCst));
    }
}
