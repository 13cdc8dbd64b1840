//! Agent manager (§4.4): owns the live agent set, drives the monitor loop,
//! and applies exponential-backoff recovery when an agent's output matches
//! an error pattern.

use crate::agent::{Agent, AgentStatus};
use crate::channel::{AgentChannel, ChannelError};
use crate::completion::parse_verification_response;
use crate::config::XenosyncConfig;
use crate::patterns;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum AgentManagerError {
    #[error("agent {0} not found")]
    AgentNotFound(usize),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("agent {0} exhausted recovery attempts")]
    RecoveryExhausted(usize),
}

/// Backoff delays for error recovery, in seconds: 5, 10, 20, 40 (§4.4).
pub const RECOVERY_BACKOFF_SECS: [u64; 4] = [5, 10, 20, 40];
pub const MAX_RECOVERY_ATTEMPTS: u32 = 3;

pub struct AgentManager {
    agents: RwLock<HashMap<usize, Agent>>,
    channels: HashMap<usize, AgentChannel>,
    extra_completion_patterns: Vec<regex::Regex>,
    message_grace_period_secs: i64,
}

impl AgentManager {
    pub fn new(config: &XenosyncConfig) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            channels: HashMap::new(),
            extra_completion_patterns: patterns::compile_extra_patterns(&config.semantic_completion_patterns),
            message_grace_period_secs: config.message_grace_period_secs as i64,
        }
    }

    /// Register an agent record and its channel together; both must exist
    /// before the monitor loop can observe the agent.
    pub fn register(&mut self, agent: Agent, channel: AgentChannel) {
        self.channels.insert(agent.id, channel);
        let agents = self.agents.get_mut();
        agents.insert(agent.id, agent);
    }

    pub async fn initialize_agents(
        &self,
        session_id: &str,
        initial_wait: Duration,
    ) -> Result<(), AgentManagerError> {
        let ids: Vec<usize> = self.channels.keys().copied().collect();
        for id in ids {
            let uid = {
                let agents = self.agents.read().await;
                agents
                    .get(&id)
                    .map(|a| a.uid.clone())
                    .ok_or(AgentManagerError::AgentNotFound(id))?
            };
            let channel = self.channels.get(&id).ok_or(AgentManagerError::AgentNotFound(id))?;
            channel.start(session_id, &uid, id, initial_wait).await?;
        }
        Ok(())
    }

    /// Start exactly one already-registered channel, leaving every other
    /// agent's running process untouched. Used by finalization (§4.7), which
    /// must not re-send the startup sequence into the work agents' panes.
    pub async fn start_agent(&self, session_id: &str, id: usize, initial_wait: Duration) -> Result<(), AgentManagerError> {
        let uid = {
            let agents = self.agents.read().await;
            agents
                .get(&id)
                .map(|a| a.uid.clone())
                .ok_or(AgentManagerError::AgentNotFound(id))?
        };
        let channel = self.channels.get(&id).ok_or(AgentManagerError::AgentNotFound(id))?;
        channel.start(session_id, &uid, id, initial_wait).await?;
        Ok(())
    }

    pub async fn send_to_agent(&self, id: usize, message: &str) -> Result<(), AgentManagerError> {
        let channel = self.channels.get(&id).ok_or(AgentManagerError::AgentNotFound(id))?;
        channel.send(message).await?;
        let mut agents = self.agents.write().await;
        if let Some(agent) = agents.get_mut(&id) {
            agent.mark_message_sent();
        }
        Ok(())
    }

    pub async fn broadcast_to_all(&self, message: &str) -> Result<(), AgentManagerError> {
        let ids: Vec<usize> = self.channels.keys().copied().collect();
        for id in ids {
            self.send_to_agent(id, message).await?;
        }
        Ok(())
    }

    pub async fn recent_output(&self, id: usize, n_lines: usize) -> Result<String, AgentManagerError> {
        let channel = self.channels.get(&id).ok_or(AgentManagerError::AgentNotFound(id))?;
        Ok(channel.recent_output(n_lines, 0).await)
    }

    pub async fn status(&self, id: usize) -> Result<AgentStatus, AgentManagerError> {
        let agents = self.agents.read().await;
        agents
            .get(&id)
            .map(|a| a.status)
            .ok_or(AgentManagerError::AgentNotFound(id))
    }

    pub async fn all_statuses(&self) -> HashMap<usize, AgentStatus> {
        let agents = self.agents.read().await;
        agents.iter().map(|(id, a)| (*id, a.status)).collect()
    }

    /// One polling pass over one agent: read recent output, run pattern
    /// recognition, apply the result to the agent's status. Error patterns
    /// take precedence over working/idle classification.
    pub async fn poll_agent(&self, id: usize) -> Result<AgentStatus, AgentManagerError> {
        let output = self.recent_output(id, patterns::TRAILING_LINES).await?;

        if patterns::matches_error(&output) {
            let mut agents = self.agents.write().await;
            let agent = agents.get_mut(&id).ok_or(AgentManagerError::AgentNotFound(id))?;
            agent.enter_error("agent output matched an error pattern");
            return Ok(agent.status);
        }

        let within_grace_period = {
            let agents = self.agents.read().await;
            let agent = agents.get(&id).ok_or(AgentManagerError::AgentNotFound(id))?;
            agent
                .since_last_message_secs()
                .map(|secs| secs < self.message_grace_period_secs)
                .unwrap_or(false)
        };

        let still_working = patterns::check_agent_working(&output, &self.extra_completion_patterns, within_grace_period);

        let mut agents = self.agents.write().await;
        let agent = agents.get_mut(&id).ok_or(AgentManagerError::AgentNotFound(id))?;
        agent.last_activity = chrono::Utc::now();
        if !still_working && agent.status == AgentStatus::Working {
            agent.status = AgentStatus::Completed;
        }
        Ok(agent.status)
    }

    /// Attempt recovery from `Error` status with exponential backoff. Caller
    /// is expected to `sleep` for the returned delay before resending a
    /// message; returns `RecoveryExhausted` once attempts are used up.
    pub async fn attempt_recovery(&self, id: usize) -> Result<Duration, AgentManagerError> {
        let mut agents = self.agents.write().await;
        let agent = agents.get_mut(&id).ok_or(AgentManagerError::AgentNotFound(id))?;

        if agent.recovery_attempts as usize >= RECOVERY_BACKOFF_SECS.len().min(MAX_RECOVERY_ATTEMPTS as usize) {
            return Err(AgentManagerError::RecoveryExhausted(id));
        }
        let delay = RECOVERY_BACKOFF_SECS[agent.recovery_attempts as usize];
        agent.recovery_attempts += 1;
        Ok(Duration::from_secs(delay))
    }

    pub async fn mark_recovered(&self, id: usize) -> Result<(), AgentManagerError> {
        let mut agents = self.agents.write().await;
        let agent = agents.get_mut(&id).ok_or(AgentManagerError::AgentNotFound(id))?;
        agent.recover();
        Ok(())
    }

    /// Minutes elapsed since the agent's current task started (§4.5 time
    /// factors / the `minimum_work_duration_minutes` gate).
    pub async fn task_duration_minutes(&self, id: usize) -> Result<f64, AgentManagerError> {
        let agents = self.agents.read().await;
        let agent = agents.get(&id).ok_or(AgentManagerError::AgentNotFound(id))?;
        Ok(agent.task_duration_minutes())
    }

    pub async fn task_started_at(&self, id: usize) -> Result<Option<DateTime<Utc>>, AgentManagerError> {
        let agents = self.agents.read().await;
        let agent = agents.get(&id).ok_or(AgentManagerError::AgentNotFound(id))?;
        Ok(agent.task_started_at)
    }

    /// Cached semantic-verification score and when it was taken, so the
    /// caller can decide whether `completion_verification_interval` has
    /// elapsed before re-verifying.
    pub async fn last_verification(&self, id: usize) -> Result<Option<(f64, DateTime<Utc>)>, AgentManagerError> {
        let agents = self.agents.read().await;
        let agent = agents.get(&id).ok_or(AgentManagerError::AgentNotFound(id))?;
        Ok(agent.last_verification)
    }

    /// Actively verify completion (§4.5 signal 3): send the configured
    /// verification message, wait for a reply, and score it additively.
    pub async fn verify_completion(
        &self,
        id: usize,
        message: &str,
        wait: Duration,
        response_lines: usize,
    ) -> Result<(f64, bool), AgentManagerError> {
        self.send_to_agent(id, message).await?;
        tokio::time::sleep(wait).await;
        let output = self.recent_output(id, response_lines).await?;
        let (score, confirmed) = parse_verification_response(&output);
        let mut agents = self.agents.write().await;
        let agent = agents.get_mut(&id).ok_or(AgentManagerError::AgentNotFound(id))?;
        agent.last_verification = Some((score, chrono::Utc::now()));
        Ok((score, confirmed))
    }

    pub async fn record_confidence(&self, id: usize, overall: f64) -> Result<(), AgentManagerError> {
        let mut agents = self.agents.write().await;
        let agent = agents.get_mut(&id).ok_or(AgentManagerError::AgentNotFound(id))?;
        agent.record_confidence(overall);
        Ok(())
    }

    /// Undo `poll_agent`'s provisional `Completed` transition when the
    /// weighted confidence or project-quality gate rejects it, so the next
    /// tick keeps treating the agent as still working.
    pub async fn revert_to_working(&self, id: usize) -> Result<(), AgentManagerError> {
        let mut agents = self.agents.write().await;
        let agent = agents.get_mut(&id).ok_or(AgentManagerError::AgentNotFound(id))?;
        if agent.status == AgentStatus::Completed {
            agent.status = AgentStatus::Working;
        }
        Ok(())
    }

    /// Spawn the finalization agent (id == num_agents) into an existing
    /// channel registration, distinct from the numbered work agents.
    pub async fn spawn_finalization_agent(
        &mut self,
        num_agents: usize,
        session_prefix: &str,
        project_path: std::path::PathBuf,
        channel: AgentChannel,
    ) -> Agent {
        let agent = Agent::new(num_agents, session_prefix, project_path);
        self.channels.insert(num_agents, channel);
        self.agents.get_mut().insert(num_agents, agent.clone());
        agent
    }

    pub async fn stop_all(&self) {
        for channel in self.channels.values() {
            let _ = channel.stop().await;
        }
        let mut agents = self.agents.write().await;
        for agent in agents.values_mut() {
            agent.status = AgentStatus::Stopped;
        }
    }

    pub async fn agent_ids(&self) -> Vec<usize> {
        let agents = self.agents.read().await;
        let mut ids: Vec<usize> = agents.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::DirectChannel;

    fn manager_with_config() -> AgentManager {
        AgentManager::new(&XenosyncConfig::default())
    }

    #[tokio::test]
    async fn register_and_initialize_agents() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager_with_config();
        let agent = Agent::new(0, "sess-1", dir.path().to_path_buf());
        let channel = AgentChannel::Direct(DirectChannel::new(
            "sh",
            vec!["-c".into(), "echo ready".into()],
            dir.path().to_path_buf(),
        ));
        manager.register(agent, channel);

        manager
            .initialize_agents("sess-1", Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(manager.status(0).await.unwrap(), AgentStatus::Starting);
    }

    #[tokio::test]
    async fn poll_agent_detects_error_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager_with_config();
        let mut agent = Agent::new(0, "sess-1", dir.path().to_path_buf());
        agent.status = AgentStatus::Working;
        let channel = AgentChannel::Direct(DirectChannel::new(
            "sh",
            vec!["-c".into(), "echo 'rate limit exceeded, please retry'".into()],
            dir.path().to_path_buf(),
        ));
        manager.register(agent, channel);
        manager
            .initialize_agents("sess-1", Duration::from_millis(100))
            .await
            .unwrap();

        let status = manager.poll_agent(0).await.unwrap();
        assert_eq!(status, AgentStatus::Error);
    }

    #[tokio::test]
    async fn poll_agent_marks_completed_when_no_longer_working() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager_with_config();
        let mut agent = Agent::new(0, "sess-1", dir.path().to_path_buf());
        agent.status = AgentStatus::Working;
        let channel = AgentChannel::Direct(DirectChannel::new(
            "sh",
            vec!["-c".into(), "echo 'All done, task completed.'".into()],
            dir.path().to_path_buf(),
        ));
        manager.register(agent, channel);
        manager
            .initialize_agents("sess-1", Duration::from_millis(100))
            .await
            .unwrap();

        let status = manager.poll_agent(0).await.unwrap();
        assert_eq!(status, AgentStatus::Completed);
    }

    #[tokio::test]
    async fn recovery_backoff_increases_then_exhausts() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager_with_config();
        let mut agent = Agent::new(0, "sess-1", dir.path().to_path_buf());
        agent.enter_error("boom");
        let channel = AgentChannel::Direct(DirectChannel::new("sh", vec!["-c".into(), "exit 0".into()], dir.path().to_path_buf()));
        manager.register(agent, channel);

        let d1 = manager.attempt_recovery(0).await.unwrap();
        let d2 = manager.attempt_recovery(0).await.unwrap();
        let d3 = manager.attempt_recovery(0).await.unwrap();
        assert_eq!(d1, Duration::from_secs(5));
        assert_eq!(d2, Duration::from_secs(10));
        assert_eq!(d3, Duration::from_secs(20));
        assert!(matches!(
            manager.attempt_recovery(0).await,
            Err(AgentManagerError::RecoveryExhausted(0))
        ));
    }

    #[tokio::test]
    async fn mark_recovered_resets_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager_with_config();
        let mut agent = Agent::new(0, "sess-1", dir.path().to_path_buf());
        agent.enter_error("boom");
        let channel = AgentChannel::Direct(DirectChannel::new("sh", vec!["-c".into(), "exit 0".into()], dir.path().to_path_buf()));
        manager.register(agent, channel);
        manager.attempt_recovery(0).await.unwrap();
        manager.mark_recovered(0).await.unwrap();
        assert_eq!(manager.status(0).await.unwrap(), AgentStatus::Working);
    }

    #[tokio::test]
    async fn start_agent_only_starts_the_named_channel() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager_with_config();
        let agent = Agent::new(0, "sess-1", dir.path().to_path_buf());
        let channel = AgentChannel::Direct(DirectChannel::new(
            "sh",
            vec!["-c".into(), "echo ready".into()],
            dir.path().to_path_buf(),
        ));
        manager.register(agent, channel);
        manager.start_agent("sess-1", 0, Duration::from_millis(50)).await.unwrap();
        assert_eq!(manager.status(0).await.unwrap(), AgentStatus::Starting);
    }

    #[tokio::test]
    async fn revert_to_working_only_applies_when_completed() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager_with_config();
        let mut agent = Agent::new(0, "sess-1", dir.path().to_path_buf());
        agent.status = AgentStatus::Completed;
        let channel = AgentChannel::Direct(DirectChannel::new("sh", vec!["-c".into(), "exit 0".into()], dir.path().to_path_buf()));
        manager.register(agent, channel);
        manager.revert_to_working(0).await.unwrap();
        assert_eq!(manager.status(0).await.unwrap(), AgentStatus::Working);
    }

    #[tokio::test]
    async fn unknown_agent_returns_not_found() {
        let manager = manager_with_config();
        assert!(matches!(
            manager.status(42).await,
            Err(AgentManagerError::AgentNotFound(42))
        ));
    }
}
