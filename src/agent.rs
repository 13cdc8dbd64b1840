use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Status of one agent's lifecycle, projected from pattern recognition over
/// its terminal output. Transitions are monotonic except `Working -> Working`
/// (new task delivered) and `Error -> Working` (recovery succeeded).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Starting,
    Working,
    Completed,
    Error,
    Stopped,
}

impl AgentStatus {
    /// `Completed`/`Stopped` are terminal for the orchestration's purposes;
    /// the underlying process may still be running.
    pub fn is_terminal(self) -> bool {
        matches!(self, AgentStatus::Completed | AgentStatus::Stopped)
    }
}

/// One completion-confidence reading, kept for the agent's bounded history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConfidenceReading {
    pub overall: f64,
    pub at: DateTime<Utc>,
}

/// Maximum confidence readings retained per agent (§3 invariant).
pub const CONFIDENCE_HISTORY_CAP: usize = 10;

/// One external interactive agent process plus the record tracking it.
#[derive(Debug, Clone)]
pub struct Agent {
    pub id: usize,
    pub uid: String,
    pub session_id: String,
    pub status: AgentStatus,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub last_message_sent: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub recovery_attempts: u32,
    pub current_task: Option<u32>,
    pub task_started_at: Option<DateTime<Utc>>,
    pub last_completion_check: Option<DateTime<Utc>>,
    pub project_path: PathBuf,
    pub confidence_history: Vec<ConfidenceReading>,
    /// Cached semantic-verification score and when it was last taken.
    pub last_verification: Option<(f64, DateTime<Utc>)>,
}

impl Agent {
    /// `session_prefix` ties the uid to the owning session for log/grep
    /// friendliness; the finalization agent uses `id == num_agents`.
    pub fn new(id: usize, session_prefix: &str, project_path: PathBuf) -> Self {
        let now = Utc::now();
        let uid = format!("{session_prefix}-agent-{id}-{}", now.timestamp());
        Self {
            id,
            uid,
            session_id: session_prefix.to_string(),
            status: AgentStatus::Starting,
            started_at: now,
            last_activity: now,
            last_message_sent: None,
            error: None,
            recovery_attempts: 0,
            current_task: None,
            task_started_at: None,
            last_completion_check: None,
            project_path,
            confidence_history: Vec::new(),
            last_verification: None,
        }
    }

    pub fn is_finalization_agent(&self, num_agents: usize) -> bool {
        self.id == num_agents
    }

    /// Start a new task: resets the time baseline used by the time signal.
    pub fn start_task(&mut self, task_number: u32) {
        self.current_task = Some(task_number);
        self.task_started_at = Some(Utc::now());
        self.status = AgentStatus::Working;
    }

    pub fn mark_message_sent(&mut self) {
        self.last_message_sent = Some(Utc::now());
        self.last_activity = Utc::now();
        self.status = AgentStatus::Working;
    }

    pub fn record_confidence(&mut self, overall: f64) {
        self.confidence_history.push(ConfidenceReading {
            overall,
            at: Utc::now(),
        });
        if self.confidence_history.len() > CONFIDENCE_HISTORY_CAP {
            let excess = self.confidence_history.len() - CONFIDENCE_HISTORY_CAP;
            self.confidence_history.drain(0..excess);
        }
    }

    /// Seconds since a message was sent to this agent, if any.
    pub fn since_last_message_secs(&self) -> Option<i64> {
        self.last_message_sent
            .map(|t| (Utc::now() - t).num_seconds())
    }

    /// Minutes elapsed since the current task started.
    pub fn task_duration_minutes(&self) -> f64 {
        match self.task_started_at {
            Some(t) => (Utc::now() - t).num_seconds() as f64 / 60.0,
            None => 0.0,
        }
    }

    pub fn enter_error(&mut self, message: impl Into<String>) {
        self.status = AgentStatus::Error;
        self.error = Some(message.into());
    }

    pub fn recover(&mut self) {
        self.status = AgentStatus::Working;
        self.error = None;
        self.recovery_attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_agent_starts_in_starting_status() {
        let agent = Agent::new(0, "sess-1", PathBuf::from("/tmp/proj"));
        assert_eq!(agent.status, AgentStatus::Starting);
        assert!(agent.uid.starts_with("sess-1-agent-0-"));
    }

    #[test]
    fn finalization_agent_id_is_one_past_last() {
        let agent = Agent::new(2, "sess-1", PathBuf::from("/tmp/proj"));
        assert!(agent.is_finalization_agent(2));
        let regular = Agent::new(1, "sess-1", PathBuf::from("/tmp/proj"));
        assert!(!regular.is_finalization_agent(2));
    }

    #[test]
    fn confidence_history_bounded() {
        let mut agent = Agent::new(0, "sess-1", PathBuf::from("/tmp/proj"));
        for i in 0..20 {
            agent.record_confidence(i as f64 / 20.0);
        }
        assert_eq!(agent.confidence_history.len(), CONFIDENCE_HISTORY_CAP);
        // Oldest readings are evicted first.
        assert!(agent.confidence_history[0].overall > 0.0);
    }

    #[test]
    fn start_task_resets_baseline() {
        let mut agent = Agent::new(0, "sess-1", PathBuf::from("/tmp/proj"));
        agent.start_task(1);
        assert_eq!(agent.current_task, Some(1));
        assert_eq!(agent.status, AgentStatus::Working);
        assert!(agent.task_started_at.is_some());
    }

    #[test]
    fn recover_resets_attempts_and_clears_error() {
        let mut agent = Agent::new(0, "sess-1", PathBuf::from("/tmp/proj"));
        agent.enter_error("rate limited");
        agent.recovery_attempts = 2;
        agent.recover();
        assert_eq!(agent.status, AgentStatus::Working);
        assert_eq!(agent.recovery_attempts, 0);
        assert!(agent.error.is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(AgentStatus::Completed.is_terminal());
        assert!(AgentStatus::Stopped.is_terminal());
        assert!(!AgentStatus::Working.is_terminal());
        assert!(!AgentStatus::Error.is_terminal());
        assert!(!AgentStatus::Starting.is_terminal());
    }
}
