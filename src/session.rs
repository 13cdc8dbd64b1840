//! Session and step persistence (§6), grounded in the original
//! `FileSessionManager`: one directory per session under `sessions_dir`,
//! holding `session.json`, `steps.json`, and an append-only `events.log`,
//! plus a top-level `sessions_index.json` for fast listing.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("session {0} not found")]
    NotFound(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
    Interrupted,
    Paused,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStep {
    pub number: u32,
    pub description: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub assigned_agent: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub at: DateTime<Utc>,
    pub agent_id: Option<usize>,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub status: SessionStatus,
    pub num_agents: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub project_path: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionsIndex {
    entries: HashMap<String, IndexEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    name: String,
    status: SessionStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatistics {
    pub total_sessions: usize,
    pub completed_sessions: usize,
    pub failed_sessions: usize,
    pub success_rate: f64,
    pub average_duration_secs: f64,
}

pub struct FileSessionManager {
    root: PathBuf,
}

impl FileSessionManager {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn session_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn short_id(id: &str) -> &str {
        &id[..id.len().min(8)]
    }

    pub fn tmux_session_name(id: &str) -> String {
        format!("xsync-{}", Self::short_id(id))
    }

    pub fn create_session(
        &self,
        name: &str,
        num_agents: usize,
        project_path: PathBuf,
        steps: Vec<String>,
    ) -> Result<Session, SessionError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let session = Session {
            id: id.clone(),
            name: name.to_string(),
            status: SessionStatus::Active,
            num_agents,
            created_at: now,
            updated_at: now,
            completed_at: None,
            project_path,
        };

        let dir = self.session_dir(&id);
        std::fs::create_dir_all(&dir)?;
        self.write_session(&session)?;

        let sync_steps: Vec<SyncStep> = steps
            .into_iter()
            .enumerate()
            .map(|(i, description)| SyncStep {
                number: i as u32 + 1,
                description,
                status: StepStatus::Pending,
                started_at: None,
                completed_at: None,
                assigned_agent: None,
            })
            .collect();
        self.write_steps(&id, &sync_steps)?;
        std::fs::write(dir.join("events.log"), "")?;

        self.update_index(&session)?;
        Ok(session)
    }

    fn write_session(&self, session: &Session) -> Result<(), SessionError> {
        let path = self.session_dir(&session.id).join("session.json");
        std::fs::write(path, serde_json::to_string_pretty(session)?)?;
        Ok(())
    }

    fn write_steps(&self, id: &str, steps: &[SyncStep]) -> Result<(), SessionError> {
        let path = self.session_dir(id).join("steps.json");
        std::fs::write(path, serde_json::to_string_pretty(steps)?)?;
        Ok(())
    }

    fn update_index(&self, session: &Session) -> Result<(), SessionError> {
        let index_path = self.root.join("sessions_index.json");
        let mut index: SessionsIndex = if index_path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&index_path)?)?
        } else {
            SessionsIndex::default()
        };
        index.entries.insert(
            session.id.clone(),
            IndexEntry {
                name: session.name.clone(),
                status: session.status,
                created_at: session.created_at,
                updated_at: session.updated_at,
            },
        );
        std::fs::create_dir_all(&self.root)?;
        std::fs::write(index_path, serde_json::to_string_pretty(&index)?)?;
        Ok(())
    }

    pub fn get_session(&self, id: &str) -> Result<Session, SessionError> {
        let path = self.session_dir(id).join("session.json");
        if !path.exists() {
            return Err(SessionError::NotFound(id.to_string()));
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }

    pub fn get_session_steps(&self, id: &str) -> Result<Vec<SyncStep>, SessionError> {
        let path = self.session_dir(id).join("steps.json");
        if !path.exists() {
            return Err(SessionError::NotFound(id.to_string()));
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }

    pub fn update_step_progress(
        &self,
        id: &str,
        step_number: u32,
        status: StepStatus,
        assigned_agent: Option<usize>,
    ) -> Result<(), SessionError> {
        let mut steps = self.get_session_steps(id)?;
        if let Some(step) = steps.iter_mut().find(|s| s.number == step_number) {
            step.status = status;
            step.assigned_agent = assigned_agent.or(step.assigned_agent);
            match status {
                StepStatus::InProgress if step.started_at.is_none() => step.started_at = Some(Utc::now()),
                StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped => {
                    step.completed_at = Some(Utc::now())
                }
                _ => {}
            }
        }
        self.write_steps(id, &steps)
    }

    pub fn update_session_status(&self, id: &str, status: SessionStatus) -> Result<Session, SessionError> {
        let mut session = self.get_session(id)?;
        session.status = status;
        session.updated_at = Utc::now();
        if matches!(status, SessionStatus::Completed | SessionStatus::Failed) {
            session.completed_at = Some(session.updated_at);
        }
        self.write_session(&session)?;
        self.update_index(&session)?;
        Ok(session)
    }

    pub fn log_event(
        &self,
        id: &str,
        agent_id: Option<usize>,
        kind: &str,
        message: &str,
    ) -> Result<(), SessionError> {
        let event = SessionEvent {
            at: Utc::now(),
            agent_id,
            kind: kind.to_string(),
            message: message.to_string(),
        };
        let line = serde_json::to_string(&event)?;
        let path = self.session_dir(id).join("events.log");
        let mut file = std::fs::OpenOptions::new().append(true).create(true).open(path)?;
        use std::io::Write;
        writeln!(file, "{line}")?;
        Ok(())
    }

    pub fn get_session_events(&self, id: &str) -> Result<Vec<SessionEvent>, SessionError> {
        let path = self.session_dir(id).join("events.log");
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(path)?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(SessionError::from))
            .collect()
    }

    pub fn get_active_sessions(&self) -> Result<Vec<Session>, SessionError> {
        self.get_sessions_by_status(SessionStatus::Active)
    }

    fn get_sessions_by_status(&self, status: SessionStatus) -> Result<Vec<Session>, SessionError> {
        Ok(self
            .get_all_sessions(None)?
            .into_iter()
            .filter(|s| s.status == status)
            .collect())
    }

    /// All sessions, newest first, optionally capped at `limit`.
    pub fn get_all_sessions(&self, limit: Option<usize>) -> Result<Vec<Session>, SessionError> {
        let mut sessions = Vec::new();
        if !self.root.exists() {
            return Ok(sessions);
        }
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Ok(session) = self.get_session(&entry.file_name().to_string_lossy()) {
                sessions.push(session);
            }
        }
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            sessions.truncate(limit);
        }
        Ok(sessions)
    }

    pub fn count_sessions(&self) -> Result<usize, SessionError> {
        Ok(self.get_all_sessions(None)?.len())
    }

    /// Kill the session's tmux session (by convention name) and mark it
    /// interrupted on disk.
    pub async fn kill_session(&self, id: &str) -> Result<Session, SessionError> {
        let tmux_name = Self::tmux_session_name(id);
        let _ = tokio::process::Command::new("tmux")
            .args(["kill-session", "-t", &tmux_name])
            .output()
            .await;
        self.update_session_status(id, SessionStatus::Interrupted)
    }

    pub fn archive_completed(&self, archive_root: &Path) -> Result<usize, SessionError> {
        let mut archived = 0;
        for session in self.get_sessions_by_status(SessionStatus::Completed)? {
            let src = self.session_dir(&session.id);
            let dst = archive_root.join(&session.id);
            std::fs::create_dir_all(archive_root)?;
            if src.exists() {
                std::fs::rename(src, dst)?;
                archived += 1;
            }
        }
        Ok(archived)
    }

    pub fn resume_session(&self, id: &str) -> Result<Session, SessionError> {
        self.update_session_status(id, SessionStatus::Active)
    }

    /// Success rate and average duration over sessions created in the
    /// trailing `days` days.
    pub fn get_statistics(&self, days: i64) -> Result<SessionStatistics, SessionError> {
        let cutoff = Utc::now() - ChronoDuration::days(days);
        let sessions: Vec<Session> = self
            .get_all_sessions(None)?
            .into_iter()
            .filter(|s| s.created_at >= cutoff)
            .collect();

        let total = sessions.len();
        let completed = sessions.iter().filter(|s| s.status == SessionStatus::Completed).count();
        let failed = sessions.iter().filter(|s| s.status == SessionStatus::Failed).count();
        let success_rate = if total == 0 { 0.0 } else { completed as f64 / total as f64 };

        let durations: Vec<f64> = sessions
            .iter()
            .filter_map(|s| s.completed_at.map(|c| (c - s.created_at).num_seconds() as f64))
            .collect();
        let average_duration_secs = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<f64>() / durations.len() as f64
        };

        Ok(SessionStatistics {
            total_sessions: total,
            completed_sessions: completed,
            failed_sessions: failed,
            success_rate,
            average_duration_secs,
        })
    }

    pub fn generate_summary(&self, id: &str, format: &str) -> Result<String, SessionError> {
        let session = self.get_session(id)?;
        let steps = self.get_session_steps(id)?;
        match format {
            "json" => Ok(serde_json::to_string_pretty(&serde_json::json!({
                "session": session,
                "steps": steps,
            }))?),
            "html" => Ok(generate_html_summary(&session, &steps)),
            _ => Ok(generate_markdown_summary(&session, &steps)),
        }
    }
}

fn generate_markdown_summary(session: &Session, steps: &[SyncStep]) -> String {
    let mut out = format!("# Session: {}\n\n", session.name);
    out.push_str(&format!("- Status: {:?}\n", session.status));
    out.push_str(&format!("- Agents: {}\n", session.num_agents));
    out.push_str(&format!("- Created: {}\n\n", session.created_at));
    out.push_str("## Steps\n\n");
    for step in steps {
        out.push_str(&format!("{}. [{:?}] {}\n", step.number, step.status, step.description));
    }
    out
}

fn generate_html_summary(session: &Session, steps: &[SyncStep]) -> String {
    let mut out = format!("<h1>Session: {}</h1>\n<ul>\n", session.name);
    out.push_str(&format!("<li>Status: {:?}</li>\n", session.status));
    out.push_str(&format!("<li>Agents: {}</li>\n</ul>\n<ol>\n", session.num_agents));
    for step in steps {
        out.push_str(&format!("<li>[{:?}] {}</li>\n", step.status, step.description));
    }
    out.push_str("</ol>\n");
    out
}
