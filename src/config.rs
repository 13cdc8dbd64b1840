use serde::{Deserialize, Serialize};
use std::path::Path;

/// Xenosync configuration. Every field has a spec-documented default, so a
/// missing or partial `xenosync.toml` still loads successfully.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct XenosyncConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: String,
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: String,

    #[serde(default = "default_claude_command")]
    pub claude_command: String,
    #[serde(default = "default_claude_args")]
    pub claude_args: Vec<String>,
    #[serde(default = "default_initial_wait")]
    pub initial_wait_secs: u64,

    #[serde(default = "default_num_agents")]
    pub num_agents: usize,
    #[serde(default = "default_agent_launch_delay")]
    pub agent_launch_delay_secs: u64,

    #[serde(default = "default_true")]
    pub use_tmux: bool,
    #[serde(default = "default_true")]
    pub auto_open_terminal: bool,
    #[serde(default)]
    pub preferred_terminal: Option<String>,

    #[serde(default = "default_agent_monitor_interval")]
    pub agent_monitor_interval_secs: u64,
    #[serde(default = "default_message_grace_period")]
    pub message_grace_period_secs: u64,
    #[serde(default = "default_wait_check_interval")]
    pub wait_check_interval_secs: u64,

    #[serde(default = "default_task_minimum_duration")]
    pub task_minimum_duration_secs: u64,
    #[serde(default = "default_task_completion_check_interval")]
    pub task_completion_check_interval_secs: u64,
    #[serde(default = "default_minimum_work_duration_minutes")]
    pub minimum_work_duration_minutes: u64,

    #[serde(default = "default_project_quality_threshold")]
    pub project_quality_threshold: usize,
    #[serde(default = "default_project_substantial_work_threshold")]
    pub project_substantial_work_threshold: usize,

    #[serde(default = "default_true")]
    pub completion_verification_enabled: bool,
    #[serde(default = "default_completion_verification_interval")]
    pub completion_verification_interval_secs: u64,
    #[serde(default = "default_completion_verification_message")]
    pub completion_verification_message: String,
    #[serde(default = "default_verification_response_wait")]
    pub verification_response_wait_secs: u64,
    #[serde(default = "default_verification_response_lines")]
    pub verification_response_lines: usize,

    #[serde(default = "default_file_activity_window")]
    pub file_activity_window_minutes: u64,
    #[serde(default = "default_file_activity_timeout")]
    pub file_activity_timeout_minutes: u64,

    #[serde(default = "default_weight_patterns")]
    pub completion_weight_patterns: f64,
    #[serde(default = "default_weight_file_activity")]
    pub completion_weight_file_activity: f64,
    #[serde(default = "default_weight_verification")]
    pub completion_weight_verification: f64,
    #[serde(default = "default_weight_time")]
    pub completion_weight_time: f64,
    #[serde(default = "default_confidence_threshold")]
    pub completion_confidence_threshold: f64,

    #[serde(default)]
    pub semantic_completion_patterns: Vec<String>,

    #[serde(default = "default_true")]
    pub enable_finalization: bool,
    #[serde(default = "default_finalization_timeout")]
    pub finalization_timeout_secs: u64,
    #[serde(default)]
    pub finalization_tasks: Vec<String>,

    #[serde(default = "default_merge_strategy")]
    pub project_merge_strategy: String,
    #[serde(default = "default_conflict_resolution")]
    pub conflict_resolution: String,
    #[serde(default)]
    pub keep_projects_after_session: bool,

    #[serde(default = "default_true")]
    pub archive_completed: bool,
}

impl Default for XenosyncConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            sessions_dir: default_sessions_dir(),
            prompts_dir: default_prompts_dir(),
            claude_command: default_claude_command(),
            claude_args: default_claude_args(),
            initial_wait_secs: default_initial_wait(),
            num_agents: default_num_agents(),
            agent_launch_delay_secs: default_agent_launch_delay(),
            use_tmux: true,
            auto_open_terminal: true,
            preferred_terminal: None,
            agent_monitor_interval_secs: default_agent_monitor_interval(),
            message_grace_period_secs: default_message_grace_period(),
            wait_check_interval_secs: default_wait_check_interval(),
            task_minimum_duration_secs: default_task_minimum_duration(),
            task_completion_check_interval_secs: default_task_completion_check_interval(),
            minimum_work_duration_minutes: default_minimum_work_duration_minutes(),
            project_quality_threshold: default_project_quality_threshold(),
            project_substantial_work_threshold: default_project_substantial_work_threshold(),
            completion_verification_enabled: true,
            completion_verification_interval_secs: default_completion_verification_interval(),
            completion_verification_message: default_completion_verification_message(),
            verification_response_wait_secs: default_verification_response_wait(),
            verification_response_lines: default_verification_response_lines(),
            file_activity_window_minutes: default_file_activity_window(),
            file_activity_timeout_minutes: default_file_activity_timeout(),
            completion_weight_patterns: default_weight_patterns(),
            completion_weight_file_activity: default_weight_file_activity(),
            completion_weight_verification: default_weight_verification(),
            completion_weight_time: default_weight_time(),
            completion_confidence_threshold: default_confidence_threshold(),
            semantic_completion_patterns: Vec::new(),
            enable_finalization: true,
            finalization_timeout_secs: default_finalization_timeout(),
            finalization_tasks: Vec::new(),
            project_merge_strategy: default_merge_strategy(),
            conflict_resolution: default_conflict_resolution(),
            keep_projects_after_session: false,
            archive_completed: true,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}
fn default_sessions_dir() -> String {
    "xsync-sessions".into()
}
fn default_prompts_dir() -> String {
    "prompts".into()
}
fn default_claude_command() -> String {
    "claude".into()
}
fn default_claude_args() -> Vec<String> {
    vec!["--dangerously-skip-permissions".into()]
}
fn default_initial_wait() -> u64 {
    5
}
fn default_num_agents() -> usize {
    2
}
fn default_agent_launch_delay() -> u64 {
    3
}
fn default_agent_monitor_interval() -> u64 {
    30
}
fn default_message_grace_period() -> u64 {
    60
}
fn default_wait_check_interval() -> u64 {
    5
}
fn default_task_minimum_duration() -> u64 {
    300
}
fn default_task_completion_check_interval() -> u64 {
    180
}
fn default_minimum_work_duration_minutes() -> u64 {
    10
}
fn default_project_quality_threshold() -> usize {
    3
}
fn default_project_substantial_work_threshold() -> usize {
    500
}
fn default_completion_verification_interval() -> u64 {
    300
}
fn default_completion_verification_message() -> String {
    "Please confirm if you have completed your assigned tasks. Respond with 'COMPLETED' if finished, or describe what you're still working on.".into()
}
fn default_verification_response_wait() -> u64 {
    30
}
fn default_verification_response_lines() -> usize {
    15
}
fn default_file_activity_window() -> u64 {
    15
}
fn default_file_activity_timeout() -> u64 {
    10
}
fn default_weight_patterns() -> f64 {
    0.25
}
fn default_weight_file_activity() -> f64 {
    0.25
}
fn default_weight_verification() -> f64 {
    0.35
}
fn default_weight_time() -> f64 {
    0.15
}
fn default_confidence_threshold() -> f64 {
    0.7
}
fn default_finalization_timeout() -> u64 {
    600
}
fn default_merge_strategy() -> String {
    "combine".into()
}
fn default_conflict_resolution() -> String {
    "skip".into()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read xenosync.toml: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse xenosync.toml: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize xenosync.toml: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl XenosyncConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }
        let content = std::fs::read_to_string(path)?;
        let config: XenosyncConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn sessions_dir(&self) -> &Path {
        Path::new(&self.sessions_dir)
    }

    pub fn prompts_dir(&self) -> &Path {
        Path::new(&self.prompts_dir)
    }

    /// Confidence-weight sum, used to validate a loaded config.
    pub fn weight_sum(&self) -> f64 {
        self.completion_weight_patterns
            + self.completion_weight_file_activity
            + self.completion_weight_verification
            + self.completion_weight_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = XenosyncConfig::default();
        assert_eq!(config.num_agents, 2);
        assert_eq!(config.completion_confidence_threshold, 0.7);
        assert_eq!(config.project_quality_threshold, 3);
        assert_eq!(config.project_substantial_work_threshold, 500);
        assert_eq!(config.conflict_resolution, "skip");
        assert_eq!(config.project_merge_strategy, "combine");
    }

    #[test]
    fn default_weights_sum_to_one() {
        let config = XenosyncConfig::default();
        assert!((config.weight_sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn parse_minimal_toml() {
        let toml_str = r#"
log_level = "debug"
"#;
        let config: XenosyncConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.log_level, "debug");
        // Everything else falls back to defaults.
        assert_eq!(config.num_agents, 2);
        assert_eq!(config.completion_confidence_threshold, 0.7);
    }

    #[test]
    fn roundtrip_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xenosync.toml");
        let config = XenosyncConfig::default();
        config.save(&path).unwrap();
        let loaded = XenosyncConfig::load(&path).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn load_missing_file_creates_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xenosync.toml");
        assert!(!path.exists());
        let config = XenosyncConfig::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config, XenosyncConfig::default());
    }
}
