use crate::{
    agent_manager::AgentManagerError, config::ConfigError, orchestrator::OrchestratorError,
    pane::PaneError, prompt::PromptError, session::SessionError, strategy::StrategyError,
    workspace::WorkspaceError,
};

/// Top-level error type returned by the CLI entry points.
///
/// Each component owns its own error enum at the boundary that needs one;
/// this wraps them so `main` has a single `Result` alias to report against.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error(transparent)]
    AgentManager(#[from] AgentManagerError),
    #[error(transparent)]
    Strategy(#[from] StrategyError),
    #[error(transparent)]
    Pane(#[from] PaneError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("session was interrupted")]
    Interrupted,
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Process exit code per the CLI's documented contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Interrupted => 130,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
