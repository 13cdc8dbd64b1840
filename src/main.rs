mod agent;
mod agent_manager;
mod channel;
mod completion;
mod config;
mod error;
mod git;
mod orchestrator;
mod pane;
mod patterns;
mod prompt;
mod session;
mod strategy;
mod workspace;

use clap::{Parser, Subcommand};
use config::XenosyncConfig;
use error::{Error, Result};
use orchestrator::Orchestrator;
use prompt::Prompt;
use session::{FileSessionManager, SessionStatus};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "xenosync", about = "Orchestrate a fleet of interactive AI coding agents")]
struct Cli {
    /// Project directory (default: current directory)
    #[arg(short, long, default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a session: load a prompt (or resume one) and drive the agents to completion
    Start {
        /// Prompt file (text or YAML); omitted when --resume is given
        prompt_file: Option<PathBuf>,
        #[arg(long, default_value_t = 2)]
        agents: usize,
        #[arg(long)]
        resume: Option<String>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        no_terminal: bool,
    },
    /// Show one or all active sessions
    Status {
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        detailed: bool,
    },
    /// List sessions
    List {
        #[arg(long)]
        all: bool,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Attach to a running multiplexer session
    Attach {
        session_id: Option<String>,
        #[arg(long)]
        hive: bool,
    },
    /// Mark a session interrupted and kill its multiplexer session
    Kill {
        session_id: String,
        #[arg(long)]
        force: bool,
    },
    /// Emit a session report
    Summary {
        session_id: String,
        #[arg(long, default_value = "markdown")]
        format: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Aggregate statistics across sessions
    Stats {
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
    /// Prompt-file utilities
    Prompt {
        #[command(subcommand)]
        action: PromptAction,
    },
    /// Create the default config under the user's home directory
    Init,
}

#[derive(Subcommand)]
enum PromptAction {
    /// List prompt files under the configured prompts directory
    List,
    /// Validate a prompt file parses successfully
    Validate { file: PathBuf },
    /// Convert a prompt file between the text and YAML formats
    Convert { input: PathBuf, output: PathBuf },
}

fn main() {
    let cli = Cli::parse();
    let config = match XenosyncConfig::load(&cli.project.join("xenosync.toml")) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error loading config: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let runtime = tokio::runtime::Runtime::new().expect("failed to start async runtime");
    let result = runtime.block_on(run(cli, config));

    match result {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.exit_code());
        }
    }
}

async fn run(cli: Cli, config: XenosyncConfig) -> Result<()> {
    let sessions_root = cli.project.join(config.sessions_dir());
    match cli.command {
        Commands::Start {
            prompt_file,
            agents,
            resume,
            dry_run,
            no_terminal,
        } => cmd_start(&cli.project, config, sessions_root, prompt_file, agents, resume, dry_run, no_terminal).await,
        Commands::Status { session, detailed } => cmd_status(sessions_root, session, detailed),
        Commands::List { all, limit } => cmd_list(sessions_root, all, limit),
        Commands::Attach { session_id, hive } => cmd_attach(sessions_root, session_id, hive),
        Commands::Kill { session_id, force } => cmd_kill(sessions_root, session_id, force).await,
        Commands::Summary {
            session_id,
            format,
            output,
        } => cmd_summary(sessions_root, session_id, format, output),
        Commands::Stats { days } => cmd_stats(sessions_root, days),
        Commands::Prompt { action } => cmd_prompt(&cli.project, config, action),
        Commands::Init => cmd_init(),
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_start(
    project_path: &std::path::Path,
    config: XenosyncConfig,
    sessions_root: PathBuf,
    prompt_file: Option<PathBuf>,
    agents: usize,
    resume: Option<String>,
    dry_run: bool,
    no_terminal: bool,
) -> Result<()> {
    if !(2..=20).contains(&agents) {
        return Err(Error::Other("--agents must be between 2 and 20".into()));
    }
    let mut config = config;
    config.num_agents = agents;
    if no_terminal {
        config.auto_open_terminal = false;
    }

    let session_manager = FileSessionManager::new(sessions_root.clone());

    if let Some(resume_id) = resume {
        let session = session_manager.resume_session(&resume_id)?;
        println!("resumed session {} ({})", session.id, session.name);
        return Ok(());
    }

    let prompt_file = prompt_file.ok_or_else(|| Error::Other("PROMPT_FILE is required unless --resume is given".into()))?;
    let prompt = Prompt::load(&prompt_file)?;

    if dry_run {
        println!("prompt '{}' parses into {} task(s):", prompt.name, prompt.tasks.len());
        for task in &prompt.tasks {
            println!("  {}. {}", task.number, task.description);
        }
        return Ok(());
    }

    let mut orchestrator = Orchestrator::start(config, sessions_root, project_path.to_path_buf(), prompt).await?;
    let flags = orchestrator.flags();
    orchestrator::install_signal_handlers(flags);

    orchestrator.dispatch_initial_tasks().await?;
    println!("session {} started", orchestrator.session().id);

    let run_result = orchestrator.run_until_complete().await;
    match run_result {
        Ok(()) => {
            orchestrator.run_finalization().await?;
            orchestrator.shutdown(SessionStatus::Completed).await?;
            println!("session {} completed", orchestrator.session().id);
        }
        Err(orchestrator::OrchestratorError::Interrupted) => {
            orchestrator.shutdown(SessionStatus::Interrupted).await?;
            return Err(Error::Interrupted);
        }
        Err(err) => {
            orchestrator.shutdown(SessionStatus::Failed).await?;
            return Err(err.into());
        }
    }
    Ok(())
}

fn cmd_status(sessions_root: PathBuf, session_id: Option<String>, detailed: bool) -> Result<()> {
    let manager = FileSessionManager::new(sessions_root);
    let sessions = match session_id {
        Some(id) => vec![manager.get_session(&id)?],
        None => manager.get_active_sessions()?,
    };
    for session in sessions {
        println!("{}  {}  {:?}", session.id, session.name, session.status);
        if detailed {
            for step in manager.get_session_steps(&session.id)? {
                println!("  {}. [{:?}] {}", step.number, step.status, step.description);
            }
        }
    }
    Ok(())
}

fn cmd_list(sessions_root: PathBuf, all: bool, limit: Option<usize>) -> Result<()> {
    let manager = FileSessionManager::new(sessions_root);
    let sessions = if all {
        manager.get_all_sessions(limit)?
    } else {
        manager.get_active_sessions()?
    };
    for session in sessions {
        println!("{}  {}  {:?}  {}", session.id, session.name, session.status, session.created_at);
    }
    Ok(())
}

fn cmd_attach(sessions_root: PathBuf, session_id: Option<String>, hive: bool) -> Result<()> {
    let manager = FileSessionManager::new(sessions_root);
    let session = match session_id {
        Some(id) => manager.get_session(&id)?,
        None => manager
            .get_active_sessions()?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Other("no active session to attach to".into()))?,
    };
    let tmux_name = FileSessionManager::tmux_session_name(&session.id);
    let window = if hive { "agents" } else { "orchestrator" };
    let status = std::process::Command::new("tmux")
        .args(["attach", "-t", &format!("{tmux_name}:{window}")])
        .status()?;
    if !status.success() {
        return Err(Error::Other(format!("failed to attach to {tmux_name}")));
    }
    Ok(())
}

async fn cmd_kill(sessions_root: PathBuf, session_id: String, force: bool) -> Result<()> {
    let manager = FileSessionManager::new(sessions_root);
    if !force {
        let session = manager.get_session(&session_id)?;
        if session.status != SessionStatus::Active {
            println!("session {session_id} is not active; use --force to kill anyway");
            return Ok(());
        }
    }
    manager.kill_session(&session_id).await?;
    println!("session {session_id} killed");
    Ok(())
}

fn cmd_summary(sessions_root: PathBuf, session_id: String, format: String, output: Option<PathBuf>) -> Result<()> {
    let manager = FileSessionManager::new(sessions_root);
    let rendered = manager.generate_summary(&session_id, &format)?;
    match output {
        Some(path) => std::fs::write(path, rendered)?,
        None => println!("{rendered}"),
    }
    Ok(())
}

fn cmd_stats(sessions_root: PathBuf, days: i64) -> Result<()> {
    let manager = FileSessionManager::new(sessions_root);
    let stats = manager.get_statistics(days)?;
    println!("sessions: {}", stats.total_sessions);
    println!("completed: {}", stats.completed_sessions);
    println!("failed: {}", stats.failed_sessions);
    println!("success rate: {:.1}%", stats.success_rate * 100.0);
    println!("average duration: {:.0}s", stats.average_duration_secs);
    Ok(())
}

fn cmd_prompt(project_path: &std::path::Path, config: XenosyncConfig, action: PromptAction) -> Result<()> {
    match action {
        PromptAction::List => {
            let dir = project_path.join(config.prompts_dir());
            if dir.exists() {
                for entry in std::fs::read_dir(dir)? {
                    let entry = entry?;
                    println!("{}", entry.path().display());
                }
            }
            Ok(())
        }
        PromptAction::Validate { file } => {
            let prompt = Prompt::load(&file)?;
            println!("ok: '{}' with {} task(s)", prompt.name, prompt.tasks.len());
            Ok(())
        }
        PromptAction::Convert { input, output } => {
            prompt::convert_prompt(&input, &output)?;
            println!("wrote {}", output.display());
            Ok(())
        }
    }
}

fn cmd_init() -> Result<()> {
    let home = dirs_home()?;
    let config_path = home.join(".xenosync").join("xenosync.toml");
    let config = XenosyncConfig::default();
    config.save(&config_path)?;
    println!("wrote default config to {}", config_path.display());
    Ok(())
}

fn dirs_home() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| Error::Other("HOME environment variable is not set".into()))
}
