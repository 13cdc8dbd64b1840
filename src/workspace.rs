//! Workspace coordinator (§4.3): isolated per-agent project directories,
//! progress tracking, and the merge into one `final-project/`.

use crate::git;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("agent project {0} not found")]
    ProjectNotFound(usize),
    #[error("git operation failed: {0}")]
    Git(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Completed,
    Merged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProject {
    pub agent_id: usize,
    pub path: PathBuf,
    pub status: ProjectStatus,
    pub has_git_repo: bool,
    pub files_written: usize,
    pub bytes_written: u64,
}

impl AgentProject {
    fn new(agent_id: usize, path: PathBuf, has_git_repo: bool) -> Self {
        Self {
            agent_id,
            path,
            status: ProjectStatus::Active,
            has_git_repo,
            files_written: 0,
            bytes_written: 0,
        }
    }
}

/// One conflicting path observed during a merge, and how it was resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConflict {
    pub path: String,
    pub source_agent: usize,
    pub resolution: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalProject {
    pub path: PathBuf,
    pub files_merged: usize,
    pub conflicts: Vec<MergeConflict>,
    pub contributing_agents: Vec<usize>,
}

pub struct WorkspaceCoordinator {
    root: PathBuf,
    use_git: bool,
    conflict_resolution: String,
    projects: BTreeMap<usize, AgentProject>,
}

impl WorkspaceCoordinator {
    pub fn new(root: PathBuf, use_git: bool, conflict_resolution: impl Into<String>) -> Self {
        Self {
            root,
            use_git,
            conflict_resolution: conflict_resolution.into(),
            projects: BTreeMap::new(),
        }
    }

    fn project_dir(&self, agent_id: usize) -> PathBuf {
        self.root.join(format!("agent-{agent_id}"))
    }

    pub fn final_project_dir(&self) -> PathBuf {
        self.root.join("final-project")
    }

    /// Create the isolated directory for an agent, optionally as its own git
    /// repo (each agent gets its own history so merges can be attempted
    /// either by file copy or by pulling from an agent's repo as a remote).
    pub fn create_agent_workspace(&mut self, agent_id: usize) -> Result<AgentProject, WorkspaceError> {
        let dir = self.project_dir(agent_id);
        std::fs::create_dir_all(&dir)?;

        let has_git_repo = if self.use_git {
            let output = std::process::Command::new("git")
                .arg("init")
                .current_dir(&dir)
                .output()?;
            output.status.success()
        } else {
            false
        };

        let project = AgentProject::new(agent_id, dir, has_git_repo);
        self.projects.insert(agent_id, project.clone());
        Ok(project)
    }

    pub fn project(&self, agent_id: usize) -> Result<&AgentProject, WorkspaceError> {
        self.projects
            .get(&agent_id)
            .ok_or(WorkspaceError::ProjectNotFound(agent_id))
    }

    /// Recompute file/byte counters by scanning the agent's directory.
    /// Called periodically by the file-activity completion signal and by the
    /// project-quality gate.
    pub fn track_agent_progress(&mut self, agent_id: usize) -> Result<&AgentProject, WorkspaceError> {
        let dir = self
            .projects
            .get(&agent_id)
            .ok_or(WorkspaceError::ProjectNotFound(agent_id))?
            .path
            .clone();

        let mut files_written = 0usize;
        let mut bytes_written = 0u64;
        for entry in WalkDir::new(&dir).into_iter().filter_map(Result::ok) {
            if entry.file_type().is_file() && !is_vcs_internal(entry.path()) {
                files_written += 1;
                bytes_written += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }

        let project = self
            .projects
            .get_mut(&agent_id)
            .ok_or(WorkspaceError::ProjectNotFound(agent_id))?;
        project.files_written = files_written;
        project.bytes_written = bytes_written;

        if project.has_git_repo {
            let _ = git::add_and_commit(&dir, &format!("agent-{agent_id} progress snapshot"));
        }

        Ok(project)
    }

    pub fn complete_agent_project(&mut self, agent_id: usize) -> Result<(), WorkspaceError> {
        let project = self
            .projects
            .get_mut(&agent_id)
            .ok_or(WorkspaceError::ProjectNotFound(agent_id))?;
        project.status = ProjectStatus::Completed;
        Ok(())
    }

    /// Whether an agent's output clears the project-quality gate (§4.6):
    /// at least `min_files` files, with at least two having more than 50
    /// non-whitespace characters, and total substantial bytes above
    /// `min_substantial_bytes`.
    pub fn passes_quality_gate(&self, agent_id: usize, min_files: usize, min_substantial_bytes: usize) -> bool {
        let Some(project) = self.projects.get(&agent_id) else {
            return false;
        };
        if project.files_written < min_files {
            return false;
        }

        let mut meaningful_files = 0usize;
        let mut substantial_bytes = 0usize;
        for entry in WalkDir::new(&project.path).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() || is_vcs_internal(entry.path()) {
                continue;
            }
            if let Ok(content) = std::fs::read_to_string(entry.path()) {
                let non_whitespace = content.chars().filter(|c| !c.is_whitespace()).count();
                if non_whitespace > 50 {
                    meaningful_files += 1;
                    substantial_bytes += non_whitespace;
                }
            }
        }

        meaningful_files >= 2 && substantial_bytes >= min_substantial_bytes
    }

    /// File-copy merge: walk each completed agent's project in order, copying
    /// files into `final-project/`. Conflicting paths follow the configured
    /// policy (`skip` keeps the first writer, `overwrite` keeps the last).
    pub fn merge_agent_projects(&mut self, agent_ids: &[usize]) -> Result<FinalProject, WorkspaceError> {
        let final_dir = self.final_project_dir();
        std::fs::create_dir_all(&final_dir)?;

        let mut conflicts = Vec::new();
        let mut seen: BTreeMap<String, usize> = BTreeMap::new();
        let mut files_merged = 0usize;
        let mut contributing_agents = Vec::new();

        for &agent_id in agent_ids {
            let project = self
                .projects
                .get(&agent_id)
                .ok_or(WorkspaceError::ProjectNotFound(agent_id))?;
            let mut touched = false;

            for entry in WalkDir::new(&project.path).into_iter().filter_map(Result::ok) {
                if !entry.file_type().is_file() || is_vcs_internal(entry.path()) || is_coordination_file(entry.path())
                {
                    continue;
                }
                let relative = entry
                    .path()
                    .strip_prefix(&project.path)
                    .expect("walked entries are prefixed by their root")
                    .to_path_buf();
                let rel_str = relative.to_string_lossy().into_owned();
                let dest = final_dir.join(&relative);

                if let Some(&owner) = seen.get(&rel_str) {
                    match self.conflict_resolution.as_str() {
                        "overwrite" => {
                            if let Some(parent) = dest.parent() {
                                std::fs::create_dir_all(parent)?;
                            }
                            std::fs::copy(entry.path(), &dest)?;
                            conflicts.push(MergeConflict {
                                path: rel_str.clone(),
                                source_agent: agent_id,
                                resolution: format!("overwrote agent-{owner}'s copy"),
                            });
                        }
                        _ => {
                            conflicts.push(MergeConflict {
                                path: rel_str.clone(),
                                source_agent: agent_id,
                                resolution: format!("kept agent-{owner}'s copy"),
                            });
                        }
                    }
                    continue;
                }

                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(entry.path(), &dest)?;
                seen.insert(rel_str, agent_id);
                files_merged += 1;
                touched = true;
            }

            if touched {
                contributing_agents.push(agent_id);
            }
            if let Some(p) = self.projects.get_mut(&agent_id) {
                p.status = ProjectStatus::Merged;
            }
        }

        let summary = FinalProject {
            path: final_dir.clone(),
            files_merged,
            conflicts,
            contributing_agents,
        };
        self.write_merge_summary(&summary)?;
        Ok(summary)
    }

    /// Alternate merge path: add each completed agent's repo as a git remote
    /// of the final project and merge its branch, falling back to the
    /// file-copy merge for any agent without its own repo.
    pub fn merge_agent_projects_via_git(&mut self, agent_ids: &[usize]) -> Result<FinalProject, WorkspaceError> {
        let final_dir = self.final_project_dir();
        std::fs::create_dir_all(&final_dir)?;
        if !git::is_git_repo(&final_dir) {
            std::process::Command::new("git")
                .arg("init")
                .current_dir(&final_dir)
                .output()?;
            std::fs::write(final_dir.join(".gitkeep"), "")?;
            git::add_and_commit(&final_dir, "initialize final project").map_err(WorkspaceError::Git)?;
        }

        let mut non_git_agents = Vec::new();
        let mut contributing_agents = Vec::new();
        for &agent_id in agent_ids {
            let project = self
                .projects
                .get(&agent_id)
                .ok_or(WorkspaceError::ProjectNotFound(agent_id))?;
            if !project.has_git_repo {
                non_git_agents.push(agent_id);
                continue;
            }
            let remote_name = format!("agent-{agent_id}");
            let _ = std::process::Command::new("git")
                .args(["remote", "add", &remote_name, &project.path.to_string_lossy()])
                .current_dir(&final_dir)
                .output()?;
            let fetch_ok = std::process::Command::new("git")
                .args(["fetch", &remote_name])
                .current_dir(&final_dir)
                .output()?
                .status
                .success();
            if !fetch_ok {
                non_git_agents.push(agent_id);
                continue;
            }
            let merge_ok = std::process::Command::new("git")
                .args([
                    "merge",
                    "--allow-unrelated-histories",
                    "--no-edit",
                    "-X",
                    "ours",
                    &format!("{remote_name}/master"),
                ])
                .current_dir(&final_dir)
                .output()?
                .status
                .success();
            if merge_ok {
                contributing_agents.push(agent_id);
            } else {
                non_git_agents.push(agent_id);
            }
            if let Some(p) = self.projects.get_mut(&agent_id) {
                p.status = ProjectStatus::Merged;
            }
        }

        let mut summary = if non_git_agents.is_empty() {
            FinalProject {
                path: final_dir,
                files_merged: 0,
                conflicts: Vec::new(),
                contributing_agents,
            }
        } else {
            let fallback = self.merge_agent_projects(&non_git_agents)?;
            FinalProject {
                contributing_agents: contributing_agents
                    .into_iter()
                    .chain(fallback.contributing_agents)
                    .collect(),
                ..fallback
            }
        };
        summary.files_merged = count_files(&summary.path);
        self.write_merge_summary(&summary)?;
        Ok(summary)
    }

    fn write_merge_summary(&self, summary: &FinalProject) -> Result<(), WorkspaceError> {
        let mut out = String::new();
        out.push_str("# Merge Summary\n\n");
        out.push_str(&format!("Files merged: {}\n", summary.files_merged));
        out.push_str(&format!(
            "Contributing agents: {}\n\n",
            summary
                .contributing_agents
                .iter()
                .map(|a| a.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ));
        if summary.conflicts.is_empty() {
            out.push_str("No conflicts.\n");
        } else {
            out.push_str("## Conflicts\n\n");
            for conflict in &summary.conflicts {
                out.push_str(&format!(
                    "- `{}` (from agent-{}): {}\n",
                    conflict.path, conflict.source_agent, conflict.resolution
                ));
            }
        }
        std::fs::write(summary.path.join("MERGE_SUMMARY.md"), out)?;
        Ok(())
    }
}

fn is_vcs_internal(path: &Path) -> bool {
    path.components().any(|c| c.as_os_str() == ".git")
}

fn is_coordination_file(path: &Path) -> bool {
    matches!(
        path.file_name().and_then(|n| n.to_str()),
        Some(".xenosync_session") | Some(".xenosync_agent.json")
    )
}

fn count_files(dir: &Path) -> usize {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && !is_vcs_internal(e.path()))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_agent_workspace_without_git() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = WorkspaceCoordinator::new(dir.path().to_path_buf(), false, "skip");
        let project = coordinator.create_agent_workspace(0).unwrap();
        assert!(project.path.exists());
        assert!(!project.has_git_repo);
    }

    #[test]
    fn track_agent_progress_counts_files_and_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = WorkspaceCoordinator::new(dir.path().to_path_buf(), false, "skip");
        let project = coordinator.create_agent_workspace(0).unwrap();
        std::fs::write(project.path.join("a.rs"), "fn main() {}").unwrap();
        std::fs::write(project.path.join("b.rs"), "struct Foo;").unwrap();

        let tracked = coordinator.track_agent_progress(0).unwrap();
        assert_eq!(tracked.files_written, 2);
        assert!(tracked.bytes_written > 0);
    }

    #[test]
    fn quality_gate_requires_meaningful_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = WorkspaceCoordinator::new(dir.path().to_path_buf(), false, "skip");
        let project = coordinator.create_agent_workspace(0).unwrap();
        std::fs::write(project.path.join("empty.rs"), "").unwrap();
        assert!(!coordinator.passes_quality_gate(0, 3, 500));

        let long_content = "x".repeat(600);
        std::fs::write(project.path.join("a.rs"), &long_content).unwrap();
        std::fs::write(project.path.join("b.rs"), &long_content).unwrap();
        coordinator.track_agent_progress(0).unwrap();
        assert!(coordinator.passes_quality_gate(0, 3, 500));
    }

    #[test]
    fn merge_skip_policy_keeps_first_writer() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = WorkspaceCoordinator::new(dir.path().to_path_buf(), false, "skip");
        let p0 = coordinator.create_agent_workspace(0).unwrap();
        let p1 = coordinator.create_agent_workspace(1).unwrap();
        std::fs::write(p0.path.join("shared.txt"), "from agent 0").unwrap();
        std::fs::write(p1.path.join("shared.txt"), "from agent 1").unwrap();
        std::fs::write(p1.path.join("only1.txt"), "unique").unwrap();

        let summary = coordinator.merge_agent_projects(&[0, 1]).unwrap();
        assert_eq!(summary.conflicts.len(), 1);
        assert_eq!(summary.conflicts[0].resolution, "kept agent-0's copy");

        let merged = std::fs::read_to_string(summary.path.join("shared.txt")).unwrap();
        assert_eq!(merged, "from agent 0");
        assert!(summary.path.join("only1.txt").exists());
        assert!(summary.path.join("MERGE_SUMMARY.md").exists());
    }

    #[test]
    fn merge_overwrite_policy_keeps_last_writer() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = WorkspaceCoordinator::new(dir.path().to_path_buf(), false, "overwrite");
        let p0 = coordinator.create_agent_workspace(0).unwrap();
        let p1 = coordinator.create_agent_workspace(1).unwrap();
        std::fs::write(p0.path.join("shared.txt"), "from agent 0").unwrap();
        std::fs::write(p1.path.join("shared.txt"), "from agent 1").unwrap();

        let summary = coordinator.merge_agent_projects(&[0, 1]).unwrap();
        let merged = std::fs::read_to_string(summary.path.join("shared.txt")).unwrap();
        assert_eq!(merged, "from agent 1");
    }

    #[test]
    fn merge_is_idempotent_given_same_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = WorkspaceCoordinator::new(dir.path().to_path_buf(), false, "skip");
        let p0 = coordinator.create_agent_workspace(0).unwrap();
        std::fs::write(p0.path.join("a.txt"), "hello").unwrap();

        let first = coordinator.merge_agent_projects(&[0]).unwrap();
        let second = coordinator.merge_agent_projects(&[0]).unwrap();
        assert_eq!(first.files_merged, second.files_merged);
    }
}
