//! Prompt files: the text and YAML formats accepted on the CLI, conversion
//! between them, and the built-in templates used by `xenosync init`/`prompt`.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML prompt: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("prompt file has no recognizable tasks")]
    Empty,
    #[error("unsupported prompt file extension: {0}")]
    UnsupportedExtension(String),
}

/// A unit of work handed to an agent. `description` is the short label used
/// in logs and status output; `content` is the full text actually sent to
/// the agent and may run to several lines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub number: u32,
    pub content: String,
    pub description: String,
    pub estimated_duration: Option<u32>,
    #[serde(default)]
    pub dependencies: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prompt {
    pub name: String,
    pub initial_prompt: String,
    pub tasks: Vec<Task>,
}

/// A YAML step may be a bare string or an object with a `content` body and
/// optional metadata.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum YamlStep {
    Bare(String),
    Detailed {
        content: String,
        number: Option<u32>,
        description: Option<String>,
        estimated_time: Option<u32>,
        #[serde(default)]
        dependencies: Vec<u32>,
        #[serde(default)]
        #[allow(dead_code)]
        tags: Vec<String>,
    },
}

#[derive(Debug, Deserialize)]
struct YamlPrompt {
    name: Option<String>,
    initial_prompt: Option<String>,
    #[serde(default)]
    steps: Vec<YamlStep>,
}

#[derive(Debug, Serialize)]
struct YamlStepOut<'a> {
    content: &'a str,
    number: u32,
    description: &'a str,
    estimated_time: Option<u32>,
    dependencies: &'a [u32],
}

#[derive(Debug, Serialize)]
struct YamlPromptOut<'a> {
    name: &'a str,
    initial_prompt: &'a str,
    steps: Vec<YamlStepOut<'a>>,
}

/// First line of a task's content, used as its `description` when none is
/// given explicitly.
fn first_line(content: &str) -> String {
    content.lines().next().unwrap_or("").trim().to_string()
}

impl Prompt {
    pub fn load(path: &Path) -> Result<Self, PromptError> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::parse_yaml(&content),
            Some("txt") | None => Self::parse_text(&content, stem(path)),
            Some(other) => Err(PromptError::UnsupportedExtension(other.to_string())),
        }
    }

    /// Text format: a `# Name [tag]` header line followed by numbered task
    /// sections (`1. Do the thing`). The first line of a section is its
    /// description; every line up to (not including) the next numbered
    /// line or end of file is the task's full content. Everything before
    /// the first numbered line is treated as the initial prompt.
    pub fn parse_text(content: &str, fallback_name: &str) -> Result<Self, PromptError> {
        let mut name = fallback_name.to_string();
        let mut initial_lines = Vec::new();
        let mut tasks: Vec<Task> = Vec::new();
        let mut body_lines: Vec<&str> = Vec::new();
        let number_re = regex::Regex::new(r"^\s*(\d+)[.)]\s+(.*)$").expect("valid literal regex");
        let header_re = regex::Regex::new(r"^#\s*(.+?)(\s*\[.*\])?\s*$").expect("valid literal regex");

        let finish_task = |tasks: &mut Vec<Task>, body: &mut Vec<&str>| {
            if let Some(task) = tasks.last_mut() {
                while matches!(body.last(), Some(l) if l.trim().is_empty()) {
                    body.pop();
                }
                task.content = body.join("\n");
                task.description = first_line(&task.content);
            }
            body.clear();
        };

        for line in content.lines() {
            if let Some(caps) = header_re.captures(line) {
                if tasks.is_empty() {
                    name = caps[1].trim().to_string();
                    continue;
                }
            }
            if let Some(caps) = number_re.captures(line) {
                finish_task(&mut tasks, &mut body_lines);
                let number: u32 = caps[1].parse().unwrap_or(tasks.len() as u32 + 1);
                body_lines.push(caps.get(2).map(|m| m.as_str()).unwrap_or(""));
                tasks.push(Task {
                    number,
                    content: String::new(),
                    description: String::new(),
                    estimated_duration: None,
                    dependencies: Vec::new(),
                });
                continue;
            }
            if tasks.is_empty() {
                if !line.trim().is_empty() {
                    initial_lines.push(line.trim());
                }
            } else {
                body_lines.push(line);
            }
        }
        finish_task(&mut tasks, &mut body_lines);

        if tasks.is_empty() {
            return Err(PromptError::Empty);
        }
        Ok(Prompt {
            name,
            initial_prompt: initial_lines.join("\n"),
            tasks,
        })
    }

    pub fn parse_yaml(content: &str) -> Result<Self, PromptError> {
        let parsed: YamlPrompt = serde_yaml::from_str(content)?;
        let tasks: Vec<Task> = parsed
            .steps
            .into_iter()
            .enumerate()
            .map(|(i, step)| match step {
                YamlStep::Bare(s) => Task {
                    number: i as u32 + 1,
                    description: first_line(&s),
                    content: s,
                    estimated_duration: None,
                    dependencies: Vec::new(),
                },
                YamlStep::Detailed {
                    content,
                    number,
                    description,
                    estimated_time,
                    dependencies,
                    tags: _,
                } => Task {
                    number: number.unwrap_or(i as u32 + 1),
                    description: description.unwrap_or_else(|| first_line(&content)),
                    content,
                    estimated_duration: estimated_time,
                    dependencies,
                },
            })
            .collect();
        if tasks.is_empty() {
            return Err(PromptError::Empty);
        }
        Ok(Prompt {
            name: parsed.name.unwrap_or_else(|| "untitled".to_string()),
            initial_prompt: parsed.initial_prompt.unwrap_or_default(),
            tasks,
        })
    }

    pub fn to_yaml(&self) -> Result<String, PromptError> {
        let out = YamlPromptOut {
            name: &self.name,
            initial_prompt: &self.initial_prompt,
            steps: self
                .tasks
                .iter()
                .map(|t| YamlStepOut {
                    content: &t.content,
                    number: t.number,
                    description: &t.description,
                    estimated_time: t.estimated_duration,
                    dependencies: &t.dependencies,
                })
                .collect(),
        };
        Ok(serde_yaml::to_string(&out)?)
    }

    pub fn to_text(&self) -> String {
        let mut out = format!("# {}\n\n", self.name);
        if !self.initial_prompt.is_empty() {
            out.push_str(&self.initial_prompt);
            out.push_str("\n\n");
        }
        for task in &self.tasks {
            out.push_str(&format!("{}. {}\n", task.number, task.content));
        }
        out
    }
}

fn stem(path: &Path) -> &str {
    path.file_stem().and_then(|s| s.to_str()).unwrap_or("untitled")
}

/// `xenosync prompt convert`: round-trips between the two on-disk formats.
pub fn convert_prompt(input: &Path, output: &Path) -> Result<(), PromptError> {
    let prompt = Prompt::load(input)?;
    let rendered = match output.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => prompt.to_yaml()?,
        _ => prompt.to_text(),
    };
    std::fs::write(output, rendered)?;
    Ok(())
}

/// `xenosync prompt template <kind>`: built-in scaffolds for `init`.
pub fn create_template(kind: &str, name: &str) -> Prompt {
    let tasks = match kind {
        "webapp" => vec![
            "Scaffold the project layout and dependency manifest",
            "Implement the core data model and storage layer",
            "Build the primary user-facing views",
            "Wire up request routing and the HTTP server",
            "Write integration tests for the main user flows",
        ],
        "mobile" => vec![
            "Scaffold the app shell and navigation structure",
            "Implement the core data model and local persistence",
            "Build the primary screens and UI components",
            "Wire up platform integration (notifications, permissions)",
            "Write tests for the main user flows",
        ],
        _ => vec![
            "Scaffold the project layout and dependency manifest",
            "Implement the core functionality described in the initial prompt",
            "Write tests covering the main behavior",
            "Review and polish the implementation",
        ],
    };
    Prompt {
        name: name.to_string(),
        initial_prompt: format!("Build {name} according to the tasks below."),
        tasks: tasks
            .into_iter()
            .enumerate()
            .map(|(i, content)| Task {
                number: i as u32 + 1,
                description: content.to_string(),
                content: content.to_string(),
                estimated_duration: None,
                dependencies: Vec::new(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_text_prompt_with_header_and_numbered_tasks() {
        let content = "# My Project [build]\n\nBuild a thing.\n\n1. Set up scaffolding\n2. Implement feature\n";
        let prompt = Prompt::parse_text(content, "fallback").unwrap();
        assert_eq!(prompt.name, "My Project");
        assert_eq!(prompt.initial_prompt, "Build a thing.");
        assert_eq!(prompt.tasks.len(), 2);
        assert_eq!(prompt.tasks[0].description, "Set up scaffolding");
        assert_eq!(prompt.tasks[0].content, "Set up scaffolding");
    }

    #[test]
    fn parse_text_task_content_spans_multiple_lines() {
        let content = "# Multi\n\n1. Build the API\nInclude auth and rate limiting.\nUse the existing router.\n2. Write docs\n";
        let prompt = Prompt::parse_text(content, "fallback").unwrap();
        assert_eq!(prompt.tasks.len(), 2);
        assert_eq!(prompt.tasks[0].description, "Build the API");
        assert_eq!(
            prompt.tasks[0].content,
            "Build the API\nInclude auth and rate limiting.\nUse the existing router."
        );
        assert_eq!(prompt.tasks[1].content, "Write docs");
    }

    #[test]
    fn parse_text_without_tasks_errors() {
        let content = "# Empty\n\njust prose, no numbered lines\n";
        assert!(matches!(Prompt::parse_text(content, "x"), Err(PromptError::Empty)));
    }

    #[test]
    fn parse_yaml_bare_and_detailed_steps() {
        let content = r#"
name: demo
initial_prompt: build the demo
steps:
  - "write the readme"
  - content: "implement core logic"
    estimated_time: 30
    dependencies: [1]
"#;
        let prompt = Prompt::parse_yaml(content).unwrap();
        assert_eq!(prompt.name, "demo");
        assert_eq!(prompt.tasks.len(), 2);
        assert_eq!(prompt.tasks[0].description, "write the readme");
        assert_eq!(prompt.tasks[1].description, "implement core logic");
        assert_eq!(prompt.tasks[1].estimated_duration, Some(30));
        assert_eq!(prompt.tasks[1].dependencies, vec![1]);
    }

    #[test]
    fn parse_yaml_detailed_step_can_override_description_and_number() {
        let content = r#"
steps:
  - content: "full text sent to the agent"
    number: 5
    description: "short label"
"#;
        let prompt = Prompt::parse_yaml(content).unwrap();
        assert_eq!(prompt.tasks[0].number, 5);
        assert_eq!(prompt.tasks[0].description, "short label");
        assert_eq!(prompt.tasks[0].content, "full text sent to the agent");
    }

    #[test]
    fn convert_round_trips_text_to_yaml_and_back() {
        let dir = tempfile::tempdir().unwrap();
        let text_path = dir.path().join("p.txt");
        std::fs::write(&text_path, "# Demo\n\nsome prompt\n\n1. step one\n2. step two\n").unwrap();

        let yaml_path = dir.path().join("p.yaml");
        convert_prompt(&text_path, &yaml_path).unwrap();
        let prompt = Prompt::load(&yaml_path).unwrap();
        assert_eq!(prompt.tasks.len(), 2);

        let back_path = dir.path().join("p2.txt");
        convert_prompt(&yaml_path, &back_path).unwrap();
        let roundtripped = Prompt::load(&back_path).unwrap();
        assert_eq!(roundtripped.tasks.len(), 2);
        assert_eq!(roundtripped.tasks[0].description, "step one");
    }

    #[test]
    fn webapp_template_has_expected_task_count() {
        let prompt = create_template("webapp", "shopping-cart");
        assert_eq!(prompt.name, "shopping-cart");
        assert_eq!(prompt.tasks.len(), 5);
        assert!(prompt.tasks[0].description.contains("Scaffold"));
    }

    #[test]
    fn unknown_template_kind_falls_back_to_generic() {
        let prompt = create_template("something-else", "x");
        assert_eq!(prompt.tasks.len(), 4);
    }
}
