//! Scripted command runner and fixtures shared by the job tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use autofix_core::{config::Config, models::PullRequestEvent};
use autofix_db::Database;
use autofix_github::GitHubApp;

use crate::{
    JobContext,
    command::{CommandOutput, CommandRunner, CommandSpec},
};

const CONFIG: &str = r#"
server:
  port: 3000
db:
  url: "sqlite::memory:"
github:
  app:
    id: 1
    webhook_secret: secret
    private_key: key
"#;

pub fn test_config() -> Config { serde_yaml::from_str(CONFIG).unwrap() }

/// Context over an in-memory database whose commands all succeed silently.
pub async fn context(github: Arc<dyn GitHubApp>) -> JobContext {
    let config = test_config();
    let store = Database::new(&config.db).await.unwrap();
    JobContext {
        config: Arc::new(config),
        store: Arc::new(store),
        github,
        runner: ScriptedRunner::new(|_| CommandOutput::ok("")),
    }
}

type Script = Box<dyn Fn(&CommandSpec) -> CommandOutput + Send + Sync>;

/// Records every command and answers from a script instead of spawning processes.
pub struct ScriptedRunner {
    calls: Mutex<Vec<CommandSpec>>,
    script: Script,
}

impl ScriptedRunner {
    pub fn new(script: impl Fn(&CommandSpec) -> CommandOutput + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self { calls: Mutex::new(vec![]), script: Box::new(script) })
    }

    pub fn calls(&self) -> Vec<CommandSpec> { self.calls.lock().unwrap().clone() }

    pub fn ran(&self, program: &str, args: &[&str]) -> bool {
        self.calls().iter().any(|c| c.starts_with(program, args))
    }

    pub fn find(&self, program: &str, args: &[&str]) -> Option<CommandSpec> {
        self.calls().into_iter().find(|c| c.starts_with(program, args))
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &CommandSpec) -> CommandOutput {
        self.calls.lock().unwrap().push(command.clone());
        (self.script)(command)
    }
}

/// Writes `files` into the clone when the head ref is checked out.
pub fn write_on_checkout(command: &CommandSpec, files: &[(&str, &str)]) {
    if !command.starts_with("git", &["checkout", "-b"]) {
        return;
    }
    for (path, content) in files {
        let path = command.cwd.join(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }
}

pub fn event() -> PullRequestEvent {
    PullRequestEvent {
        owner: "acme".to_string(),
        repo: "web".to_string(),
        number: 7,
        head_sha: "abc123".to_string(),
        head_ref: "feature/lint".to_string(),
        base_sha: "def456".to_string(),
        head_repo_full_name: "acme/web".to_string(),
        base_repo_full_name: "acme/web".to_string(),
        installation_id: 42,
        html_url: Some("https://github.com/acme/web/pull/7".to_string()),
        owner_type: "Organization".to_string(),
    }
}
