pub mod callback;
pub mod command;
pub mod handler;
pub mod installation;
pub mod pipeline;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use autofix_core::config::Config;
use autofix_db::InstallationStore;
use autofix_github::GitHubApp;
pub use callback::{RunnerCallback, RunnerCallbackPayload, complete_runner_callback};
pub use command::{CommandRunner, TokioCommandRunner};
pub use handler::PullRequestHandler;
pub use installation::handle_installation_event;

/// Shared context available to all job handlers.
#[derive(Clone)]
pub struct JobContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn InstallationStore>,
    pub github: Arc<dyn GitHubApp>,
    pub runner: Arc<dyn CommandRunner>,
}

impl JobContext {
    /// Context running commands as real processes with the configured limits.
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn InstallationStore>,
        github: Arc<dyn GitHubApp>,
    ) -> Self {
        let runner = Arc::new(TokioCommandRunner::new(
            config.pipeline.command_timeout(),
            config.pipeline.max_output_bytes,
        ));
        Self { config, store, github, runner }
    }
}
