use std::collections::BTreeMap;

use anyhow::{Context, Result};

use crate::GitHubApi;

/// Where runner workflows are dispatched to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerTarget {
    pub owner: String,
    pub repo: String,
    pub workflow: String,
    pub git_ref: String,
}

/// Inputs handed to the runner workflow. The runner reports back to `callback_url`
/// presenting `callback_token`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerDispatchPayload {
    pub owner: String,
    pub repo: String,
    pub pr_number: u64,
    pub head_sha: String,
    pub base_sha: String,
    pub git_ref: String,
    pub installation_id: u64,
    pub plan: String,
    pub priority: u32,
    pub max_runtime_secs: u64,
    pub allow_fix_commit: bool,
    pub callback_url: String,
    pub callback_token: String,
}

impl RunnerDispatchPayload {
    /// Workflow dispatch only accepts string inputs.
    pub fn inputs(&self) -> BTreeMap<String, String> {
        [
            ("owner", self.owner.clone()),
            ("repo", self.repo.clone()),
            ("prNumber", self.pr_number.to_string()),
            ("headSha", self.head_sha.clone()),
            ("baseSha", self.base_sha.clone()),
            ("ref", self.git_ref.clone()),
            ("installationId", self.installation_id.to_string()),
            ("plan", self.plan.clone()),
            ("priority", self.priority.to_string()),
            ("maxRuntimeSec", self.max_runtime_secs.to_string()),
            ("allowFixCommit", self.allow_fix_commit.to_string()),
            ("callbackUrl", self.callback_url.clone()),
            ("callbackToken", self.callback_token.clone()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}

pub async fn dispatch_runner_workflow(
    api: &dyn GitHubApi,
    target: &RunnerTarget,
    payload: &RunnerDispatchPayload,
) -> Result<()> {
    tracing::info!(
        "Dispatching runner workflow {}/{} {} for {}/{}#{} (installation {})",
        target.owner,
        target.repo,
        target.workflow,
        payload.owner,
        payload.repo,
        payload.pr_number,
        payload.installation_id
    );
    api.create_workflow_dispatch(
        &target.owner,
        &target.repo,
        &target.workflow,
        &target.git_ref,
        &payload.inputs(),
    )
    .await
    .with_context(|| format!("Failed to dispatch {}/{} {}", target.owner, target.repo, target.workflow))
}
