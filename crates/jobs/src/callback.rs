use anyhow::{Context, Result};
use autofix_core::models::{CheckName, Conclusion};
use autofix_github::{checks::CommitRef, reporter::CheckReporter};
use serde::Deserialize;

use crate::JobContext;

/// Body posted by the runner workflow when it finishes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerCallbackPayload {
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub head_sha: Option<String>,
    pub installation_id: Option<u64>,
    pub check_conclusion: Option<Conclusion>,
    pub autofix_conclusion: Option<Conclusion>,
    pub summary: Option<String>,
    pub details_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerCallback {
    pub owner: String,
    pub repo: String,
    pub head_sha: String,
    pub installation_id: u64,
    pub check_conclusion: Conclusion,
    pub autofix_conclusion: Conclusion,
    pub summary: String,
    pub details_url: Option<String>,
}

fn required(value: Option<String>) -> Option<String> { value.filter(|v| !v.is_empty()) }

impl TryFrom<RunnerCallbackPayload> for RunnerCallback {
    type Error = &'static str;

    fn try_from(payload: RunnerCallbackPayload) -> Result<Self, Self::Error> {
        const MISSING: &str = "Missing callback payload fields";
        Ok(Self {
            owner: required(payload.owner).ok_or(MISSING)?,
            repo: required(payload.repo).ok_or(MISSING)?,
            head_sha: required(payload.head_sha).ok_or(MISSING)?,
            installation_id: payload.installation_id.filter(|&id| id != 0).ok_or(MISSING)?,
            summary: required(payload.summary).ok_or(MISSING)?,
            check_conclusion: payload.check_conclusion.unwrap_or_default(),
            autofix_conclusion: payload.autofix_conclusion.unwrap_or_default(),
            details_url: required(payload.details_url),
        })
    }
}

/// Complete both checks of the runner's commit with the reported conclusions.
pub async fn complete_runner_callback(ctx: &JobContext, callback: &RunnerCallback) -> Result<()> {
    tracing::info!(
        "Runner finished {}/{}@{}: {}",
        callback.owner,
        callback.repo,
        callback.head_sha,
        callback.summary
    );
    let client = ctx.github.installation_client(callback.installation_id).await?;
    let mut reporter = CheckReporter::new(
        client.api.clone(),
        CommitRef::new(&callback.owner, &callback.repo, &callback.head_sha),
    )
    .with_target_url(callback.details_url.clone());
    reporter.init().await;
    let text = callback.details_url.as_ref().map(|url| format!("Details: {url}"));
    reporter
        .complete(
            [
                (CheckName::LintCheck, callback.check_conclusion),
                (CheckName::Autofix, callback.autofix_conclusion),
            ],
            &callback.summary,
            text,
        )
        .await
        .context("Failed to report runner result")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use autofix_core::models::{CheckStatus, CommitState};
    use autofix_github::testing::{FakeApp, FakeGitHub};

    use super::*;
    use crate::testing::context;

    fn payload(json: serde_json::Value) -> RunnerCallbackPayload { serde_json::from_value(json).unwrap() }

    fn callback() -> RunnerCallback {
        payload(serde_json::json!({
            "owner": "acme",
            "repo": "web",
            "headSha": "abc123",
            "installationId": 42,
            "checkConclusion": "failure",
            "summary": "Runner finished",
            "detailsUrl": "https://github.com/acme/runner/actions/runs/1"
        }))
        .try_into()
        .unwrap()
    }

    #[test]
    fn validates_required_fields() {
        let callback = callback();
        assert_eq!(callback.check_conclusion, Conclusion::Failure);
        assert_eq!(callback.autofix_conclusion, Conclusion::Success);
        for missing in ["owner", "repo", "headSha", "installationId", "summary"] {
            let mut json = serde_json::json!({
                "owner": "acme",
                "repo": "web",
                "headSha": "abc123",
                "installationId": 42,
                "summary": "done"
            });
            json.as_object_mut().unwrap().remove(missing);
            assert!(RunnerCallback::try_from(payload(json)).is_err(), "{missing}");
        }
        let empty = payload(serde_json::json!({ "owner": "", "repo": "web", "headSha": "a", "installationId": 1, "summary": "s" }));
        assert!(RunnerCallback::try_from(empty).is_err());
    }

    #[tokio::test]
    async fn completes_checks_with_distinct_conclusions() {
        let github = Arc::new(FakeGitHub::new());
        let ctx = context(Arc::new(FakeApp::new(github.clone()))).await;
        complete_runner_callback(&ctx, &callback()).await.unwrap();
        let updates = github.check_run_updates();
        assert_eq!(updates.len(), 2);
        for (_, update) in &updates {
            assert_eq!(update.status, CheckStatus::Completed);
            assert_eq!(update.output.summary, "Runner finished");
            assert_eq!(
                update.output.text.as_deref(),
                Some("Details: https://github.com/acme/runner/actions/runs/1")
            );
        }
        let created = github.created_check_runs();
        let conclusion_of = |name: &str| {
            let id = github.state().check_runs.iter().find(|r| r.name == name).unwrap().id;
            updates.iter().find(|(i, _)| *i == id).unwrap().1.conclusion
        };
        assert_eq!(created.len(), 2);
        assert_eq!(conclusion_of("lint-check"), Some(Conclusion::Failure));
        assert_eq!(conclusion_of("autofix"), Some(Conclusion::Success));
    }

    #[tokio::test]
    async fn falls_back_to_statuses_with_details_url() {
        let github = Arc::new(FakeGitHub::new());
        github.state().fail_checks = true;
        let ctx = context(Arc::new(FakeApp::new(github.clone()))).await;
        complete_runner_callback(&ctx, &callback()).await.unwrap();
        let statuses = github.statuses();
        assert_eq!(statuses.len(), 2);
        let states: Vec<_> = statuses.iter().map(|s| (s.context.as_str(), s.state)).collect();
        assert!(states.contains(&("lint-check", CommitState::Failure)));
        assert!(states.contains(&("autofix", CommitState::Success)));
        assert!(statuses.iter().all(|s| {
            s.target_url.as_deref() == Some("https://github.com/acme/runner/actions/runs/1")
        }));
    }

    #[tokio::test]
    async fn reporting_failure_is_an_error() {
        let github = Arc::new(FakeGitHub::new());
        {
            let mut state = github.state();
            state.fail_checks = true;
            state.fail_commit_statuses = true;
        }
        let ctx = context(Arc::new(FakeApp::new(github.clone()))).await;
        assert!(complete_runner_callback(&ctx, &callback()).await.is_err());
    }
}
