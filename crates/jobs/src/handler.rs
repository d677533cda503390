use anyhow::Result;
use autofix_core::{
    config::ExecutionMode,
    models::{PullRequestEvent, PullRequestPayload, Summary},
    plan::{Plan, PlanPolicy},
    repo_config::RepoConfig,
};
use autofix_db::{NewInstallation, StoreError};
use autofix_github::{
    InstallationClient,
    checks::CommitRef,
    comment::{build_comment_body, build_failure_comment_body, upsert_comment},
    dispatch::{RunnerDispatchPayload, RunnerTarget, dispatch_runner_workflow},
    inspector::{detect_repo_tooling, is_supported_file, list_pull_request_files},
    reporter::CheckReporter,
};

use crate::{JobContext, pipeline::Pipeline};

/// How a qualifying pull request is fixed once detection says there is work to do.
pub enum ExecutionStrategy {
    /// Run the pipeline in this process and report the result directly.
    Local(Pipeline),
    /// Hand the run to the runner workflow, which reports back through the callback.
    Dispatch,
}

/// Client and reporter of one delivery, available once the token exchange succeeded.
struct Session {
    client: InstallationClient,
    reporter: CheckReporter,
}

pub struct PullRequestHandler {
    ctx: JobContext,
    strategy: ExecutionStrategy,
}

impl PullRequestHandler {
    pub fn new(ctx: JobContext) -> Self {
        let strategy = match ctx.config.pipeline.mode {
            ExecutionMode::Local => ExecutionStrategy::Local(Pipeline::new(
                ctx.runner.clone(),
                &ctx.config.pipeline,
            )),
            ExecutionMode::Dispatch => ExecutionStrategy::Dispatch,
        };
        Self { ctx, strategy }
    }

    /// Process one `pull_request` delivery. Never fails: payloads that do not qualify
    /// are ignored and processing errors are logged and reported on the PR.
    pub async fn handle(&self, payload: &PullRequestPayload) {
        let event = match PullRequestEvent::from_payload(payload) {
            Ok(event) => event,
            Err(reason) => {
                tracing::debug!("Ignoring pull_request event: {}", reason);
                return;
            }
        };
        tracing::info!(
            "Processing {}#{} at {} (installation {})",
            event.full_name(),
            event.number,
            event.head_sha,
            event.installation_id
        );
        let mut session = None;
        if let Err(e) = self.process(&event, &mut session).await {
            tracing::error!("Failed to process {}#{}: {:?}", event.full_name(), event.number, e);
            if let Some(session) = session.as_mut() {
                Self::report_failure(&event, session, &e).await;
            }
        }
    }

    async fn process(&self, event: &PullRequestEvent, session: &mut Option<Session>) -> Result<()> {
        let client = self.ctx.github.installation_client(event.installation_id).await?;
        let mut reporter = CheckReporter::new(
            client.api.clone(),
            CommitRef::new(&event.owner, &event.repo, &event.head_sha),
        )
        .with_target_url(event.html_url.clone());
        reporter.init().await;
        let session = session.insert(Session { client, reporter });
        let api = session.client.api.as_ref();

        let files = list_pull_request_files(api, &event.owner, &event.repo, event.number).await?;
        if !files.iter().any(|f| is_supported_file(f)) {
            tracing::info!("No supported files changed in {}#{}", event.full_name(), event.number);
            let summary = Summary::NoSupportedFiles.to_string();
            return session.reporter.complete_success(&summary, None).await;
        }

        let tooling = detect_repo_tooling(api, &event.owner, &event.repo, &event.head_sha).await?;
        if !tooling.any() {
            tracing::info!("No Prettier/ESLint configuration in {}", event.full_name());
            let summary = Summary::NotConfigured.to_string();
            return session.reporter.complete_success(&summary, None).await;
        }

        if let Err(e) = session.reporter.mark_in_progress().await {
            tracing::warn!(
                "Failed to mark {}@{} in progress: {:?}",
                event.full_name(),
                event.head_sha,
                e
            );
        }

        let policy = Plan::for_repository(event.installation_id, &event.full_name()).policy();
        match &self.strategy {
            ExecutionStrategy::Local(pipeline) => {
                self.run_local(pipeline, event, &policy, session).await
            }
            ExecutionStrategy::Dispatch => self.dispatch(event, &policy, session).await,
        }
    }

    async fn run_local(
        &self,
        pipeline: &Pipeline,
        event: &PullRequestEvent,
        policy: &PlanPolicy,
        session: &mut Session,
    ) -> Result<()> {
        let result = pipeline.run(event, &session.client.token, policy).await?;
        self.record_repo_config(event, &result.config).await?;

        let body = build_comment_body(&result);
        upsert_comment(session.client.api.as_ref(), &event.owner, &event.repo, event.number, &body)
            .await?;

        let summary = result.summary().to_string();
        if result.has_failures() {
            session.reporter.complete_failure(&summary, None).await
        } else {
            session.reporter.complete_success(&summary, None).await
        }
    }

    async fn record_repo_config(
        &self,
        event: &PullRequestEvent,
        config: &RepoConfig,
    ) -> Result<()> {
        let installation = NewInstallation {
            installation_id: event.installation_id,
            account_login: event.owner.clone(),
            account_type: event.owner_type.clone(),
        };
        let config_json = serde_json::to_string_pretty(config)?;
        let stored =
            self.ctx.store.record_repo_config(&installation, &event.full_name(), &config_json).await;
        match stored {
            Ok(()) => Ok(()),
            Err(StoreError::MissingParent(id)) => {
                tracing::warn!(
                    "Installation {} missing while storing config for {}; skipping",
                    id,
                    event.full_name()
                );
                Ok(())
            }
            Err(StoreError::Other(e)) => Err(e.context("Failed to store repo config")),
        }
    }

    async fn dispatch(
        &self,
        event: &PullRequestEvent,
        policy: &PlanPolicy,
        session: &mut Session,
    ) -> Result<()> {
        let dispatch_failed = Summary::DispatchFailed.to_string();
        let configured = self.ctx.config.runner.as_ref().and_then(|runner| {
            let url = runner.callback_url().filter(|_| !runner.callback_token.is_empty())?;
            Some((runner, url))
        });
        let Some((runner, callback_url)) = configured else {
            tracing::warn!(
                "Runner callback URL or token not configured; not dispatching {}#{}",
                event.full_name(),
                event.number
            );
            return session.reporter.complete_success(&dispatch_failed, None).await;
        };

        let target = RunnerTarget {
            owner: runner.owner.clone(),
            repo: runner.repo.clone(),
            workflow: runner.workflow.clone(),
            git_ref: runner.git_ref.clone(),
        };
        let payload = RunnerDispatchPayload {
            owner: event.owner.clone(),
            repo: event.repo.clone(),
            pr_number: event.number,
            head_sha: event.head_sha.clone(),
            base_sha: event.base_sha.clone(),
            git_ref: event.head_ref.clone(),
            installation_id: event.installation_id,
            plan: policy.plan.to_string(),
            priority: policy.priority,
            max_runtime_secs: policy.max_runtime.as_secs(),
            allow_fix_commit: policy.allow_fix_commit,
            callback_url: callback_url.to_string(),
            callback_token: runner.callback_token.clone(),
        };
        let api = session.client.api.as_ref();
        if let Err(e) = dispatch_runner_workflow(api, &target, &payload).await {
            tracing::warn!(
                "Runner dispatch for {}#{} failed: {:?}",
                event.full_name(),
                event.number,
                e
            );
            return session.reporter.complete_success(&dispatch_failed, None).await;
        }
        Ok(())
    }

    async fn report_failure(
        event: &PullRequestEvent,
        session: &mut Session,
        error: &anyhow::Error,
    ) {
        let body = build_failure_comment_body();
        let api = session.client.api.as_ref();
        if let Err(e) = upsert_comment(api, &event.owner, &event.repo, event.number, &body).await {
            tracing::warn!(
                "Failed to post failure comment on {}#{}: {:?}",
                event.full_name(),
                event.number,
                e
            );
        }
        let summary = Summary::InternalError.to_string();
        let details = Some(format!("{error:?}"));
        if let Err(e) = session.reporter.complete_failure(&summary, details).await {
            tracing::warn!(
                "Failed to report failure for {}@{}: {:?}",
                event.full_name(),
                event.head_sha,
                e
            );
        }
    }
}
