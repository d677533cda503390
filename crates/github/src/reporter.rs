use std::{collections::HashSet, sync::Arc};

use anyhow::Result;
use autofix_core::models::{CheckName, CommitState, Conclusion};

use crate::{
    GitHubApi,
    checks::{CheckRunIds, CheckTransition, CommitRef, ensure_check_runs, report_statuses, update_check_runs},
};

/// Reports the two checks of one commit through Check Runs, degrading a check to commit
/// statuses once a Check Run call for it fails. The degradation is permanent for the
/// lifetime of the reporter, and each transition of a check goes out exactly one way.
pub struct CheckReporter {
    api: Arc<dyn GitHubApi>,
    commit: CommitRef,
    target_url: Option<String>,
    check_run_ids: Option<CheckRunIds>,
    /// Checks reported through commit statuses from now on.
    degraded: HashSet<CheckName>,
    completed: bool,
}

impl CheckReporter {
    pub fn new(api: Arc<dyn GitHubApi>, commit: CommitRef) -> Self {
        Self {
            api,
            commit,
            target_url: None,
            check_run_ids: None,
            degraded: HashSet::new(),
            completed: false,
        }
    }

    /// Link attached to commit statuses.
    pub fn with_target_url(mut self, target_url: Option<String>) -> Self {
        self.target_url = target_url;
        self
    }

    pub fn commit(&self) -> &CommitRef { &self.commit }

    /// Whether any check has fallen back to commit statuses.
    pub fn using_commit_statuses(&self) -> bool { !self.degraded.is_empty() }

    /// Whether a terminal state has been reported.
    pub fn is_completed(&self) -> bool { self.completed }

    pub async fn init(&mut self) {
        match ensure_check_runs(self.api.as_ref(), &self.commit).await {
            Ok(ids) => self.check_run_ids = Some(ids),
            Err(e) => {
                tracing::warn!(
                    "Failed to ensure check runs for {}/{}@{}; falling back to commit statuses: {:?}",
                    self.commit.owner,
                    self.commit.repo,
                    self.commit.sha,
                    e
                );
                self.degraded.extend(CheckName::ALL);
            }
        }
    }

    pub async fn mark_in_progress(&mut self) -> Result<()> {
        let transitions = CheckName::ALL.map(CheckTransition::in_progress);
        let states = CheckName::ALL.map(|name| (name, CommitState::Pending));
        self.report(&transitions, &states, &transitions[0].summary).await
    }

    pub async fn complete_success(&mut self, summary: &str, text: Option<String>) -> Result<()> {
        self.complete(CheckName::ALL.map(|name| (name, Conclusion::Success)), summary, text).await
    }

    pub async fn complete_failure(&mut self, summary: &str, text: Option<String>) -> Result<()> {
        self.complete(CheckName::ALL.map(|name| (name, Conclusion::Failure)), summary, text).await
    }

    /// Complete each check with its own conclusion. A second completion after a
    /// successfully reported one is ignored.
    pub async fn complete(
        &mut self,
        conclusions: [(CheckName, Conclusion); 2],
        summary: &str,
        text: Option<String>,
    ) -> Result<()> {
        if self.completed {
            tracing::warn!(
                "Ignoring repeated completion for {}/{}@{}: {}",
                self.commit.owner,
                self.commit.repo,
                self.commit.sha,
                summary
            );
            return Ok(());
        }
        let transitions = conclusions.map(|(name, conclusion)| {
            CheckTransition::completed(name, conclusion, summary, text.clone())
        });
        let states = conclusions.map(|(name, conclusion)| (name, conclusion.commit_state()));
        self.report(&transitions, &states, summary).await?;
        self.completed = true;
        Ok(())
    }

    async fn report(
        &mut self,
        transitions: &[CheckTransition],
        states: &[(CheckName, CommitState)],
        description: &str,
    ) -> Result<()> {
        let via_checks: Vec<CheckTransition> =
            transitions.iter().filter(|t| !self.degraded.contains(&t.name)).cloned().collect();
        if !via_checks.is_empty() {
            let ids = self.check_run_ids.as_ref();
            let results = update_check_runs(self.api.as_ref(), &self.commit, ids, &via_checks).await;
            for (name, result) in results {
                if let Err(e) = result {
                    tracing::warn!(
                        "Failed to update check run {} for {}/{}@{}; falling back to commit statuses: {:?}",
                        name,
                        self.commit.owner,
                        self.commit.repo,
                        self.commit.sha,
                        e
                    );
                    self.degraded.insert(name);
                }
            }
        }
        let fallback: Vec<(CheckName, CommitState)> =
            states.iter().filter(|(name, _)| self.degraded.contains(name)).copied().collect();
        if fallback.is_empty() {
            return Ok(());
        }
        let target_url = self.target_url.as_deref();
        report_statuses(self.api.as_ref(), &self.commit, &fallback, description, target_url).await
    }
}

#[cfg(test)]
mod tests {
    use autofix_core::models::CheckStatus;

    use super::*;
    use crate::testing::FakeGitHub;

    fn reporter(github: &Arc<FakeGitHub>) -> CheckReporter {
        CheckReporter::new(github.clone(), CommitRef::new("acme", "web", "abc"))
            .with_target_url(Some("https://github.com/acme/web/pull/1".to_string()))
    }

    #[tokio::test]
    async fn happy_path_uses_check_runs_only() {
        let github = Arc::new(FakeGitHub::new());
        let mut reporter = reporter(&github);
        reporter.init().await;
        reporter.mark_in_progress().await.unwrap();
        reporter.complete_success("Lint Autofix Pro: no changes needed", None).await.unwrap();
        assert!(!reporter.using_commit_statuses());
        assert!(reporter.is_completed());
        assert!(github.statuses().is_empty());
        let updates = github.check_run_updates();
        assert_eq!(updates.len(), 4);
        assert!(updates[..2].iter().all(|(_, u)| u.status == CheckStatus::InProgress));
        assert!(updates[2..].iter().all(|(_, u)| {
            u.status == CheckStatus::Completed && u.conclusion == Some(Conclusion::Success)
        }));
    }

    #[tokio::test]
    async fn init_failure_degrades_permanently() {
        let github = Arc::new(FakeGitHub::new());
        github.state().fail_checks = true;
        let mut reporter = reporter(&github);
        reporter.init().await;
        assert!(reporter.using_commit_statuses());
        let check_calls = github.check_run_calls();

        // Checks would work again, but the reporter must not go back to them.
        github.state().fail_checks = false;
        reporter.mark_in_progress().await.unwrap();
        reporter.complete_failure("Lint Autofix Pro: tool failures", None).await.unwrap();
        assert_eq!(github.check_run_calls(), check_calls);

        let statuses = github.statuses();
        assert_eq!(statuses.len(), 4);
        assert!(statuses[..2].iter().all(|s| s.state == CommitState::Pending));
        assert!(statuses[2..].iter().all(|s| s.state == CommitState::Failure));
        assert_eq!(statuses[0].context, "lint-check");
        assert_eq!(statuses[1].context, "autofix");
        assert_eq!(statuses[2].description, "Lint Autofix Pro: tool failures");
        assert_eq!(statuses[0].target_url.as_deref(), Some("https://github.com/acme/web/pull/1"));
    }

    #[tokio::test]
    async fn update_failure_falls_back_for_the_same_transition() {
        let github = Arc::new(FakeGitHub::new());
        let mut reporter = reporter(&github);
        reporter.init().await;
        github.state().fail_check_updates = true;
        reporter.mark_in_progress().await.unwrap();
        assert!(reporter.using_commit_statuses());
        let statuses = github.statuses();
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|s| s.state == CommitState::Pending));

        let check_calls = github.check_run_calls();
        github.state().fail_check_updates = false;
        reporter.complete_success("done", None).await.unwrap();
        assert_eq!(github.check_run_calls(), check_calls);
        assert_eq!(github.statuses().len(), 4);
    }

    #[tokio::test]
    async fn only_the_failing_check_falls_back() {
        let github = Arc::new(FakeGitHub::new());
        let mut reporter = reporter(&github);
        reporter.init().await;
        let autofix_id =
            github.state().check_runs.iter().find(|r| r.name == "autofix").unwrap().id;
        github.state().failing_check_run_ids.insert(autofix_id);
        reporter.mark_in_progress().await.unwrap();

        // The failed check stays on statuses even once its run would accept updates.
        github.state().failing_check_run_ids.clear();
        reporter.complete_success("done", None).await.unwrap();

        let statuses = github.statuses();
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|s| s.context == "autofix"));
        assert_eq!(statuses[0].state, CommitState::Pending);
        assert_eq!(statuses[1].state, CommitState::Success);
        let updates = github.check_run_updates();
        let lint_updates: Vec<_> = updates.iter().filter(|(id, _)| *id != autofix_id).collect();
        assert_eq!(lint_updates.len(), 2);
        assert_eq!(lint_updates[1].1.status, CheckStatus::Completed);
        assert_eq!(updates.iter().filter(|(id, _)| *id == autofix_id).count(), 1);
    }

    #[tokio::test]
    async fn second_completion_is_ignored() {
        let github = Arc::new(FakeGitHub::new());
        let mut reporter = reporter(&github);
        reporter.init().await;
        reporter.complete_success("first", None).await.unwrap();
        let calls = github.calls().len();
        reporter.complete_failure("second", None).await.unwrap();
        assert_eq!(github.calls().len(), calls);
    }

    #[tokio::test]
    async fn failed_completion_stays_open() {
        let github = Arc::new(FakeGitHub::new());
        {
            let mut state = github.state();
            state.fail_checks = true;
            state.fail_commit_statuses = true;
        }
        let mut reporter = reporter(&github);
        reporter.init().await;
        assert!(reporter.complete_success("first", None).await.is_err());
        assert!(!reporter.is_completed());
        github.state().fail_commit_statuses = false;
        reporter.complete_failure("Lint Autofix Pro: internal error", None).await.unwrap();
        assert!(reporter.is_completed());
    }

    #[tokio::test]
    async fn distinct_conclusions_map_to_statuses() {
        let github = Arc::new(FakeGitHub::new());
        github.state().fail_checks = true;
        let mut reporter = reporter(&github);
        reporter.init().await;
        reporter
            .complete(
                [(CheckName::LintCheck, Conclusion::Failure), (CheckName::Autofix, Conclusion::Success)],
                "runner finished",
                Some("Details: https://example.com/run/1".to_string()),
            )
            .await
            .unwrap();
        let statuses = github.statuses();
        assert_eq!(statuses[0].state, CommitState::Failure);
        assert_eq!(statuses[1].state, CommitState::Success);
    }
}
