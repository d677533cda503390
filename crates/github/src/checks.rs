use std::collections::HashMap;

use anyhow::{Result, anyhow};
use autofix_core::{
    models::{APP_TITLE, CheckName, CheckStatus, CommitState, Conclusion, Summary},
    util::truncate_chars,
};
use futures_util::future::join_all;

use crate::{
    CheckRun, CheckRunOutput, CheckRunUpdate, GitHubApi, NewCheckRun, NewCommitStatus, PER_PAGE,
    now_rfc3339,
};

/// Commit status descriptions are limited to 140 characters by GitHub.
pub const MAX_STATUS_DESCRIPTION: usize = 140;

/// The commit checks are reported against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRef {
    pub owner: String,
    pub repo: String,
    pub sha: String,
}

impl CommitRef {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, sha: impl Into<String>) -> Self {
        Self { owner: owner.into(), repo: repo.into(), sha: sha.into() }
    }
}

pub type CheckRunIds = HashMap<CheckName, u64>;

/// One requested state change of a named check run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckTransition {
    pub name: CheckName,
    pub status: CheckStatus,
    pub conclusion: Option<Conclusion>,
    pub summary: String,
    pub text: Option<String>,
}

impl CheckTransition {
    pub fn in_progress(name: CheckName) -> Self {
        Self {
            name,
            status: CheckStatus::InProgress,
            conclusion: None,
            summary: Summary::Running.to_string(),
            text: None,
        }
    }

    pub fn completed(
        name: CheckName,
        conclusion: Conclusion,
        summary: impl Into<String>,
        text: Option<String>,
    ) -> Self {
        Self {
            name,
            status: CheckStatus::Completed,
            conclusion: Some(conclusion),
            summary: summary.into(),
            text,
        }
    }

    fn output(&self) -> CheckRunOutput {
        CheckRunOutput {
            title: APP_TITLE.to_string(),
            summary: self.summary.clone(),
            text: self.text.clone(),
        }
    }
}

/// For every recognized name, the id of the newest run. Ids are assigned monotonically,
/// so the highest id wins regardless of response order.
pub fn newest_check_runs(runs: &[CheckRun]) -> CheckRunIds {
    let mut ids = CheckRunIds::new();
    for run in runs {
        let Some(name) = CheckName::from_name(&run.name) else {
            continue;
        };
        ids.entry(name).and_modify(|id| *id = (*id).max(run.id)).or_insert(run.id);
    }
    ids
}

/// Reuse the newest existing run per check name for the commit, creating queued runs
/// for the names that have none.
pub async fn ensure_check_runs(api: &dyn GitHubApi, commit: &CommitRef) -> Result<CheckRunIds> {
    let existing =
        api.list_check_runs_for_ref(&commit.owner, &commit.repo, &commit.sha, PER_PAGE).await?;
    let mut ids = newest_check_runs(&existing);
    let started_at = now_rfc3339();
    for name in CheckName::ALL {
        if ids.contains_key(&name) {
            continue;
        }
        let run = api
            .create_check_run(&commit.owner, &commit.repo, &NewCheckRun {
                name: name.to_string(),
                head_sha: commit.sha.clone(),
                status: CheckStatus::Queued,
                conclusion: None,
                started_at: Some(started_at.clone()),
                completed_at: None,
                output: CheckRunOutput {
                    title: APP_TITLE.to_string(),
                    summary: Summary::Queued.to_string(),
                    text: None,
                },
            })
            .await?;
        tracing::debug!("Created check run {} ({}) for {}", name, run.id, commit.sha);
        ids.insert(name, run.id);
    }
    Ok(ids)
}

/// Update the run if its id is known, otherwise create it directly in the target state.
pub async fn update_check_run(
    api: &dyn GitHubApi,
    commit: &CommitRef,
    check_run_id: Option<u64>,
    transition: &CheckTransition,
) -> Result<()> {
    let now = now_rfc3339();
    let completed = transition.status == CheckStatus::Completed;
    let conclusion = if completed { transition.conclusion } else { None };
    let completed_at = completed.then(|| now.clone());
    let started_at = (transition.status == CheckStatus::InProgress).then_some(now);
    match check_run_id {
        Some(id) => {
            api.update_check_run(&commit.owner, &commit.repo, id, &CheckRunUpdate {
                status: transition.status,
                conclusion,
                started_at,
                completed_at,
                output: transition.output(),
            })
            .await
        }
        None => {
            api.create_check_run(&commit.owner, &commit.repo, &NewCheckRun {
                name: transition.name.to_string(),
                head_sha: commit.sha.clone(),
                status: transition.status,
                conclusion,
                started_at,
                completed_at,
                output: transition.output(),
            })
            .await
            .map(|_| ())
        }
    }
}

/// Apply every transition independently. One failing run neither cancels nor fails the
/// others; the outcome is returned per check name.
pub async fn update_check_runs(
    api: &dyn GitHubApi,
    commit: &CommitRef,
    ids: Option<&CheckRunIds>,
    transitions: &[CheckTransition],
) -> Vec<(CheckName, Result<()>)> {
    join_all(transitions.iter().map(|transition| {
        let id = ids.and_then(|ids| ids.get(&transition.name).copied());
        async move { (transition.name, update_check_run(api, commit, id, transition).await) }
    }))
    .await
}

/// Report one commit status per context. Every context is attempted; failures are
/// logged individually and reported as a single error afterwards.
pub async fn report_statuses(
    api: &dyn GitHubApi,
    commit: &CommitRef,
    states: &[(CheckName, CommitState)],
    description: &str,
    target_url: Option<&str>,
) -> Result<()> {
    let (description, _) = truncate_chars(description, MAX_STATUS_DESCRIPTION);
    let results = join_all(states.iter().map(|(context, state)| {
        let status = NewCommitStatus {
            state: *state,
            context: context.to_string(),
            description: description.to_string(),
            target_url: target_url.map(str::to_string),
        };
        async move {
            let result =
                api.create_commit_status(&commit.owner, &commit.repo, &commit.sha, &status).await;
            (status.context, result)
        }
    }))
    .await;
    let mut failed = 0;
    for (context, result) in results {
        if let Err(e) = result {
            tracing::error!(
                "Failed to report commit status {} for {}/{}@{}: {:?}",
                context,
                commit.owner,
                commit.repo,
                commit.sha,
                e
            );
            failed += 1;
        }
    }
    if failed > 0 {
        return Err(anyhow!("Failed to report {failed} of {} commit statuses", states.len()));
    }
    Ok(())
}
