pub mod checks;
pub mod client;
pub mod comment;
pub mod dispatch;
pub mod inspector;
pub mod reporter;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod webhook;

use std::{collections::BTreeMap, future::Future, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use autofix_core::{
    config::GitHubConfig,
    models::{CheckStatus, CommitState, Conclusion},
};
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};

pub use client::OctocrabApi;

/// Maximum page size accepted by the GitHub REST API.
pub const PER_PAGE: u8 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckRun {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckRunOutput {
    pub title: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewCheckRun {
    pub name: String,
    pub head_sha: String,
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<Conclusion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    pub output: CheckRunOutput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckRunUpdate {
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<Conclusion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    pub output: CheckRunOutput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewCommitStatus {
    pub state: CommitState,
    pub context: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PullRequestFile {
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IssueComment {
    pub id: u64,
    #[serde(default)]
    pub body: Option<String>,
}

/// The subset of the GitHub REST API the bot relies on, scoped to one installation.
///
/// Transport errors propagate as-is. A missing file is not an error: [`get_content`]
/// returns `Ok(None)` for 404s and for paths that name a directory.
///
/// [`get_content`]: GitHubApi::get_content
#[async_trait]
pub trait GitHubApi: Send + Sync {
    async fn list_check_runs_for_ref(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
        per_page: u8,
    ) -> Result<Vec<CheckRun>>;

    async fn create_check_run(&self, owner: &str, repo: &str, run: &NewCheckRun) -> Result<CheckRun>;

    async fn update_check_run(
        &self,
        owner: &str,
        repo: &str,
        check_run_id: u64,
        update: &CheckRunUpdate,
    ) -> Result<()>;

    async fn create_commit_status(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        status: &NewCommitStatus,
    ) -> Result<()>;

    /// Decoded UTF-8 content of a file at `git_ref`.
    async fn get_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>>;

    async fn list_pull_request_files(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        page: u32,
        per_page: u8,
    ) -> Result<Vec<PullRequestFile>>;

    async fn list_issue_comments(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        page: u32,
        per_page: u8,
    ) -> Result<Vec<IssueComment>>;

    async fn create_issue_comment(&self, owner: &str, repo: &str, number: u64, body: &str)
    -> Result<()>;

    async fn update_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        comment_id: u64,
        body: &str,
    ) -> Result<()>;

    async fn create_workflow_dispatch(
        &self,
        owner: &str,
        repo: &str,
        workflow: &str,
        git_ref: &str,
        inputs: &BTreeMap<String, String>,
    ) -> Result<()>;
}

/// Fetch pages starting at 1 until a page shorter than `per_page` is returned.
pub async fn paginate<T, F, Fut>(per_page: u8, mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    anyhow::ensure!(per_page > 0, "Page size must be at least 1");
    let mut items = Vec::new();
    let mut page = 1;
    loop {
        let batch = fetch(page).await?;
        let len = batch.len();
        items.extend(batch);
        if len < per_page as usize {
            break;
        }
        page += 1;
    }
    Ok(items)
}

/// An installation-scoped API client and the token it authenticates with.
/// The token is also used for authenticated git remotes.
#[derive(Clone)]
pub struct InstallationClient {
    pub token: String,
    pub api: Arc<dyn GitHubApi>,
}

impl std::fmt::Debug for InstallationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationClient").field("token", &"<redacted>").finish_non_exhaustive()
    }
}

/// Exchanges an installation id for a short-lived access token.
#[async_trait]
pub trait GitHubApp: Send + Sync {
    async fn installation_client(&self, installation_id: u64) -> Result<InstallationClient>;
}

#[derive(Deserialize)]
struct AccessToken {
    token: String,
}

#[derive(Clone)]
pub struct GitHub {
    pub app_client: Octocrab,
}

impl GitHub {
    pub fn new(config: &GitHubConfig) -> Result<Arc<Self>> {
        let key = jsonwebtoken::EncodingKey::from_rsa_pem(config.app.private_key.as_bytes())
            .context("Failed to parse GitHub App private key")?;
        let app_client = Octocrab::builder()
            .app(config.app.id.into(), key)
            .build()
            .context("Failed to create GitHub client")?;
        Ok(Arc::new(Self { app_client }))
    }
}

#[async_trait]
impl GitHubApp for GitHub {
    async fn installation_client(&self, installation_id: u64) -> Result<InstallationClient> {
        let response: AccessToken = self
            .app_client
            .post(format!("/app/installations/{installation_id}/access_tokens"), None::<&()>)
            .await
            .with_context(|| format!("Failed to create access token for installation {installation_id}"))?;
        let client = Octocrab::builder()
            .personal_token(response.token.clone())
            .build()
            .context("Failed to create installation client")?;
        Ok(InstallationClient { token: response.token, api: Arc::new(OctocrabApi::new(client)) })
    }
}

/// Current time formatted for check-run timestamps.
pub(crate) fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[tokio::test]
    async fn paginate_stops_on_short_page() {
        let requested = Mutex::new(vec![]);
        let items = paginate(2, |page| {
            requested.lock().unwrap().push(page);
            async move {
                Ok(match page {
                    1 => vec![1, 2],
                    2 => vec![3, 4],
                    3 => vec![5],
                    _ => unreachable!(),
                })
            }
        })
        .await
        .unwrap();
        assert_eq!(items, vec![1, 2, 3, 4, 5]);
        assert_eq!(*requested.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn paginate_handles_empty_trailing_page() {
        let items = paginate(1, |page| async move {
            Ok(if page <= 2 { vec![page] } else { vec![] })
        })
        .await
        .unwrap();
        assert_eq!(items, vec![1, 2]);
    }

    #[tokio::test]
    async fn paginate_rejects_zero_page_size() {
        let fetched = Mutex::new(0);
        let result: Result<Vec<u32>> = paginate(0, |_| {
            *fetched.lock().unwrap() += 1;
            async { Ok(vec![]) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(*fetched.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn paginate_propagates_errors() {
        let result: Result<Vec<u32>> =
            paginate(1, |page| async move { if page == 1 { Ok(vec![1]) } else { anyhow::bail!("boom") } })
                .await;
        assert!(result.is_err());
    }
}
