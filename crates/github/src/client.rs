use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use http::StatusCode;
use octocrab::{GitHubError, Octocrab};
use serde::{Deserialize, Serialize};

use crate::{
    CheckRun, CheckRunUpdate, GitHubApi, IssueComment, NewCheckRun, NewCommitStatus,
    PullRequestFile,
};

/// [`GitHubApi`] over the REST routes of an authenticated [`Octocrab`] client.
#[derive(Clone)]
pub struct OctocrabApi {
    client: Octocrab,
}

impl OctocrabApi {
    pub fn new(client: Octocrab) -> Self { Self { client } }
}

#[derive(Serialize)]
struct PageParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    per_page: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page: Option<u32>,
}

#[derive(Serialize)]
struct RefParams<'a> {
    #[serde(rename = "ref")]
    git_ref: &'a str,
}

#[derive(Deserialize)]
struct CheckRunList {
    check_runs: Vec<CheckRun>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ContentResponse {
    File { content: Option<String> },
    #[allow(dead_code)]
    Directory(Vec<serde::de::IgnoredAny>),
}

#[derive(Serialize)]
struct CommentBody<'a> {
    body: &'a str,
}

#[derive(Serialize)]
struct WorkflowDispatch<'a> {
    #[serde(rename = "ref")]
    git_ref: &'a str,
    inputs: &'a BTreeMap<String, String>,
}

fn is_not_found(err: &octocrab::Error) -> bool {
    matches!(
        err,
        octocrab::Error::GitHub { source, .. }
            if matches!(source, GitHubError { status_code: StatusCode::NOT_FOUND, .. })
    )
}

#[async_trait]
impl GitHubApi for OctocrabApi {
    async fn list_check_runs_for_ref(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
        per_page: u8,
    ) -> Result<Vec<CheckRun>> {
        let response: CheckRunList = self
            .client
            .get(
                format!("/repos/{owner}/{repo}/commits/{git_ref}/check-runs"),
                Some(&PageParams { per_page: Some(per_page), page: None }),
            )
            .await?;
        Ok(response.check_runs)
    }

    async fn create_check_run(&self, owner: &str, repo: &str, run: &NewCheckRun) -> Result<CheckRun> {
        Ok(self.client.post(format!("/repos/{owner}/{repo}/check-runs"), Some(run)).await?)
    }

    async fn update_check_run(
        &self,
        owner: &str,
        repo: &str,
        check_run_id: u64,
        update: &CheckRunUpdate,
    ) -> Result<()> {
        let _: serde_json::Value = self
            .client
            .patch(format!("/repos/{owner}/{repo}/check-runs/{check_run_id}"), Some(update))
            .await?;
        Ok(())
    }

    async fn create_commit_status(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        status: &NewCommitStatus,
    ) -> Result<()> {
        let _: serde_json::Value =
            self.client.post(format!("/repos/{owner}/{repo}/statuses/{sha}"), Some(status)).await?;
        Ok(())
    }

    async fn get_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>> {
        let route = format!("/repos/{owner}/{repo}/contents/{}", path.trim_start_matches('/'));
        let response: ContentResponse =
            match self.client.get(route, Some(&RefParams { git_ref })).await {
                Ok(response) => response,
                Err(e) if is_not_found(&e) => return Ok(None),
                Err(e) => return Err(e.into()),
            };
        let ContentResponse::File { content: Some(encoded) } = response else {
            return Ok(None);
        };
        let cleaned: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let bytes = STANDARD
            .decode(cleaned)
            .with_context(|| format!("Failed to decode {path} in {owner}/{repo}"))?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    async fn list_pull_request_files(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        page: u32,
        per_page: u8,
    ) -> Result<Vec<PullRequestFile>> {
        Ok(self
            .client
            .get(
                format!("/repos/{owner}/{repo}/pulls/{number}/files"),
                Some(&PageParams { per_page: Some(per_page), page: Some(page) }),
            )
            .await?)
    }

    async fn list_issue_comments(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        page: u32,
        per_page: u8,
    ) -> Result<Vec<IssueComment>> {
        Ok(self
            .client
            .get(
                format!("/repos/{owner}/{repo}/issues/{number}/comments"),
                Some(&PageParams { per_page: Some(per_page), page: Some(page) }),
            )
            .await?)
    }

    async fn create_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<()> {
        let _: serde_json::Value = self
            .client
            .post(format!("/repos/{owner}/{repo}/issues/{number}/comments"), Some(&CommentBody { body }))
            .await?;
        Ok(())
    }

    async fn update_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        comment_id: u64,
        body: &str,
    ) -> Result<()> {
        let _: serde_json::Value = self
            .client
            .patch(
                format!("/repos/{owner}/{repo}/issues/comments/{comment_id}"),
                Some(&CommentBody { body }),
            )
            .await?;
        Ok(())
    }

    async fn create_workflow_dispatch(
        &self,
        owner: &str,
        repo: &str,
        workflow: &str,
        git_ref: &str,
        inputs: &BTreeMap<String, String>,
    ) -> Result<()> {
        // 204 with an empty body
        let response = self
            .client
            ._post(
                format!("/repos/{owner}/{repo}/actions/workflows/{workflow}/dispatches"),
                Some(&WorkflowDispatch { git_ref, inputs }),
            )
            .await?;
        octocrab::map_github_error(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        Json, Router,
        extract::Path,
        response::{IntoResponse, Response},
        routing::{get, post},
    };
    use tokio::net::TcpListener;

    use super::*;

    async fn contents(Path(path): Path<String>) -> Response {
        match path.as_str() {
            // `{"name":"web"}`, wrapped the way GitHub wraps base64 content
            "package.json" => {
                Json(serde_json::json!({ "type": "file", "content": "eyJuYW1lIjoi\nd2ViIn0=\n" }))
                    .into_response()
            }
            "src" => Json(serde_json::json!([{ "type": "file", "name": "index.ts" }])).into_response(),
            "broken.json" => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "message": "Server Error" })),
            )
                .into_response(),
            _ => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({
                    "message": "Not Found",
                    "documentation_url": "https://docs.github.com/rest/repos/contents"
                })),
            )
                .into_response(),
        }
    }

    async fn api() -> OctocrabApi {
        let router = Router::new()
            .route("/repos/acme/web/contents/{*path}", get(contents))
            .route(
                "/repos/acme/runner/actions/workflows/run.yml/dispatches",
                post(|| async { StatusCode::NO_CONTENT }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        let client = Octocrab::builder().base_uri(format!("http://{addr}")).unwrap().build().unwrap();
        OctocrabApi::new(client)
    }

    #[tokio::test]
    async fn content_lookups() {
        let api = api().await;
        let found = api.get_content("acme", "web", "package.json", "abc").await.unwrap();
        assert_eq!(found.as_deref(), Some(r#"{"name":"web"}"#));
        let missing = api.get_content("acme", "web", ".prettierrc", "abc").await.unwrap();
        assert_eq!(missing, None);
        let directory = api.get_content("acme", "web", "src", "abc").await.unwrap();
        assert_eq!(directory, None);
        assert!(api.get_content("acme", "web", "broken.json", "abc").await.is_err());
    }

    #[tokio::test]
    async fn workflow_dispatch_accepts_empty_response() {
        let api = api().await;
        let inputs = BTreeMap::from([("owner".to_string(), "acme".to_string())]);
        api.create_workflow_dispatch("acme", "runner", "run.yml", "main", &inputs).await.unwrap();
        assert!(api.create_workflow_dispatch("acme", "missing", "run.yml", "main", &inputs).await.is_err());
    }
}
