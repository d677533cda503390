use std::sync::Arc;

use autofix_core::models::{InstallationPayload, PullRequestPayload};
use autofix_github::webhook::GitHubEvent;
use autofix_jobs::{JobContext, PullRequestHandler, handle_installation_event};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Acknowledges a verified delivery right away and processes it in the background.
pub async fn webhook(
    State(jobs): State<JobContext>,
    State(pull_requests): State<Arc<PullRequestHandler>>,
    GitHubEvent { event, delivery, payload }: GitHubEvent,
) -> Response {
    tracing::info!("Received webhook event {} (delivery {})", event, delivery);
    match event.as_str() {
        "pull_request" => match serde_json::from_value::<PullRequestPayload>(payload) {
            Ok(payload) => {
                tokio::spawn(async move { pull_requests.handle(&payload).await });
            }
            Err(e) => {
                tracing::warn!("Invalid pull_request payload in delivery {}: {}", delivery, e)
            }
        },
        "installation" => match serde_json::from_value::<InstallationPayload>(payload) {
            Ok(payload) => {
                tokio::spawn(async move {
                    if let Err(e) = handle_installation_event(&jobs, &payload).await {
                        tracing::error!("Failed to handle installation event: {:?}", e);
                    }
                });
            }
            Err(e) => {
                tracing::warn!("Invalid installation payload in delivery {}: {}", delivery, e)
            }
        },
        other => tracing::debug!("Ignoring webhook event {}", other),
    }
    (StatusCode::OK, "OK").into_response()
}

#[cfg(test)]
mod tests {
    use autofix_github::testing::sign;
    use axum::{body::Body, http::Request};

    use crate::handlers::tests::{TestApp, body_string};

    use super::*;

    const SECRET: &str = "webhook-secret";

    fn delivery(path: &str, event: &str, body: &str, signature: Option<String>) -> Request<Body> {
        let mut builder = Request::post(path)
            .header("X-GitHub-Delivery", "d-1")
            .header("X-GitHub-Event", event)
            .header("Content-Type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header("X-Hub-Signature-256", signature);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn signed(path: &str, event: &str, body: &str) -> Request<Body> {
        delivery(path, event, body, Some(sign(body.as_bytes(), SECRET)))
    }

    fn readme_pull_request() -> String {
        serde_json::json!({
            "action": "opened",
            "installation": { "id": 42 },
            "pull_request": {
                "number": 3,
                "head": { "sha": "abc", "ref": "docs", "repo": { "full_name": "acme/web" } },
                "base": { "sha": "def", "ref": "main", "repo": { "full_name": "acme/web" } }
            },
            "repository": { "name": "web", "full_name": "acme/web", "owner": { "login": "acme" } }
        })
        .to_string()
    }

    #[tokio::test]
    async fn rejects_missing_headers() {
        let app = TestApp::new().await;
        let response = app.send(delivery("/webhooks", "ping", "{}", None)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_string(response).await.contains("error"));
    }

    #[tokio::test]
    async fn rejects_bad_signature() {
        let app = TestApp::new().await;
        let body = readme_pull_request();
        let tampered = sign(b"{}", SECRET);
        let response = app.send(delivery("/webhooks", "pull_request", &body, Some(tampered))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(app.github.calls().is_empty());
    }

    #[tokio::test]
    async fn rejects_malformed_json() {
        let app = TestApp::new().await;
        let response = app.send(signed("/webhooks", "pull_request", "{not json")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn acknowledges_then_processes_pull_request() {
        let app = TestApp::new().await;
        app.github.state().pr_files = vec!["README.md".to_string()];
        let response = app.send(signed("/", "pull_request", &readme_pull_request())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "OK");
        app.eventually(|app| app.github.check_run_updates().len() == 2).await;
        assert!(app.github.check_run_updates().iter().all(|(_, u)| {
            u.output.summary == "Skipped: no supported files changed"
        }));
    }

    #[tokio::test]
    async fn stores_installations() {
        let app = TestApp::new().await;
        let body = serde_json::json!({
            "action": "created",
            "installation": { "id": 5, "account": { "login": "octo", "type": "User" } }
        })
        .to_string();
        let response = app.send(signed("/webhooks", "installation", &body)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let store = app.state.jobs.store.clone();
        let mut stored = vec![];
        for _ in 0..100 {
            stored = store.list_installations().await.unwrap();
            if !stored.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].account_login, "octo");
    }

    #[tokio::test]
    async fn ignores_other_events() {
        let app = TestApp::new().await;
        let response = app.send(signed("/webhooks", "ping", r#"{"zen":"Keep it logically awesome."}"#)).await;
        assert_eq!(response.status(), StatusCode::OK);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(app.github.calls().is_empty());
    }
}
