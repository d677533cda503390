use autofix_core::AppError;
use autofix_jobs::{JobContext, RunnerCallback, RunnerCallbackPayload, complete_runner_callback};
use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};

use crate::handlers::bearer_authorized;

fn bad_request(message: impl ToString) -> Response {
    (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": message.to_string() }))).into_response()
}

/// Completion report from the runner workflow.
pub async fn runner_callback(
    State(jobs): State<JobContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let token = jobs.config.runner.as_ref().map(|r| r.callback_token.as_str());
    if !bearer_authorized(&headers, token) {
        return Err(AppError::Status(StatusCode::UNAUTHORIZED));
    }
    let payload: RunnerCallbackPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => return Ok(bad_request(format!("Invalid callback payload: {e}"))),
    };
    let callback = match RunnerCallback::try_from(payload) {
        Ok(callback) => callback,
        Err(e) => return Ok(bad_request(e)),
    };
    complete_runner_callback(&jobs, &callback).await?;
    Ok((StatusCode::OK, "OK").into_response())
}
