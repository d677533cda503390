use std::{fmt::Display, sync::Arc};

use anyhow::Result;
use axum::{
    Json,
    body::Bytes,
    extract::{FromRef, FromRequest, Request},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use autofix_core::config::Config;
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Check a `sha256=<hex>` signature header against the raw request body.
/// Never fails: a missing, malformed or mismatching header yields `false`.
pub fn verify_signature(body: &[u8], signature: Option<&str>, secret: &str) -> bool {
    let Some(hex_digest) = signature.and_then(|s| s.strip_prefix("sha256=")) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// A verified GitHub webhook delivery.
#[derive(Debug, Clone)]
#[must_use]
pub struct GitHubEvent {
    pub event: String,
    pub delivery: String,
    pub payload: serde_json::Value,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

impl<S> FromRequest<S> for GitHubEvent
where
    Arc<Config>: FromRef<S>,
    S: Send + Sync + Clone,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        fn err(status: StatusCode, m: impl Display) -> Response {
            tracing::warn!("Rejected webhook: {m}");
            (status, Json(serde_json::json!({ "error": m.to_string() }))).into_response()
        }
        let headers = req.headers();
        let (Some(delivery), Some(event), Some(signature)) = (
            header(headers, "X-GitHub-Delivery"),
            header(headers, "X-GitHub-Event"),
            header(headers, "X-Hub-Signature-256"),
        ) else {
            return Err(err(StatusCode::BAD_REQUEST, "Missing GitHub webhook headers"));
        };
        let (delivery, event, signature) =
            (delivery.to_string(), event.to_string(), signature.to_string());
        let config = <Arc<Config>>::from_ref(state);
        let body = Bytes::from_request(req, state)
            .await
            .map_err(|_| err(StatusCode::BAD_REQUEST, "error reading body"))?;
        if !verify_signature(&body, Some(&signature), &config.github.app.webhook_secret) {
            return Err(err(StatusCode::UNAUTHORIZED, "Invalid signature"));
        }
        let payload = serde_json::from_slice(&body)
            .map_err(|_| err(StatusCode::BAD_REQUEST, "Invalid JSON payload"))?;
        Ok(GitHubEvent { event, delivery, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sign;

    const SECRET: &str = "It's a Secret to Everybody";
    const PAYLOAD: &[u8] = b"Hello, World!";

    #[test]
    fn verifies_known_signature() {
        // Example from the GitHub webhook documentation.
        let header = "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17";
        assert!(verify_signature(PAYLOAD, Some(header), SECRET));
        assert_eq!(sign(PAYLOAD, SECRET), header);
    }

    #[test]
    fn rejects_single_bit_mutations() {
        let header = sign(PAYLOAD, SECRET);
        for i in 0..PAYLOAD.len() * 8 {
            let mut body = PAYLOAD.to_vec();
            body[i / 8] ^= 1 << (i % 8);
            assert!(!verify_signature(&body, Some(&header), SECRET), "payload bit {i}");
        }
        let digest = hex::decode(header.strip_prefix("sha256=").unwrap()).unwrap();
        for i in 0..digest.len() * 8 {
            let mut mutated = digest.clone();
            mutated[i / 8] ^= 1 << (i % 8);
            let header = format!("sha256={}", hex::encode(mutated));
            assert!(!verify_signature(PAYLOAD, Some(&header), SECRET), "digest bit {i}");
        }
    }

    #[test]
    fn rejects_malformed_headers() {
        let digest = sign(PAYLOAD, SECRET);
        let hex_only = digest.strip_prefix("sha256=").unwrap();
        let cases = [
            None,
            Some(""),
            Some(hex_only),
            Some("sha1=0123"),
            Some("sha256=zz"),
            Some("sha256="),
        ];
        for header in cases {
            assert!(!verify_signature(PAYLOAD, header, SECRET), "{header:?}");
        }
        assert!(!verify_signature(PAYLOAD, Some(&sign(PAYLOAD, "other")), SECRET));
    }
}
