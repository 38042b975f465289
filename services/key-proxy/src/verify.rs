//! Key health check streamed as server-sent events
//!
//! Each configured credential gets one minimal upstream call, in pool order,
//! with a fixed pause between calls so the check itself does not trip the
//! upstream rate limiter. The stream stops early once the client goes away.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue};
use axum::response::sse::{Event, Sse};
use common::Credential;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// Result of checking one credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyStatus {
    /// Upstream accepted the call.
    Good,
    /// Upstream answered with an error status.
    Bad,
    /// The call did not complete.
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyCheck {
    pub key: String,
    pub status: KeyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct VerifyState {
    pub client: reqwest::Client,
    pub url: String,
    pub api_key_header: HeaderName,
    pub timeout: Duration,
    /// Pause after each check except the last.
    pub delay: Duration,
    pub credentials: Arc<[Credential]>,
}

fn check_body() -> serde_json::Value {
    serde_json::json!({
        "contents": [{ "role": "user", "parts": [{ "text": "Hello" }] }]
    })
}

/// Pull `error.message` out of an upstream error body.
fn upstream_message(body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| "Unknown error".to_string())
}

/// Call the upstream once with `credential` and classify the answer.
pub async fn check_key(state: &VerifyState, credential: &Credential) -> KeyCheck {
    let key = credential.redacted_wide();

    let mut value = match HeaderValue::from_str(credential.expose()) {
        Ok(v) => v,
        Err(e) => {
            return KeyCheck {
                key,
                status: KeyStatus::Error,
                error: Some(e.to_string()),
            };
        }
    };
    value.set_sensitive(true);

    let sent = state
        .client
        .post(&state.url)
        .header(state.api_key_header.clone(), value)
        .timeout(state.timeout)
        .json(&check_body())
        .send()
        .await;

    match sent {
        Ok(resp) if resp.status().is_success() => KeyCheck {
            key,
            status: KeyStatus::Good,
            error: None,
        },
        Ok(resp) => {
            let status = resp.status();
            let body = resp.bytes().await.unwrap_or_default();
            let message = upstream_message(&body);
            debug!(credential = %credential, status = status.as_u16(), "key check rejected");
            KeyCheck {
                key,
                status: KeyStatus::Bad,
                error: Some(message),
            }
        }
        Err(e) => {
            warn!(credential = %credential, error = %e, "key check failed");
            KeyCheck {
                key,
                status: KeyStatus::Error,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Check every credential on a background task, one event per credential.
pub fn stream(state: VerifyState) -> Sse<ReceiverStream<Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        let total = state.credentials.len();
        info!(credentials = total, "starting key check");
        for (i, credential) in state.credentials.iter().enumerate() {
            let check = check_key(&state, credential).await;
            let data = match serde_json::to_string(&check) {
                Ok(data) => data,
                Err(e) => {
                    warn!(error = %e, "failed to encode key check");
                    continue;
                }
            };
            if tx.send(Ok(Event::default().data(data))).await.is_err() {
                debug!(checked = i + 1, "client disconnected, stopping key check");
                return;
            }
            if i + 1 < total {
                tokio::time::sleep(state.delay).await;
            }
        }
        info!(credentials = total, "key check finished");
    });

    Sse::new(ReceiverStream::new(rx))
}
