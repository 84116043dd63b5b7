//! Rewriter that talks to a running tone server over HTTP.

use crate::cancellation::CancellationToken;
use crate::relay::{RelayError, Rewrite, RewriteRequest, Rewriter};
use crate::settings::API_KEY_ENV;
use async_trait::async_trait;
use log::{debug, info};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ToneReply {
    #[serde(default)]
    ok: bool,
    text: Option<String>,
    #[serde(default)]
    cached: bool,
    error: Option<String>,
}

pub struct HttpRewriter {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRewriter {
    /// `base_url` is the server root, e.g. `http://localhost:5000`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Upstream(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/tone", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&self, request: &RewriteRequest) -> Result<Rewrite, RelayError> {
        debug!("Posting rewrite request to {}", self.endpoint);
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| RelayError::Upstream(format!("Failed to reach tone server: {}", e)))?;

        let status = response.status();
        let reply: ToneReply = response.json().await.map_err(|e| {
            RelayError::Upstream(format!("Invalid response from tone server ({}): {}", status, e))
        })?;

        match reply {
            ToneReply {
                ok: true,
                text: Some(text),
                cached,
                ..
            } => Ok(Rewrite { text, cached }),
            ToneReply { error, .. } => Err(classify(status, error)),
        }
    }
}

/// Turn a failed reply back into the error the server started from.
fn classify(status: StatusCode, error: Option<String>) -> RelayError {
    let message = error.unwrap_or_else(|| format!("Tone server returned {}", status));

    if status.is_client_error() {
        return RelayError::InvalidInput(message);
    }
    if message == RelayError::EmptyResponse.to_string() {
        return RelayError::EmptyResponse;
    }
    if message.starts_with(API_KEY_ENV) {
        return RelayError::ServiceUnconfigured(message);
    }
    RelayError::Upstream(message)
}

#[async_trait]
impl Rewriter for HttpRewriter {
    async fn rewrite(
        &self,
        request: &RewriteRequest,
        cancel: &CancellationToken,
    ) -> Result<Rewrite, RelayError> {
        tokio::select! {
            result = self.send(request) => result,
            _ = cancel.cancelled() => {
                info!("Rewrite request to {} cancelled", self.endpoint);
                Err(RelayError::Cancelled)
            }
        }
    }
}
