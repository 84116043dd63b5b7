use crate::settings::{AppSettings, API_KEY_ENV};
use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("{} not configured on server", API_KEY_ENV)]
    Unconfigured,
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
    #[error("{0}")]
    Transport(String),
    #[error("API request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Failed to parse API response: {0}")]
    Decode(String),
}

/// One chat completion call: a system instruction, a user prompt and a
/// sampling temperature.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub prompt: String,
    pub temperature: f32,
}

/// Anything that can turn a prompt into text.
///
/// `Ok(None)` means the service answered but produced no content.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Option<String>, CompletionError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

/// Client for Mistral's OpenAI-compatible chat completions endpoint.
pub struct MistralClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl MistralClient {
    pub fn new(settings: &AppSettings) -> Result<Self, CompletionError> {
        Ok(Self {
            client: create_client(settings.request_timeout)?,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key: settings.api_key.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

/// Build headers shared by every request
fn build_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("tonepicker/", env!("CARGO_PKG_VERSION"))),
    );
    headers
}

fn create_client(timeout: Duration) -> Result<reqwest::Client, CompletionError> {
    reqwest::Client::builder()
        .default_headers(build_headers())
        .timeout(timeout)
        .build()
        .map_err(|e| CompletionError::Client(e.to_string()))
}

fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "Request timeout - the API took too long to respond".to_string()
    } else if e.is_connect() {
        "Connection error - unable to reach the API".to_string()
    } else {
        format!("HTTP request failed: {}", e)
    }
}

#[async_trait]
impl CompletionService for MistralClient {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<Option<String>, CompletionError> {
        let api_key = self.api_key.as_deref().ok_or(CompletionError::Unconfigured)?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| {
                CompletionError::Client(format!("Invalid authorization header value: {}", e))
            })?;

        let url = self.endpoint();
        debug!("Sending chat completion request to: {}", url);

        let body = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: request.system_prompt,
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.prompt,
                },
            ],
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, auth)
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::Transport(describe_transport_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Decode(e.to_string()))?;

        Ok(completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::State, http::HeaderMap as AxumHeaders, http::StatusCode, routing::post, Json,
        Router,
    };
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured {
        requests: Arc<Mutex<Vec<(Option<String>, Value)>>>,
    }

    async fn spawn_upstream(status: StatusCode, reply: Value) -> (String, Captured) {
        let captured = Captured::default();
        let handler = move |State(captured): State<Captured>,
                            headers: AxumHeaders,
                            Json(body): Json<Value>| {
            let reply = reply.clone();
            async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                captured.requests.lock().unwrap().push((auth, body));
                (status, Json(reply))
            }
        };
        let app = Router::new()
            .route("/v1/chat/completions", post(handler))
            .with_state(captured.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/v1/", addr), captured)
    }

    fn settings_for(base_url: &str, api_key: Option<&str>) -> AppSettings {
        AppSettings {
            api_key: api_key.map(str::to_string),
            base_url: base_url.to_string(),
            ..AppSettings::default()
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            system_prompt: "be precise".to_string(),
            prompt: "rewrite this".to_string(),
            temperature: 0.4,
        }
    }

    #[tokio::test]
    async fn test_sends_authenticated_chat_request() {
        let (base_url, captured) = spawn_upstream(
            StatusCode::OK,
            json!({"choices": [{"message": {"role": "assistant", "content": "Rewritten."}}]}),
        )
        .await;
        let client = MistralClient::new(&settings_for(&base_url, Some("test-key"))).unwrap();

        let out = client.complete(request()).await.unwrap();
        assert_eq!(out.as_deref(), Some("Rewritten."));

        let requests = captured.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let (auth, body) = &requests[0];
        assert_eq!(auth.as_deref(), Some("Bearer test-key"));
        assert_eq!(body["model"], "mistral-small-latest");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be precise");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "rewrite this");
        assert!((body["temperature"].as_f64().unwrap() - 0.4).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_missing_choices_is_none() {
        let (base_url, _) = spawn_upstream(StatusCode::OK, json!({"choices": []})).await;
        let client = MistralClient::new(&settings_for(&base_url, Some("k"))).unwrap();
        assert_eq!(client.complete(request()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_non_success_status_is_reported() {
        let (base_url, _) =
            spawn_upstream(StatusCode::TOO_MANY_REQUESTS, json!({"message": "slow down"})).await;
        let client = MistralClient::new(&settings_for(&base_url, Some("k"))).unwrap();

        match client.complete(request()).await {
            Err(CompletionError::Status { status, body }) => {
                assert_eq!(status, 429);
                assert!(body.contains("slow down"));
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_network() {
        let client = MistralClient::new(&settings_for("http://127.0.0.1:9", None)).unwrap();
        let err = client.complete(request()).await.unwrap_err();
        assert!(matches!(err, CompletionError::Unconfigured));
        assert_eq!(err.to_string(), "MISTRAL_API_KEY not configured on server");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let base_url = format!("http://{}/v1", addr);
        let client = MistralClient::new(&settings_for(&base_url, Some("k"))).unwrap();
        let err = client.complete(request()).await.unwrap_err();
        assert!(matches!(err, CompletionError::Transport(_)));
    }
}
