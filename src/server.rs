use crate::cancellation::CancellationToken;
use crate::relay::{RelayError, RewriteRequest, Rewriter};
use crate::tone::ToneAxes;
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const MAX_BODY_BYTES: usize = 1024 * 1024;

const MISSING_TEXT: &str = "Missing or empty `text`";

#[derive(Clone)]
pub struct AppState {
    pub rewriter: Arc<dyn Rewriter>,
}

/// Fields are kept loose so a mistyped `axes` or `tone` falls back to the
/// next tone source instead of failing the request.
#[derive(Debug, Deserialize)]
struct ToneBody {
    #[serde(default)]
    text: Value,
    #[serde(default)]
    axes: Value,
    #[serde(default)]
    tone: Value,
}

impl ToneBody {
    /// Both axes as numbers, or nothing.
    fn axes(&self) -> Option<ToneAxes> {
        let formal = self.axes.get("formal").and_then(Value::as_f64)?;
        let friendly = self.axes.get("friendly").and_then(Value::as_f64)?;
        Some(ToneAxes { formal, friendly })
    }

    /// Strings are used as given, numbers and `true` in their JSON form.
    /// Falsy values count as no label.
    fn tone(&self) -> Option<String> {
        match &self.tone {
            Value::String(label) => Some(label.clone()),
            Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
            Value::Bool(true) => Some("true".to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ToneResponse {
    ok: bool,
    text: String,
    cached: bool,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    ok: bool,
    error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            ok: false,
            error: error.into(),
        }),
    )
        .into_response()
}

pub fn router(rewriter: Arc<dyn Rewriter>) -> Router {
    Router::new()
        .route("/api/tone", post(rewrite_tone))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(AppState { rewriter })
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn rewrite_tone(
    State(state): State<AppState>,
    body: Result<Json<ToneBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            debug!("Rejected rewrite body: {}", rejection.body_text());
            let status = match rejection.status() {
                StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
                _ => StatusCode::BAD_REQUEST,
            };
            return error_response(status, rejection.body_text());
        }
    };

    let text = match &body.text {
        Value::String(text) if !text.trim().is_empty() => text.clone(),
        _ => return error_response(StatusCode::BAD_REQUEST, MISSING_TEXT),
    };

    let request = RewriteRequest {
        text,
        axes: body.axes(),
        tone: body.tone(),
    };

    match state
        .rewriter
        .rewrite(&request, &CancellationToken::never())
        .await
    {
        Ok(rewrite) => Json(ToneResponse {
            ok: true,
            text: rewrite.text,
            cached: rewrite.cached,
        })
        .into_response(),
        Err(e) => {
            let status = if e.is_client_error() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            if let RelayError::ServiceUnconfigured(_) = e {
                warn!("Rewrite refused: {}", e);
            }
            error_response(status, e.to_string())
        }
    }
}

/// HTTP front end for a [`Rewriter`], stopped through a oneshot channel.
pub struct ApiServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    addr: SocketAddr,
}

impl ApiServer {
    /// Bind `addr` and serve in a background task.
    pub async fn start(addr: &str, rewriter: Arc<dyn Rewriter>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let (tx, rx) = oneshot::channel();
        let app = router(rewriter);

        let handle = tokio::spawn(async move {
            info!("Starting tone server on {}", addr);
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    rx.await.ok();
                })
                .await
            {
                error!("Server error: {}", e);
            }
            info!("Tone server on {} stopped", addr);
        });

        Ok(Self {
            shutdown_tx: Some(tx),
            handle: Some(handle),
            addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Stop and wait for in-flight requests to drain.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("Tone server task failed: {}", e);
            }
        }
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        self.stop();
    }
}
