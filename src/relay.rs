//! Completion relay: validate, check the cache, ask the model, remember.

use crate::cache::ResponseCache;
use crate::cancellation::CancellationToken;
use crate::llm_client::{CompletionError, CompletionRequest, CompletionService};
use crate::tone::{build_prompt, ToneAxes, ToneSpec};
use async_trait::async_trait;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub const SYSTEM_PROMPT: &str =
    "You are a precise tone rewriter for short to medium messages. Return only the rewritten text.";
pub const TEMPERATURE: f32 = 0.4;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    ServiceUnconfigured(String),
    #[error("{0}")]
    Upstream(String),
    #[error("Empty response from model")]
    EmptyResponse,
    #[error("Rewrite cancelled")]
    Cancelled,
}

impl RelayError {
    /// Whether the caller, not the service, is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, RelayError::InvalidInput(_))
    }
}

impl From<CompletionError> for RelayError {
    fn from(err: CompletionError) -> Self {
        match err {
            CompletionError::Unconfigured => RelayError::ServiceUnconfigured(err.to_string()),
            other => RelayError::Upstream(other.to_string()),
        }
    }
}

/// A rewrite request as it arrives from a client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RewriteRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axes: Option<ToneAxes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
}

impl RewriteRequest {
    pub fn with_axes(text: impl Into<String>, axes: ToneAxes) -> Self {
        Self {
            text: text.into(),
            axes: Some(axes),
            tone: None,
        }
    }

    pub fn with_label(text: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            axes: None,
            tone: Some(label.into()),
        }
    }

    pub fn spec(&self) -> ToneSpec {
        ToneSpec::from_parts(
            self.axes.map(|a| a.formal),
            self.axes.map(|a| a.friendly),
            self.tone.as_deref(),
        )
    }

    /// Deterministic key: the exact text plus the normalized tone fields.
    pub fn cache_key(&self) -> String {
        #[derive(Serialize)]
        struct CacheKey<'a> {
            text: &'a str,
            axes: Option<ToneAxes>,
            tone: Option<&'a str>,
        }

        let key = CacheKey {
            text: &self.text,
            axes: self.axes.map(ToneAxes::normalized),
            tone: self.tone.as_deref(),
        };
        // Plain strings, floats and options always serialize.
        serde_json::to_string(&key).unwrap_or_else(|_| self.text.clone())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    pub text: String,
    pub cached: bool,
}

/// Something that can rewrite text, local or remote.
#[async_trait]
pub trait Rewriter: Send + Sync {
    async fn rewrite(
        &self,
        request: &RewriteRequest,
        cancel: &CancellationToken,
    ) -> Result<Rewrite, RelayError>;
}

type GateMap = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Holds the per-key lock for one request. Removes the map entry on drop
/// when nobody else is waiting on it.
struct KeyGate<'a> {
    gates: &'a GateMap,
    key: String,
    gate: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGate<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one here.
        if Arc::strong_count(&self.gate) <= 2 {
            gates.remove(&self.key);
        }
    }
}

pub struct ToneRelay {
    service: Arc<dyn CompletionService>,
    cache: Arc<ResponseCache>,
    gates: GateMap,
}

impl ToneRelay {
    pub fn new(service: Arc<dyn CompletionService>, cache: Arc<ResponseCache>) -> Self {
        Self {
            service,
            cache,
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    fn gate_for(&self, key: &str) -> KeyGate<'_> {
        let gate = {
            let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(gates.entry(key.to_string()).or_default())
        };
        KeyGate {
            gates: &self.gates,
            key: key.to_string(),
            gate,
            guard: None,
        }
    }

    /// Rewrite `request.text` in the requested tone.
    ///
    /// Concurrent calls for the same request share one upstream call: the
    /// first caller holds the key's gate while it talks to the service and
    /// the others find the cached result once they get through.
    pub async fn rewrite(
        &self,
        request: &RewriteRequest,
        cancel: &CancellationToken,
    ) -> Result<Rewrite, RelayError> {
        if request.text.trim().is_empty() {
            return Err(RelayError::InvalidInput("Missing or empty `text`".to_string()));
        }

        let key = request.cache_key();
        if let Some(text) = self.cache.get(&key) {
            debug!("Cache hit for {} char request", request.text.len());
            return Ok(Rewrite { text, cached: true });
        }

        let mut gate = self.gate_for(&key);
        let lock = Arc::clone(&gate.gate).lock_owned();
        gate.guard = Some(tokio::select! {
            guard = lock => guard,
            _ = cancel.cancelled() => return Err(RelayError::Cancelled),
        });

        if let Some(text) = self.cache.get(&key) {
            debug!("Cache filled by a concurrent request");
            return Ok(Rewrite { text, cached: true });
        }

        debug!("Cache miss, asking the completion service");
        let call = self.service.complete(CompletionRequest {
            system_prompt: SYSTEM_PROMPT.to_string(),
            prompt: build_prompt(&request.text, &request.spec()),
            temperature: TEMPERATURE,
        });

        let outcome = tokio::select! {
            outcome = call => outcome,
            _ = cancel.cancelled() => {
                info!("Rewrite cancelled while waiting on the completion service");
                return Err(RelayError::Cancelled);
            }
        };

        let text = match outcome {
            Ok(Some(text)) if !text.trim().is_empty() => text,
            Ok(_) => {
                error!("Completion service returned no usable text");
                return Err(RelayError::EmptyResponse);
            }
            Err(e) => {
                error!("Completion request failed: {}", e);
                return Err(e.into());
            }
        };

        self.cache.insert(key, text.clone());
        drop(gate);
        Ok(Rewrite {
            text,
            cached: false,
        })
    }
}

#[async_trait]
impl Rewriter for ToneRelay {
    async fn rewrite(
        &self,
        request: &RewriteRequest,
        cancel: &CancellationToken,
    ) -> Result<Rewrite, RelayError> {
        ToneRelay::rewrite(self, request, cancel).await
    }
}
