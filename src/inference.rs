//! Inference gateway: a narrow interface around translation and emotion
//! classification, with a uniform retry, backoff and timeout policy.
//!
//! Backends implement [`InferenceBackend`]; the pipeline only ever talks to
//! an [`InferenceGateway`].

use crate::config::TranslationConfig;
use crate::error::InferenceError;
use crate::job::EmotionReading;
use async_trait::async_trait;
use log::{debug, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// One translation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslateRequest {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
    /// Extra instruction appended to the prompt (tone hints on re-translation).
    pub hint: Option<String>,
    /// 0 for the first translation, incremented on every re-translation.
    pub attempt: u32,
}

impl TranslateRequest {
    pub fn new(
        text: impl Into<String>,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            hint: None,
            attempt: 0,
        }
    }

    /// Same text and languages with a different hint and attempt number.
    pub fn retry_with_hint(&self, hint: impl Into<String>, attempt: u32) -> Self {
        Self {
            hint: Some(hint.into()),
            attempt,
            ..self.clone()
        }
    }

    /// Same request with an extra instruction appended to the prompt.
    pub fn with_hint(self, hint: impl Into<String>) -> Self {
        Self {
            hint: Some(hint.into()),
            ..self
        }
    }

    /// Same languages, different text (used for single-term translation).
    pub fn for_text(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            hint: None,
            attempt: 0,
            ..self.clone()
        }
    }
}

/// The black-box capabilities the pipeline depends on.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Human-readable backend name for logs.
    fn name(&self) -> &'static str;

    /// Whether concurrent calls are tolerated. The gateway serializes calls
    /// to backends that return `false`.
    fn concurrency_safe(&self) -> bool {
        true
    }

    /// Translate `request.text` from `source_lang` to `target_lang`.
    async fn translate(&self, request: &TranslateRequest) -> Result<String, InferenceError>;

    /// Classify the dominant emotion of `text`.
    async fn classify_emotion(&self, text: &str) -> Result<EmotionReading, InferenceError>;
}

/// Retry and timeout policy applied to every gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay after the first failure; doubles after each further failure.
    pub backoff_base: Duration,
    /// Hard limit for a single attempt.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            call_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &TranslationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: config.backoff_base(),
            call_timeout: config.call_timeout(),
        }
    }

    /// Delay after the `failed_attempt`-th failure (1-based): 1x, 2x, 4x...
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let exp = failed_attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << exp)
    }
}

/// Retry/timeout wrapper around an [`InferenceBackend`]. Cheap to clone.
#[derive(Clone)]
pub struct InferenceGateway {
    backend: Arc<dyn InferenceBackend>,
    policy: RetryPolicy,
    serial: Option<Arc<tokio::sync::Mutex<()>>>,
}

impl InferenceGateway {
    pub fn new(backend: Arc<dyn InferenceBackend>, policy: RetryPolicy) -> Self {
        let serial = if backend.concurrency_safe() {
            None
        } else {
            Some(Arc::new(tokio::sync::Mutex::new(())))
        };
        Self {
            backend,
            policy,
            serial,
        }
    }

    /// False when calls are funnelled through a single lock.
    pub fn is_concurrent(&self) -> bool {
        self.serial.is_none()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn translate(&self, request: &TranslateRequest) -> Result<String, InferenceError> {
        self.call("translate", || self.backend.translate(request))
            .await
    }

    pub async fn classify_emotion(&self, text: &str) -> Result<EmotionReading, InferenceError> {
        self.call("classify_emotion", || self.backend.classify_emotion(text))
            .await
    }

    async fn call<T, F, Fut>(&self, operation: &'static str, mut f: F) -> Result<T, InferenceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, InferenceError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error: Option<InferenceError> = None;

        for attempt in 1..=max_attempts {
            let outcome = {
                let _guard = match &self.serial {
                    Some(lock) => Some(lock.lock().await),
                    None => None,
                };
                match tokio::time::timeout(self.policy.call_timeout, f()).await {
                    Ok(result) => result,
                    Err(_) => Err(InferenceError::Timeout(self.policy.call_timeout)),
                }
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", operation, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    warn!(
                        "{} via {} failed (attempt {}/{}): {}",
                        operation,
                        self.backend.name(),
                        attempt,
                        max_attempts,
                        e
                    );
                    last_error = Some(e);
                    if attempt < max_attempts {
                        tokio::time::sleep(self.policy.backoff(attempt)).await;
                    }
                }
            }
        }

        Err(InferenceError::Unavailable {
            operation,
            attempts: max_attempts,
            last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}
