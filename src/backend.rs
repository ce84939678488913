//! Inference backend for OpenAI-compatible chat completion APIs.
//!
//! Translation goes through the `/chat/completions` endpoint with the
//! configured system prompt. Emotion classification either asks the model for
//! a small JSON verdict or runs the local lexicon, depending on config.

use crate::config::{ApiConfig, Config, EmotionMode, PromptsConfig};
use crate::emotion::classify_lexicon;
use crate::error::InferenceError;
use crate::inference::{InferenceBackend, TranslateRequest};
use crate::job::EmotionReading;
use crate::language::display_name;
use crate::utils::{check_response_status, preview};
use async_trait::async_trait;
use log::debug;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;

/// Refusal phrases that indicate the model declined to translate.
static REFUSAL_PHRASES: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    vec![
        "i'm sorry",
        "i cannot",
        "i am unable",
        "as an ai",
        "my apologies",
        "i am not programmed",
        "i do not have the ability",
    ]
});

/// Regex for stripping a markdown code fence around a JSON reply.
static CODE_FENCE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^```[a-zA-Z]*\s*(.*?)\s*```$").expect("Invalid CODE_FENCE_REGEX")
});

/// A message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role: "system", "user", or "assistant".
    pub role: String,
    /// Content of the message.
    pub content: String,
}

impl Message {
    fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Request body for the chat completions API.
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
}

/// Response from the chat completions API.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Emotion verdict as returned by the model.
#[derive(Debug, Deserialize)]
struct RawEmotion {
    label: Option<String>,
    score: Option<f32>,
}

/// Chat-completions backend.
pub struct ChatBackend {
    /// HTTP client for API requests.
    client: Client,
    api: ApiConfig,
    prompts: PromptsConfig,
    emotion_mode: EmotionMode,
    /// Pause before every request, for rate-limited endpoints.
    delay: Duration,
}

impl ChatBackend {
    /// Create a backend from the loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self, InferenceError> {
        if !config.api.is_configured() {
            return Err(InferenceError::InvalidConfig(
                "API key is not configured".to_string(),
            ));
        }
        url::Url::parse(&config.api.base_url)
            .map_err(|e| InferenceError::InvalidConfig(format!("Invalid base_url: {}", e)))?;

        let delay = if config.translation.delay_between_requests_sec > 0.0 {
            Duration::from_secs_f64(config.translation.delay_between_requests_sec)
        } else {
            Duration::ZERO
        };

        Ok(Self {
            client: Client::new(),
            api: config.api.clone(),
            prompts: config.prompts.clone(),
            emotion_mode: config.emotion.mode,
            delay,
        })
    }

    /// System prompt for one translation request.
    fn translation_prompt(&self, request: &TranslateRequest) -> String {
        build_translation_prompt(&self.prompts.content_translation, request)
    }

    /// Send one system + user exchange and return the trimmed reply.
    async fn complete(&self, system: String, user: &str) -> Result<String, InferenceError> {
        let request = ChatRequest {
            model: self.api.model.clone(),
            messages: vec![Message::system(system), Message::user(user)],
            stream: false,
        };

        // Apply rate limiting delay
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let url = format!("{}/chat/completions", self.api.base_url.trim_end_matches('/'));
        debug!("POST {} ({})", url, preview(user, 40));
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api.key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let response = check_response_status(response).await?;

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::Parse(format!("Failed to parse API response: {}", e)))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(InferenceError::EmptyResponse);
        }
        Ok(trimmed.to_string())
    }
}

#[async_trait]
impl InferenceBackend for ChatBackend {
    fn name(&self) -> &'static str {
        "chat"
    }

    fn concurrency_safe(&self) -> bool {
        self.api.concurrent_requests
    }

    async fn translate(&self, request: &TranslateRequest) -> Result<String, InferenceError> {
        if request.text.trim().is_empty() {
            return Ok(request.text.clone());
        }
        let reply = self
            .complete(self.translation_prompt(request), &request.text)
            .await?;
        check_refusal(&reply)?;
        Ok(reply)
    }

    async fn classify_emotion(&self, text: &str) -> Result<EmotionReading, InferenceError> {
        match self.emotion_mode {
            EmotionMode::Lexicon => Ok(classify_lexicon(text)),
            EmotionMode::Api => {
                if text.trim().is_empty() {
                    return Ok(EmotionReading::new("neutral", 1.0));
                }
                let reply = self
                    .complete(self.prompts.emotion_classification.clone(), text)
                    .await?;
                parse_emotion(&reply)
            }
        }
    }
}

/// Substitute language names into the prompt and append any hint.
fn build_translation_prompt(template: &str, request: &TranslateRequest) -> String {
    let mut prompt = template
        .replace("{source}", &display_name(&request.source_lang))
        .replace("{target}", &display_name(&request.target_lang));
    if let Some(hint) = &request.hint {
        prompt.push_str("\n\n");
        prompt.push_str(hint);
    }
    prompt
}

fn check_refusal(reply: &str) -> Result<(), InferenceError> {
    let lower = reply.to_lowercase();
    for phrase in REFUSAL_PHRASES.iter() {
        if lower.starts_with(phrase) {
            return Err(InferenceError::Refused(format!(
                "Response starts with refusal phrase: {}",
                phrase
            )));
        }
    }
    Ok(())
}

/// Parse the model's emotion verdict, tolerating code fences and prose.
fn parse_emotion(raw: &str) -> Result<EmotionReading, InferenceError> {
    let trimmed = raw.trim();

    // Remove markdown code fence if present
    let json_str = if trimmed.starts_with("```") {
        CODE_FENCE_REGEX
            .captures(trimmed)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .unwrap_or(trimmed)
    } else {
        trimmed
    };

    let json_content = match (json_str.find('{'), json_str.rfind('}')) {
        (Some(s), Some(e)) if s < e => &json_str[s..=e],
        _ => {
            return Err(InferenceError::Parse(
                "No valid JSON object found".to_string(),
            ));
        }
    };

    let parsed: RawEmotion = serde_json::from_str(json_content)
        .map_err(|e| InferenceError::Parse(format!("JSON parse error: {}", e)))?;

    let label = parsed
        .label
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .ok_or_else(|| InferenceError::Parse("Emotion label missing".to_string()))?;

    Ok(EmotionReading::new(label, parsed.score.unwrap_or(1.0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> Config {
        let mut config = Config::default();
        config.api.key = "sk-test".to_string();
        config
    }

    #[test]
    fn test_from_config_requires_key() {
        let err = ChatBackend::from_config(&Config::default()).err().unwrap();
        assert!(matches!(err, InferenceError::InvalidConfig(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_from_config_rejects_bad_url() {
        let mut config = configured();
        config.api.base_url = "not a url".to_string();
        assert!(matches!(
            ChatBackend::from_config(&config),
            Err(InferenceError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_concurrency_follows_config() {
        let mut config = configured();
        assert!(ChatBackend::from_config(&config).unwrap().concurrency_safe());
        config.api.concurrent_requests = false;
        assert!(!ChatBackend::from_config(&config).unwrap().concurrency_safe());
    }

    #[test]
    fn test_translation_prompt() {
        let request = TranslateRequest::new("テキスト", "ja", "en");
        let prompt = build_translation_prompt("Translate {source} into {target}.", &request);
        assert_eq!(prompt, "Translate Japanese into English.");

        let retry = request.retry_with_hint("Preserve the joy tone of the original.", 1);
        let prompt = build_translation_prompt("Translate {source} into {target}.", &retry);
        assert!(prompt.ends_with("\n\nPreserve the joy tone of the original."));
    }

    #[test]
    fn test_refusal_detection() {
        assert!(matches!(
            check_refusal("I'm sorry, but I can't help with that."),
            Err(InferenceError::Refused(_))
        ));
        assert!(check_refusal("Aria smiled at the sea.").is_ok());
    }

    #[test]
    fn test_parse_emotion_plain() {
        let reading = parse_emotion(r#"{"label": "Joy", "score": 0.82}"#).unwrap();
        assert_eq!(reading.label, "joy");
        assert!((reading.score - 0.82).abs() < 1e-6);
    }

    #[test]
    fn test_parse_emotion_code_fence_and_prose() {
        let raw = "```json\n{\"label\": \"sadness\", \"score\": 0.4}\n```";
        assert_eq!(parse_emotion(raw).unwrap().label, "sadness");

        let raw = "Sure! Here it is: {\"label\": \"fear\"} Hope that helps.";
        let reading = parse_emotion(raw).unwrap();
        assert_eq!(reading.label, "fear");
        assert_eq!(reading.score, 1.0);
    }

    #[test]
    fn test_parse_emotion_errors() {
        assert!(matches!(
            parse_emotion("no json here"),
            Err(InferenceError::Parse(_))
        ));
        assert!(matches!(
            parse_emotion(r#"{"score": 0.5}"#),
            Err(InferenceError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_lexicon_mode_needs_no_network() {
        let backend = ChatBackend::from_config(&configured()).unwrap();
        let reading = backend.classify_emotion("She laughed happily.").await.unwrap();
        assert_eq!(reading.label, "joy");
    }

    #[tokio::test]
    async fn test_blank_text_not_sent() {
        let backend = ChatBackend::from_config(&configured()).unwrap();
        let request = TranslateRequest::new("  \n", "ja", "en");
        assert_eq!(backend.translate(&request).await.unwrap(), "  \n");
    }
}
