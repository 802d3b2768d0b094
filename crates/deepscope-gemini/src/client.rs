// Gemini generateContent driver
//
// Stateless HTTP client plus per-chat history. Auth and throttling
// failures map onto the core taxonomy (API_AUTH_ERROR, RATE_LIMIT_ERROR);
// request timeouts surface as retryable rate-limit errors.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use deepscope_core::chat::{BoxedChat, ChatClient, ChatHandle, ChatRole, PrimingTurn};
use deepscope_core::error::{AnalysisError, Result};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-pro";
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Chat client for the Gemini API
///
/// # Example
///
/// ```ignore
/// let client = GeminiChatClient::from_env()?;
/// // or
/// let client = GeminiChatClient::new("api-key").with_model("gemini-2.5-flash");
/// ```
#[derive(Clone)]
pub struct GeminiChatClient {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiChatClient {
    /// Create a client with the given API key and defaults
    pub fn new(api_key: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Create a client from GEMINI_API_KEY, honoring the optional
    /// GEMINI_MODEL and GEMINI_BASE_URL overrides
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY").map_err(|_| {
            AnalysisError::ApiAuth("GEMINI_API_KEY environment variable is not set".into())
        })?;
        let mut client = Self::new(api_key);
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            client.model = model;
        }
        if let Ok(base_url) = std::env::var("GEMINI_BASE_URL") {
            client.base_url = base_url;
        }
        Ok(client)
    }

    /// Override the model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Override the base URL (test servers, proxies)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        )
    }
}

#[async_trait]
impl ChatClient for GeminiChatClient {
    async fn start_chat(&self, priming: Vec<PrimingTurn>) -> Result<BoxedChat> {
        let history: Vec<Content> = priming.iter().map(Content::from_priming).collect();
        Ok(Box::new(GeminiChat {
            http: self.http.clone(),
            endpoint: self.endpoint(),
            history,
        }))
    }
}

/// One open conversation; history is replayed on every send
struct GeminiChat {
    http: Client,
    endpoint: String,
    history: Vec<Content>,
}

#[async_trait]
impl ChatHandle for GeminiChat {
    async fn send(&mut self, text: &str) -> Result<String> {
        self.history.push(Content::user(text));

        let request = GenerateContentRequest {
            contents: &self.history,
            generation_config: GenerationConfig::default(),
        };
        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status_error(status, &body));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::parse(format!("malformed Gemini response: {e}")))?;
        let reply = parsed.first_text().ok_or_else(|| {
            AnalysisError::parse("Gemini response contained no text candidates")
        })?;

        debug!(turns = self.history.len(), reply_len = reply.len(), "gemini exchange complete");
        self.history.push(Content::model(&reply));
        Ok(reply)
    }
}

fn map_transport_error(err: reqwest::Error) -> AnalysisError {
    if err.is_timeout() {
        AnalysisError::RateLimit(format!("request to Gemini timed out: {err}"))
    } else {
        AnalysisError::from_foreign(err.to_string())
    }
}

fn map_status_error(status: StatusCode, body: &str) -> AnalysisError {
    let summary: String = body.chars().take(300).collect();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            AnalysisError::ApiAuth(format!("Gemini rejected the API key ({status}): {summary}"))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            AnalysisError::RateLimit(format!("Gemini rate limit ({status}): {summary}"))
        }
        _ => AnalysisError::from_foreign(format!("Gemini HTTP {status}: {summary}")),
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: &'a [Content],
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_output_tokens: 8192,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    text: String,
}

impl Content {
    fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            parts: vec![Part { text: text.into() }],
        }
    }

    fn model(text: impl Into<String>) -> Self {
        Self {
            role: "model".into(),
            parts: vec![Part { text: text.into() }],
        }
    }

    fn from_priming(turn: &PrimingTurn) -> Self {
        match turn.role {
            ChatRole::User => Self::user(&turn.text),
            ChatRole::Model => Self::model(&turn.text),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GenerateContentResponse {
    fn first_text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
