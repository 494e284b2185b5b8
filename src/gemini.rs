//! Gemini API client
//!
//! Shared by the LLM intent classifier and the LLM recommender.
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::error::{OrchestrationError, ProviderErrorKind};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::{error, info};

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Text plus heuristic confidence returned by one completion
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub confidence: f32,
}

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(45))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_key,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Build from `GEMINI_API_KEY`; `None` when unset or a placeholder
    pub fn from_env() -> Option<Self> {
        let key = env::var("GEMINI_API_KEY").ok()?;
        let key = key.trim();
        if key.is_empty() || key == "your_gemini_api_key_here" {
            return None;
        }
        Some(Self::new(key.to_string()))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generate a completion. `json_mode` requests `application/json` output.
    pub async fn generate(
        &self,
        prompt: &str,
        system_prompt: &str,
        json_mode: bool,
    ) -> crate::Result<Completion> {
        if !self.is_configured() {
            return Err(OrchestrationError::llm(
                ProviderErrorKind::NotConfigured,
                "GEMINI_API_KEY not configured",
            ));
        }

        let url = format!(
            "{}/{}:generateContent?key={}",
            BASE_URL, self.model, self.api_key
        );

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.2,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 2048,
                response_mime_type: json_mode.then(|| "application/json".to_string()),
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: system_prompt.to_string(),
                }],
            },
        };

        info!(model = %self.model, "Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                let kind = if e.is_timeout() {
                    ProviderErrorKind::Timeout
                } else {
                    ProviderErrorKind::Other
                };
                OrchestrationError::llm(kind, format!("Gemini API error: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(status = %status, "Gemini API error response: {}", error_text);
            return Err(OrchestrationError::llm(
                classify_status(status, &error_text),
                format!("Gemini API returned {}", status),
            ));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            OrchestrationError::llm(
                ProviderErrorKind::MalformedResponse,
                format!("Gemini parse error: {}", e),
            )
        })?;

        let candidate = gemini_response.candidates.first().ok_or_else(|| {
            OrchestrationError::llm(
                ProviderErrorKind::MalformedResponse,
                "No response from Gemini API",
            )
        })?;

        let text = candidate
            .content
            .parts
            .first()
            .ok_or_else(|| {
                OrchestrationError::llm(
                    ProviderErrorKind::MalformedResponse,
                    "Empty response from Gemini",
                )
            })?
            .text
            .clone();

        let confidence = calculate_confidence(candidate.finish_reason.as_deref(), text.len());

        info!("Gemini response received (confidence: {})", confidence);

        Ok(Completion { text, confidence })
    }
}

/// Map a provider status to an error kind
fn classify_status(status: StatusCode, body: &str) -> ProviderErrorKind {
    let lowered = body.to_lowercase();
    if lowered.contains("quota") {
        return ProviderErrorKind::QuotaExceeded;
    }
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderErrorKind::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderErrorKind::InvalidCredential,
        StatusCode::BAD_REQUEST if lowered.contains("api key") => {
            ProviderErrorKind::InvalidCredential
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ProviderErrorKind::Timeout,
        _ => ProviderErrorKind::Other,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Content,
    finish_reason: Option<String>,
}

/// Calculate response confidence
fn calculate_confidence(finish_reason: Option<&str>, response_length: usize) -> f32 {
    let base_confidence: f32 = 0.85;

    let finish_confidence = match finish_reason {
        Some("STOP") => 1.0,
        Some("MAX_TOKENS") | Some("LENGTH") => 0.8,
        Some("SAFETY") => 0.6,
        _ => 0.7,
    };

    let length_confidence = if response_length < 50 {
        0.6
    } else if response_length > 6000 {
        0.8
    } else {
        1.0
    };

    (base_confidence * finish_confidence * length_confidence).clamp(0.5, 0.98)
}
