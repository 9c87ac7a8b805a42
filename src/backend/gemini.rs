//! Google Generative Language `generateContent` transport

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{AttemptError, Transport};
use crate::capture::JPEG_MIME;
use crate::config::{ApiKeys, BackendConfig};
use crate::prompt;
use crate::session::Request;
use crate::{Error, Result};

const DEFAULT_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<OutPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OutPart<'a> {
    Text { text: &'a str },
    Image { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: &'static str,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<InPart>,
}

#[derive(Debug, Deserialize)]
struct InPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Calls Gemini directly with the image inline
pub struct GeminiTransport {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
}

impl GeminiTransport {
    /// Create a transport from backend config and `GEMINI_API_KEY`
    ///
    /// # Errors
    ///
    /// Returns error if the Gemini key is missing
    pub fn from_config(config: &BackendConfig, keys: &ApiKeys) -> Result<Self> {
        let api_key = keys
            .gemini
            .as_ref()
            .filter(|k| !k.expose_secret().is_empty())
            .map(|k| SecretString::from(k.expose_secret().to_string()))
            .ok_or_else(|| Error::Config("GEMINI_API_KEY required for the gemini backend".to_string()))?;

        Ok(Self::new(api_key, config.gemini_model.clone()))
    }

    #[must_use]
    pub fn new(api_key: SecretString, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url: DEFAULT_BASE.to_string(),
        }
    }

    /// Point at a different API root
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn body(request: &Request) -> GenerateRequest<'_> {
        let mut image = request.image.as_ref().map(|image| OutPart::Image {
            inline_data: InlineData {
                mime_type: JPEG_MIME,
                data: STANDARD.encode(&image.bytes),
            },
        });

        let mut contents = Vec::with_capacity(request.history.len() * 2 + 1);

        for entry in &request.history {
            contents.push(user_content(&entry.question, &mut image));
            contents.push(Content {
                role: Some("model"),
                parts: vec![OutPart::Text {
                    text: &entry.answer,
                }],
            });
        }
        contents.push(user_content(&request.question, &mut image));

        GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![OutPart::Text {
                    text: prompt::system_prompt(request.mode),
                }],
            },
            contents,
        }
    }
}

/// A user turn; the image rides with the first question of the topic
fn user_content<'a>(text: &'a str, image: &mut Option<OutPart<'a>>) -> Content<'a> {
    let mut parts = Vec::with_capacity(2);
    if let Some(img) = image.take() {
        parts.push(img);
    }
    parts.push(OutPart::Text { text });
    Content {
        role: Some("user"),
        parts,
    }
}

fn answer_text(response: GenerateResponse) -> std::result::Result<String, AttemptError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(AttemptError::Rejected(format!("blocked: {reason}")));
    }

    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(AttemptError::Rejected("no answer in response".to_string()));
    }
    Ok(text)
}

#[async_trait]
impl Transport for GeminiTransport {
    async fn send(&self, request: &Request) -> std::result::Result<String, AttemptError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        tracing::debug!(seq = request.seq, model = %self.model, "calling Gemini");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&Self::body(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|e| {
                tracing::debug!(seq = request.seq, error = %e, "unreadable error body");
                String::new()
            });
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map_or_else(|_| body.chars().take(200).collect(), |e| e.error.message);
            return Err(AttemptError::from_status(status.as_u16(), message));
        }

        answer_text(response.json().await?)
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}
