//! Multipart `POST /analyze` transport

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use super::{AttemptError, Transport};
use crate::capture::JPEG_MIME;
use crate::session::Request;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    #[serde(alias = "result")]
    answer: Option<String>,
    error: Option<String>,
}

/// Talks to an analyze endpoint that accepts form fields and an image upload
pub struct AnalyzeTransport {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl AnalyzeTransport {
    /// Create a transport for `{base_url}/analyze`
    ///
    /// A URL already ending in `/analyze` is used as is.
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid
    pub fn new(base_url: &str) -> Result<Self> {
        let trimmed = base_url.trim().trim_end_matches('/');
        let full = if trimmed.ends_with("/analyze") {
            trimmed.to_string()
        } else {
            format!("{trimmed}/analyze")
        };

        let endpoint = url::Url::parse(&full)
            .map_err(|e| Error::Config(format!("invalid backend url '{base_url}': {e}")))?;

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    fn form(request: &Request) -> std::result::Result<Form, AttemptError> {
        let mut form = Form::new()
            .text("question", request.question.clone())
            .text("mode", request.mode.as_str())
            .text("prompt", request.prompt.clone());

        if !request.history.is_empty() {
            let history = request
                .history_json()
                .map_err(|e| AttemptError::Rejected(e.to_string()))?;
            form = form.text("history", history);
        }

        if let Some(image) = &request.image {
            let part = Part::bytes(image.bytes.clone())
                .file_name("capture.jpg")
                .mime_str(JPEG_MIME)
                .map_err(|e| AttemptError::Rejected(e.to_string()))?;
            form = form.part("image", part);
        }

        Ok(form)
    }
}

#[async_trait]
impl Transport for AnalyzeTransport {
    async fn send(&self, request: &Request) -> std::result::Result<String, AttemptError> {
        tracing::debug!(
            seq = request.seq,
            mode = %request.mode,
            image_bytes = request.image.as_ref().map_or(0, |i| i.bytes.len()),
            history = request.history.len(),
            "posting to analyze endpoint"
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .multipart(Self::form(request)?)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        let parsed: Option<AnalyzeResponse> = serde_json::from_str(&body).ok();

        if !status.is_success() {
            let message = parsed
                .and_then(|r| r.error)
                .unwrap_or_else(|| body.chars().take(200).collect());
            return Err(AttemptError::from_status(status.as_u16(), message));
        }

        match parsed {
            Some(AnalyzeResponse {
                answer: Some(answer),
                ..
            }) => Ok(answer),
            Some(AnalyzeResponse {
                error: Some(error), ..
            }) => Err(AttemptError::Rejected(error)),
            _ => Err(AttemptError::Rejected(
                "response has no answer field".to_string(),
            )),
        }
    }

    fn name(&self) -> &'static str {
        "analyze"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_gets_analyze_path() {
        let transport = AnalyzeTransport::new("http://127.0.0.1:5000").unwrap();
        assert_eq!(transport.endpoint(), "http://127.0.0.1:5000/analyze");

        let transport = AnalyzeTransport::new("http://host:5000/").unwrap();
        assert_eq!(transport.endpoint(), "http://host:5000/analyze");

        let transport = AnalyzeTransport::new("http://host/api/analyze").unwrap();
        assert_eq!(transport.endpoint(), "http://host/api/analyze");
    }

    #[test]
    fn rejects_invalid_url() {
        assert!(AnalyzeTransport::new("not a url").is_err());
    }

    #[test]
    fn response_accepts_result_alias() {
        let parsed: AnalyzeResponse = serde_json::from_str(r#"{"result": "A cup."}"#).unwrap();
        assert_eq!(parsed.answer.as_deref(), Some("A cup."));
    }
}
