use crate::content::{error_fragment, strip_code_fences};
use crate::error::GenerateError;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Client for the external markup generation service. One attempt per
/// request, no retries.
#[derive(Debug, Clone)]
pub struct GenerationClient {
    client: Client,
    endpoint: String,
}

impl GenerationClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, GenerateError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        info!(endpoint = %self.endpoint, prompt_len = prompt.len(), "requesting generation");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&GenerateRequest { prompt })
            .send()?;
        let status = response.status();
        let body = response.text()?;

        parse_response(status.as_u16(), &body)
    }

    /// Generated markup, or an error fragment describing why there is none.
    pub fn generate_or_fallback(&self, prompt: &str) -> String {
        match self.generate(prompt) {
            Ok(code) => code,
            Err(err) => {
                warn!("generation failed: {err}");
                error_fragment(&err.to_string())
            }
        }
    }
}

fn parse_response(status: u16, body: &str) -> Result<String, GenerateError> {
    if !(200..300).contains(&status) {
        let message = serde_json::from_str::<GenerateResponse>(body)
            .ok()
            .and_then(|parsed| parsed.error)
            .unwrap_or_else(|| "Generation failed".to_string());
        return Err(GenerateError::Status { status, message });
    }

    let parsed: GenerateResponse =
        serde_json::from_str(body).map_err(|err| GenerateError::Malformed(err.to_string()))?;

    Ok(strip_code_fences(parsed.code.as_deref().unwrap_or("")))
}
