/// Text-generation capability, consumed only for query-expansion phrasing.
///
/// The crate never generates answers; this seam exists so the expander can
/// ask an external model for alternative phrasings of a query.
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("generation service unreachable: {0}")]
    ServiceUnreachable(String),
}

/// Trait for completion implementations.
pub trait Generator: Send + Sync {
    /// Complete a prompt and return the raw text response.
    fn complete(&self, prompt: &str) -> Result<String, GeneratorError>;
}

#[derive(Serialize)]
struct CompleteRequest<'a> {
    prompt: &'a str,
}

#[derive(Deserialize)]
struct CompleteResponse {
    text: String,
}

/// JSON-over-HTTP completion client.
pub struct HttpGenerator {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpGenerator {
    pub fn new(url: &str) -> Result<Self, GeneratorError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| GeneratorError::ServiceUnreachable(e.to_string()))?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl Generator for HttpGenerator {
    fn complete(&self, prompt: &str) -> Result<String, GeneratorError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&CompleteRequest { prompt })
            .send()
            .map_err(|e| GeneratorError::ServiceUnreachable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(GeneratorError::GenerationFailed(format!(
                "completion endpoint returned {}",
                resp.status()
            )));
        }

        let body: CompleteResponse = resp
            .json()
            .map_err(|e| GeneratorError::GenerationFailed(e.to_string()))?;

        Ok(body.text)
    }
}
