/// HTTP embedding client.
///
/// Posts a batch of texts as JSON to a configurable endpoint and expects a
/// `{"embeddings": [[f32; dims]]}` response.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Embedder, EmbedderError};

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

pub struct HttpEmbedder {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
    dimensions: usize,
}

impl HttpEmbedder {
    pub fn new(url: &str, model: &str, dimensions: usize) -> Result<Self, EmbedderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EmbedderError::ServiceUnreachable(e.to_string()))?;

        Ok(Self {
            client,
            url: url.to_string(),
            model: model.to_string(),
            dimensions,
        })
    }

    fn request(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .map_err(|e| EmbedderError::ServiceUnreachable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(EmbedderError::InferenceFailed(format!(
                "embedding endpoint returned {}",
                resp.status()
            )));
        }

        let body: EmbedResponse = resp
            .json()
            .map_err(|e| EmbedderError::InferenceFailed(e.to_string()))?;

        if body.embeddings.len() != texts.len() {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                body.embeddings.len()
            )));
        }
        for vec in &body.embeddings {
            if vec.len() != self.dimensions {
                return Err(EmbedderError::DimensionMismatch {
                    expected: self.dimensions,
                    got: vec.len(),
                });
            }
        }

        Ok(body.embeddings)
    }
}

impl Embedder for HttpEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut vecs = self.request(&[text])?;
        Ok(vecs.remove(0))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
