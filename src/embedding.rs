//! Text embedding through an external service.
//!
//! [`Embedder`] is the seam the rest of the crate depends on; the only
//! production implementation talks to an Ollama server. There is no
//! caching and no batching: one request per text.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{Error, Result};

/// Turns a text into a fixed-length vector.
pub trait Embedder: Send + Sync {
    /// Model identifier sent with every request.
    fn model(&self) -> &str;

    /// Embed one text. Any transport or decoding problem is an error.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Blocking client for Ollama's `/api/embeddings` endpoint.
#[derive(Clone)]
pub struct OllamaEmbedder {
    client: Client,
    endpoint: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        if model.trim().is_empty() {
            return Err(Error::Config("missing embedding model name".into()));
        }
        let client = Client::builder().timeout(timeout).build()?;
        let endpoint =
            format!("{}/api/embeddings", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model: model.to_string(),
        })
    }
}

impl Embedder for OllamaEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let embedding = send(&self.client, &self.endpoint, &request)
            .inspect_err(|e| error!("error embedding text: {e}"))?;
        debug!("embedded text (length: {})", text.len());
        Ok(embedding)
    }
}

fn send(
    client: &Client,
    endpoint: &str,
    request: &EmbeddingRequest<'_>,
) -> Result<Vec<f32>> {
    let resp = client
        .post(endpoint)
        .json(request)
        .send()
        .map_err(service_error)?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp
            .text()
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        return Err(service_error(format!("{status}: {body}")));
    }

    let parsed: EmbeddingResponse = resp.json().map_err(|e| {
        service_error(format!("failed to parse embedding response: {e}"))
    })?;
    parse_embedding(parsed)
}

fn parse_embedding(parsed: EmbeddingResponse) -> Result<Vec<f32>> {
    if parsed.embedding.is_empty() {
        return Err(service_error("service returned an empty embedding"));
    }
    if parsed.embedding.iter().any(|v| !v.is_finite()) {
        return Err(service_error("service returned non-finite values"));
    }
    Ok(parsed.embedding)
}

fn service_error(message: impl std::fmt::Display) -> Error {
    Error::Service {
        service: "embedding",
        message: message.to_string(),
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}
