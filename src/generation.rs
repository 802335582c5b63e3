//! Answer generation through an external language model.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{Error, Result};

/// Sampling options forwarded with every generation request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Produces a completion for a prompt.
pub trait Generator: Send + Sync {
    fn model(&self) -> &str;

    fn generate(&self, prompt: &str, options: &GenerateOptions)
    -> Result<String>;
}

/// Blocking client for Ollama's non-streaming `/api/generate` endpoint.
#[derive(Clone)]
pub struct OllamaGenerator {
    client: Client,
    endpoint: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        if model.trim().is_empty() {
            return Err(Error::Config("missing generation model name".into()));
        }
        let client = Client::builder().timeout(timeout).build()?;
        let endpoint =
            format!("{}/api/generate", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model: model.to_string(),
        })
    }
}

impl Generator for OllamaGenerator {
    fn model(&self) -> &str {
        &self.model
    }

    fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String> {
        let request = GenerateRequest::new(&self.model, prompt, options);

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(service_error)
            .inspect_err(|e| error!("error querying LLM: {e}"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(service_error(format!("{status}: {body}")));
        }

        let parsed: GenerateResponse = resp.json().map_err(|e| {
            service_error(format!("failed to parse generation response: {e}"))
        })?;
        debug!(
            model = %self.model,
            chars = parsed.response.len(),
            "generated answer"
        );
        Ok(parsed.response)
    }
}

fn service_error(message: impl std::fmt::Display) -> Error {
    Error::Service {
        service: "generation",
        message: message.to_string(),
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: RequestOptions,
}

impl<'a> GenerateRequest<'a> {
    fn new(model: &'a str, prompt: &'a str, options: &GenerateOptions) -> Self {
        Self {
            model,
            prompt,
            stream: false,
            options: RequestOptions {
                temperature: options.temperature,
                max_tokens: options.max_tokens,
                num_predict: options.max_tokens,
            },
        }
    }
}

/// `max_tokens` is not an Ollama option; `num_predict` is what bounds the
/// completion. Both are sent.
#[derive(Serialize)]
struct RequestOptions {
    temperature: f32,
    max_tokens: u32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}
