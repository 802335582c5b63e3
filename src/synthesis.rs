//! Grounded answer synthesis.
//!
//! Retrieved chunks are concatenated into a single context block and sent
//! to the [`Generator`] with a fixed instruction template. The answer text
//! comes back untouched, paired with one citation per retrieved chunk.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    error::Result,
    generation::Generator,
    retrieval::RetrievalResult,
};

/// Answer returned when retrieval produced nothing to ground on.
pub const NO_CONTEXT_ANSWER: &str =
    "No relevant chunks found to answer the query.";

const IMAGE_NOTE: &str = "\n\n[Image provided: Please describe or consider \
                          the image content in your response if applicable.]";
const IMAGE_ERROR_NOTE: &str =
    "\n\n[Error processing image: Image content could not be decoded.]";

/// A source citation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub url: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub links: Vec<Link>,
}

/// Absolute URL for a post. Relative paths are joined onto `site_url`;
/// URLs that already carry a scheme are kept as they are.
pub fn resolve_url(site_url: &str, post_url: &str) -> String {
    if post_url.starts_with("http://") || post_url.starts_with("https://") {
        return post_url.to_string();
    }
    let site = site_url.trim_end_matches('/');
    if post_url.starts_with('/') {
        format!("{site}{post_url}")
    } else {
        format!("{site}/{post_url}")
    }
}

/// Prompt note for an optional base64 image.
///
/// The image is only decoded to check it; its bytes never reach the model.
pub fn describe_image(image: Option<&str>) -> &'static str {
    let Some(encoded) = image else {
        return "";
    };
    match STANDARD.decode(encoded.trim()) {
        Ok(bytes) => {
            info!("processed image ({} bytes)", bytes.len());
            IMAGE_NOTE
        }
        Err(e) => {
            warn!("error decoding image: {e}");
            IMAGE_ERROR_NOTE
        }
    }
}

/// Context block and instruction template sent to the model.
pub fn build_prompt(
    query: &str,
    results: &[RetrievalResult],
    image_note: &str,
    config: &Config,
) -> String {
    let context = results
        .iter()
        .map(|r| {
            format!(
                "Post URL: {}\nContent:\n{}",
                resolve_url(&config.site_url, &r.post_url),
                r.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "\nAnswer the query using the provided forum posts from {window}. \
         Cite Post URLs (e.g., {site}/t/...) where relevant. \
         If the answer isn't in the context, state so.\n\n\
         **Context**:\n{context}\n\n\
         **Query**:\n{query}{image_note}\n\n\
         **Answer**:\n",
        window = config.corpus_window,
        site = config.site_url.trim_end_matches('/'),
    )
}

/// Answer `query` from `results`.
///
/// With no results the generator is not called and [`NO_CONTEXT_ANSWER`]
/// is returned. Generation failures propagate.
pub fn synthesize(
    query: &str,
    results: &[RetrievalResult],
    image: Option<&str>,
    generator: &dyn Generator,
    config: &Config,
) -> Result<Answer> {
    if results.is_empty() {
        return Ok(Answer {
            answer: NO_CONTEXT_ANSWER.to_string(),
            links: Vec::new(),
        });
    }

    let image_note = describe_image(image);
    let prompt = build_prompt(query, results, image_note, config);
    debug!(
        model = generator.model(),
        prompt_chars = prompt.len(),
        "querying generator"
    );
    let answer = generator.generate(&prompt, &config.generate_options())?;

    let links = results
        .iter()
        .map(|r| Link {
            url: resolve_url(&config.site_url, &r.post_url),
            text: r.preview.clone(),
        })
        .collect();

    Ok(Answer { answer, links })
}
