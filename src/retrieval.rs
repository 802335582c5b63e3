use std::path::Path;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::{
    chunking,
    embedding::Embedder,
    error::Result,
    text_util,
    vector_store::VectorStore,
};

/// One retrieved chunk, ready for display or answer synthesis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub rank: usize,
    pub score: f32,
    /// Chunk file name relative to the chunk directory.
    pub file: String,
    pub post_url: String,
    pub preview: String,
    #[serde(skip)]
    pub content: String,
}

/// Embed `query` and return up to `k` chunks, best first.
///
/// A failed query embedding aborts the call. Candidates whose metadata or
/// chunk file cannot be resolved are logged and dropped, so fewer than
/// `k` results (possibly none) may come back.
pub fn retrieve(
    query: &str,
    store: &VectorStore,
    chunks_dir: &Path,
    embedder: &dyn Embedder,
    k: usize,
    preview_chars: usize,
) -> Result<Vec<RetrievalResult>> {
    let query_vector = embedder.embed(query)?;
    let hits = store.search(&query_vector, k)?;
    debug!(candidates = hits.len(), k, "searched vector store");

    let mut results = Vec::with_capacity(hits.len());
    for hit in hits {
        let Some(entry) = store.get(hit.position) else {
            warn!("no metadata for position {}, dropping", hit.position);
            continue;
        };

        let content = match chunking::read_chunk(chunks_dir, &entry.meta.file)
        {
            Ok(content) => content,
            Err(e) => {
                error!("error reading {}: {e}", entry.meta.file);
                continue;
            }
        };

        results.push(RetrievalResult {
            rank: results.len() + 1,
            score: hit.score,
            file: entry.meta.file.clone(),
            post_url: entry.meta.post_url.clone(),
            preview: text_util::extract_preview(&content, preview_chars),
            content,
        });
    }

    Ok(results)
}

/// Render results for terminal output.
pub fn format_human(results: &[RetrievalResult]) -> String {
    if results.is_empty() {
        return "No results found.".to_string();
    }

    let mut out = String::new();
    for r in results {
        out.push_str(&format!(
            "{:>3}. [{:.3}] {} ({})\n",
            r.rank, r.score, r.post_url, r.file
        ));
        if !r.preview.is_empty() {
            out.push_str(&format!("     {}\n", r.preview));
        }
    }
    out.push_str(&format!("\n{} result(s)", results.len()));
    out
}

#[derive(Serialize)]
struct JsonResults<'a> {
    query: &'a str,
    result_count: usize,
    results: &'a [RetrievalResult],
}

/// Render results as a JSON document.
pub fn format_json(results: &[RetrievalResult], query: &str) -> Result<String> {
    Ok(serde_json::to_string(&JsonResults {
        query,
        result_count: results.len(),
        results,
    })?)
}
