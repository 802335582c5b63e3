use std::sync::Arc;

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    error,
    pipeline::Pipeline,
    retrieval::RetrievalResult,
    synthesis::Answer,
};

#[derive(Clone)]
pub struct ForumragMcpServer {
    pipeline: Arc<Pipeline>,
    tool_router: ToolRouter<Self>,
}

impl ForumragMcpServer {
    fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            tool_router: Self::tool_router(),
        }
    }

    /// Run blocking pipeline work off the async executor.
    async fn blocking<T, F>(
        &self,
        message: &'static str,
        work: F,
    ) -> Result<T, rmcp::ErrorData>
    where
        T: Send + 'static,
        F: FnOnce(&Pipeline) -> error::Result<T> + Send + 'static,
    {
        let pipeline = Arc::clone(&self.pipeline);
        tokio::task::spawn_blocking(move || work(pipeline.as_ref()))
            .await
            .map_err(|e| mcp_error("worker task failed", e))?
            .map_err(|e| mcp_error(message, e))
    }
}

#[tool_router(router = tool_router)]
impl ForumragMcpServer {
    /// Answer a question from the forum posts, with source links.
    #[tool(
        name = "forumrag_ask",
        description = "Answer a question using the indexed forum posts. Returns the answer and links to the posts it was grounded on. An optional base64 image may accompany the question."
    )]
    pub async fn forumrag_ask(
        &self,
        params: Parameters<AskParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let AskParams { question, image } = params.0;

        let answer = self
            .blocking("answering failed", move |pipeline| {
                pipeline.ask(&question, image.as_deref(), None)
            })
            .await?;

        let summary = format_answer_summary(&answer);
        let structured = serde_json::to_value(&answer)
            .map_err(|e| mcp_error("failed to serialize answer", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }

    /// Retrieve the forum posts closest to a query.
    #[tool(
        name = "forumrag_search",
        description = "Find the forum posts most similar to a query, best first, with scores and previews."
    )]
    pub async fn forumrag_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let SearchParams { query, limit } = params.0;

        let search_query = query.clone();
        let results = self
            .blocking("search failed", move |pipeline| {
                pipeline.search(&search_query, limit)
            })
            .await?;

        let summary = format_search_summary(&results, &query);
        let structured = serde_json::to_value(SearchResponse {
            result_count: results.len(),
            query,
            results,
        })
        .map_err(|e| mcp_error("failed to serialize search results", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for ForumragMcpServer {
    fn get_info(&self) -> ServerInfo {
        let mut server_info =
            Implementation::new("forumrag", env!("CARGO_PKG_VERSION"));
        server_info.title = Some("forumrag MCP".to_string());
        server_info.icons = None;
        server_info.website_url = None;

        let mut info = ServerInfo::default();
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info.server_info = server_info;
        info.instructions = Some(
            "Use forumrag_ask to answer course questions from the forum, citing the returned links. Use forumrag_search to inspect matching posts."
                .to_string(),
        );
        info
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AskParams {
    /// The question to answer.
    pub question: String,
    /// Optional base64-encoded image accompanying the question.
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchParams {
    /// Search query string.
    pub query: String,
    /// Maximum number of results (default: the configured top_k).
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    query: String,
    result_count: usize,
    results: Vec<RetrievalResult>,
}

fn format_answer_summary(answer: &Answer) -> String {
    let mut lines = vec![answer.answer.clone()];
    if !answer.links.is_empty() {
        lines.push(String::new());
        lines.push("Sources:".to_string());
        lines.extend(answer.links.iter().map(|l| format!("- {}", l.url)));
    }
    lines.join("\n")
}

fn format_search_summary(results: &[RetrievalResult], query: &str) -> String {
    if results.is_empty() {
        return format!("No results found for \"{query}\"");
    }

    let mut lines = Vec::with_capacity(results.len() + 1);
    let suffix = if results.len() == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} result{} for \"{query}\":",
        results.len(),
        suffix
    ));

    for r in results {
        lines.push(format!("{:.3} {} {}", r.score, r.post_url, r.file));
    }

    lines.join("\n")
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub fn run_mcp(pipeline: Pipeline) -> error::Result<()> {
    // The pipeline owns blocking HTTP clients, which must not be dropped
    // inside the runtime; this handle outlives it.
    let pipeline = Arc::new(pipeline);
    let server = ForumragMcpServer::new(Arc::clone(&pipeline));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    let served = runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        running.waiting().await.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok(())
    });

    drop(runtime);
    drop(pipeline);
    served
}
