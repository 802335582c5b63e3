use std::path::{Path, PathBuf};

use forumrag::{
    DataDir,
    Metric,
    VectorStore,
    vector_store::ChunkMeta,
};
use rmcp::{
    ServiceExt,
    model::CallToolRequestParams,
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use serde_json::json;

/// Persist a two-post store so the server starts without embedding
/// anything.
fn setup_fixture(root: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = DataDir::resolve(Some(root))?;
    let chunks_dir = data_dir.chunks_dir();
    std::fs::create_dir_all(&chunks_dir)?;
    std::fs::write(
        chunks_dir.join("chunk_001.md"),
        "### Post 1\n**Post URL**: /t/ga1/1/1\n- **Content**:\nGA1 help\n",
    )?;
    std::fs::write(
        chunks_dir.join("chunk_002.md"),
        "### Post 2\n**Post URL**: /t/ga2/2/1\n- **Content**:\nGA2 help\n",
    )?;

    let mut store = VectorStore::new(Metric::Cosine);
    store.push(
        vec![1.0, 0.0, 0.0],
        ChunkMeta {
            file: "chunk_001.md".to_string(),
            post_url: "/t/ga1/1/1".to_string(),
        },
    )?;
    store.push(
        vec![0.0, 1.0, 0.0],
        ChunkMeta {
            file: "chunk_002.md".to_string(),
            post_url: "/t/ga2/2/1".to_string(),
        },
    )?;
    store.save(&data_dir.vector_store())?;
    Ok(())
}

#[tokio::test]
async fn mcp_stdio_lists_tools_and_reports_service_failures()
-> Result<(), Box<dyn std::error::Error>> {
    let tempdir = tempfile::tempdir()?;
    setup_fixture(tempdir.path())?;

    let bin = forumrag_bin()?;
    let transport = TokioChildProcess::new(
        tokio::process::Command::new(bin).configure(|cmd| {
            cmd.arg("mcp")
                .env("FORUMRAG_DATA_DIR", tempdir.path())
                // Nothing listens on the discard port.
                .env("FORUMRAG_OLLAMA_URL", "http://127.0.0.1:9")
                .env("FORUMRAG_TIMEOUT_SECS", "5");
        }),
    )?;

    let client = ().serve(transport).await?;

    let tools = client.peer().list_all_tools().await?;
    let mut names: Vec<String> =
        tools.iter().map(|t| t.name.to_string()).collect();
    names.sort();
    assert_eq!(names, vec!["forumrag_ask", "forumrag_search"]);

    let args = json!({ "query": "GA1", "limit": 1 });
    let result = client
        .peer()
        .call_tool(
            CallToolRequestParams::new("forumrag_search")
                .with_arguments(args.as_object().unwrap().clone()),
        )
        .await;
    match result.expect_err("embedding service is unreachable") {
        rmcp::ServiceError::McpError(data) => {
            assert_eq!(data.message, "search failed");
            let reason = data.data.expect("error data").to_string();
            assert!(reason.contains("embedding service failed"));
        }
        other => panic!("unexpected error: {other}"),
    }

    client.cancel().await?;
    Ok(())
}

fn forumrag_bin() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Ok(bin) = std::env::var("CARGO_BIN_EXE_forumrag") {
        return Ok(PathBuf::from(bin));
    }

    let mut path = std::env::current_exe()?;
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("forumrag");

    if cfg!(windows) {
        path.set_extension("exe");
    }

    Ok(path)
}
