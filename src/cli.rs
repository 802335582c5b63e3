use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::vector_store::Metric;

#[derive(Debug, Parser)]
#[command(
    name = "forumrag",
    about = "Answer questions from a forum-post corpus, citing the posts"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Similarity metric for building and searching (l2 or cosine)
    #[arg(long, global = true)]
    pub metric: Option<Metric>,

    /// Base URL of the Ollama server
    #[arg(long, global = true)]
    pub ollama_url: Option<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Split a corpus into one chunk file per post
    Chunk(ChunkArgs),
    /// Embed the chunks and persist the vector store
    Build(BuildArgs),
    /// Retrieve the posts closest to a query
    Search(SearchArgs),
    /// Answer a question from the retrieved posts
    Ask(AskArgs),
    /// Show the data directory, configuration and store summary
    Status(StatusArgs),
    /// Manage persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Chunk --

#[derive(Debug, Parser)]
pub struct ChunkArgs {
    /// Markdown corpus with one `### Post N` section per post
    pub corpus: PathBuf,

    /// Output directory (default: the data directory's chunks/)
    #[arg(long)]
    pub out: Option<PathBuf>,
}

// -- Build --

#[derive(Debug, Parser)]
pub struct BuildArgs {
    /// Rebuild even if a readable vector store exists
    #[arg(long)]
    pub force: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return (default: the top_k setting)
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Ask --

#[derive(Debug, Parser)]
pub struct AskArgs {
    /// The question to answer
    pub question: String,

    #[command(flatten)]
    pub image: ImageArgs,

    /// Number of posts to retrieve as context
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Output as JSON: {"answer": ..., "links": [...]}
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
#[group(multiple = false)]
pub struct ImageArgs {
    /// Image file to attach to the question
    #[arg(long = "image")]
    pub path: Option<PathBuf>,

    /// Base64-encoded image to attach to the question
    #[arg(long = "image-base64")]
    pub base64: Option<String>,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show every setting with its resolved value
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a setting in config.redb
    Set {
        /// Setting name (e.g. top_k, metric, embed_model)
        key: String,
        /// New value
        value: String,
    },
    /// Remove a persisted setting (revert to default)
    Clear {
        /// Setting name
        key: String,
    },
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "forumrag",
            &mut std::io::stdout(),
        );
    }
}
