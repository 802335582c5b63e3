use base64::{Engine, engine::general_purpose::STANDARD};
use clap::Parser;
use forumrag::{
    chunking,
    cli::{self, Cli, Command, ConfigAction},
    config::{Config, SettingKey},
    config_db::ConfigDb,
    data_dir::DataDir,
    embedding::OllamaEmbedder,
    error::{self, Error},
    mcp,
    pipeline::{self, Pipeline, StoreOrigin},
    retrieval,
    vector_store::VectorStore,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("FORUMRAG_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;

    match &cli.command {
        Command::Chunk(args) => {
            cmd_chunk(&data_dir, &config_db, args)?;
        }
        Command::Build(args) => {
            let config = resolve_config(&cli, &config_db)?;
            cmd_build(&data_dir, &config_db, &config, args.force)?;
        }
        Command::Search(args) => {
            let config = resolve_config(&cli, &config_db)?;
            let pipeline = Pipeline::open(&data_dir, &config_db, config)?;
            let results = pipeline.search(&args.query, args.count)?;

            if args.json {
                println!("{}", retrieval::format_json(&results, &args.query)?);
            } else {
                println!("{}", retrieval::format_human(&results));
            }
        }
        Command::Ask(args) => {
            let config = resolve_config(&cli, &config_db)?;
            cmd_ask(&data_dir, &config_db, config, args)?;
        }
        Command::Status(args) => {
            let config = resolve_config(&cli, &config_db)?;
            cmd_status(&config_db, &data_dir, &config, args.json)?;
        }
        Command::Config { action } => {
            cmd_config(&cli, &config_db, action)?;
        }
        Command::Mcp => {
            let config = resolve_config(&cli, &config_db)?;
            let pipeline = Pipeline::open(&data_dir, &config_db, config)?;
            mcp::run_mcp(pipeline)?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

/// Stored settings and environment, then command-line overrides.
fn resolve_config(cli: &Cli, config_db: &ConfigDb) -> error::Result<Config> {
    let mut config = Config::resolve(config_db)?;
    if let Some(metric) = cli.metric {
        config.metric = metric;
    }
    if let Some(ref url) = cli.ollama_url {
        config.apply(SettingKey::OllamaUrl, url)?;
    }
    Ok(config)
}

fn cmd_chunk(
    data_dir: &DataDir,
    config_db: &ConfigDb,
    args: &cli::ChunkArgs,
) -> error::Result<()> {
    let out_dir = args.out.clone().unwrap_or_else(|| data_dir.chunks_dir());
    let report = if out_dir == data_dir.chunks_dir() {
        pipeline::rechunk(&args.corpus, data_dir, config_db)?
    } else {
        chunking::chunk_corpus(&args.corpus, &out_dir)?
    };

    println!(
        "Wrote {} chunks to {}",
        report.chunks.len(),
        out_dir.display()
    );
    if report.rejected > 0 || report.write_failures > 0 {
        println!(
            "Rejected {} malformed posts, {} failed writes",
            report.rejected, report.write_failures
        );
    }
    if report.skipped_empty > 0 {
        println!("Skipped {} empty sections", report.skipped_empty);
    }
    Ok(())
}

fn cmd_build(
    data_dir: &DataDir,
    config_db: &ConfigDb,
    config: &Config,
    force: bool,
) -> error::Result<()> {
    let embedder = OllamaEmbedder::new(
        &config.ollama_url,
        &config.embed_model,
        config.timeout(),
    )?;

    let (store, origin) =
        pipeline::open_store(data_dir, config_db, config, &embedder, force)?;

    match origin {
        StoreOrigin::Loaded => eprintln!(
            "Vector store is up to date ({} vectors); use --force to rebuild.",
            store.len()
        ),
        StoreOrigin::Rebuilt => eprintln!(
            "Built vector store: {} vectors of dimension {} ({}).",
            store.len(),
            store.dimension(),
            store.metric()
        ),
    }
    Ok(())
}

fn cmd_ask(
    data_dir: &DataDir,
    config_db: &ConfigDb,
    config: Config,
    args: &cli::AskArgs,
) -> error::Result<()> {
    let image = match (&args.image.path, &args.image.base64) {
        (Some(path), _) => Some(STANDARD.encode(std::fs::read(path)?)),
        (None, Some(encoded)) => Some(encoded.clone()),
        (None, None) => None,
    };

    let pipeline = Pipeline::open(data_dir, config_db, config)?;
    let answer = pipeline.ask(&args.question, image.as_deref(), args.count)?;

    if args.json {
        println!("{}", serde_json::to_string(&answer)?);
    } else {
        println!("{}", answer.answer);
        if !answer.links.is_empty() {
            println!("\nSources:");
            for link in &answer.links {
                println!("  {}", link.url);
                if !link.text.is_empty() {
                    println!("    {}", link.text);
                }
            }
        }
    }
    Ok(())
}

fn cmd_status(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    config: &Config,
    json: bool,
) -> error::Result<()> {
    let chunk_count = std::fs::read_dir(data_dir.chunks_dir())
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|x| x == "md"))
                .count()
        })
        .unwrap_or(0);

    let store = match VectorStore::load(&data_dir.vector_store()) {
        Ok(store) => json!({
            "status": "ready",
            "vectors": store.len(),
            "dimension": store.dimension(),
            "metric": store.metric(),
        }),
        Err(Error::NotFound { .. }) => json!({ "status": "missing" }),
        Err(e) => json!({ "status": "unreadable", "error": e.to_string() }),
    };
    let last_build: serde_json::Map<String, serde_json::Value> = config_db
        .build_info()?
        .into_iter()
        .map(|(k, v)| (k, v.into()))
        .collect();

    if json {
        let status = json!({
            "data_dir": data_dir.root(),
            "chunks": chunk_count,
            "vector_store": store,
            "last_build": last_build,
            "config": config,
        });
        println!("{status}");
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Chunks: {chunk_count}");
        match store["status"].as_str() {
            Some("ready") => println!(
                "Vector store: {} vectors, dimension {}, {} metric",
                store["vectors"],
                store["dimension"],
                store["metric"].as_str().unwrap_or("unknown")
            ),
            Some(status) => println!("Vector store: {status}"),
            None => {}
        }
        if !last_build.is_empty() {
            println!("Last build:");
            for (key, value) in &last_build {
                println!("  {key}: {}", value.as_str().unwrap_or_default());
            }
        }
        println!("Embedding model: {}", config.embed_model);
        println!("Generation model: {}", config.generate_model);
        println!("Ollama: {}", config.ollama_url);
    }
    Ok(())
}

fn cmd_config(
    cli: &Cli,
    config_db: &ConfigDb,
    action: &ConfigAction,
) -> error::Result<()> {
    match action {
        ConfigAction::Show { json } => {
            let config = resolve_config(cli, config_db)?;
            let stored: std::collections::HashMap<String, String> =
                config_db.list_settings()?.into_iter().collect();

            if *json {
                println!("{}", serde_json::to_string(&config)?);
            } else {
                for key in SettingKey::ALL {
                    let marker = if stored.contains_key(key.name()) {
                        " (stored)"
                    } else {
                        ""
                    };
                    println!("{}\t{}{marker}", key.name(), config.get(key));
                }
            }
        }
        ConfigAction::Set { key, value } => {
            let key = SettingKey::parse(key)?;
            let mut probe = Config::default();
            probe.apply(key, value)?;
            let normalized = probe.get(key);
            config_db.set_setting(key.name(), &normalized)?;
            println!("Set {} = {normalized}", key.name());
        }
        ConfigAction::Clear { key } => {
            let key = SettingKey::parse(key)?;
            if !config_db.remove_setting(key.name())? {
                return Err(Error::NotFound {
                    kind: "setting",
                    name: key.name().to_string(),
                });
            }
            println!("Cleared {}", key.name());
        }
    }
    Ok(())
}
