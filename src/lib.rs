//! forumrag - grounded question answering over a forum-post corpus.
//!
//! A markdown dump of forum posts is split into one chunk per post, each
//! chunk is embedded through an Ollama server, and the vectors are kept in
//! a small exact-search store. Questions are answered by retrieving the
//! closest posts and asking a language model to answer from them, citing
//! the post URLs.
//!
//! # Quick start
//!
//! ```no_run
//! use forumrag::{Config, ConfigDb, DataDir, Pipeline, chunking};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let config_db = ConfigDb::open(&data_dir.config_db()).unwrap();
//! chunking::chunk_corpus("posts.md".as_ref(), &data_dir.chunks_dir()).unwrap();
//!
//! let config = Config::resolve(&config_db).unwrap();
//! let pipeline = Pipeline::open(&data_dir, &config_db, config).unwrap();
//! let answer = pipeline.ask("When is GA2 due?", None, None).unwrap();
//!
//! println!("{}", answer.answer);
//! for link in &answer.links {
//!     println!("{} - {}", link.url, link.text);
//! }
//! ```

pub mod chunking;
pub mod cli;
pub mod config;
pub mod config_db;
pub mod data_dir;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod mcp;
pub mod pipeline;
pub mod retrieval;
pub mod synthesis;
pub mod text_util;
pub mod vector_store;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use pipeline::Pipeline;
pub use vector_store::{Metric, VectorStore};
