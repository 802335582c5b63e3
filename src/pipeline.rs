//! End-to-end query path: open the vector store (rebuilding it from the
//! chunk directory when needed), retrieve, and synthesize an answer.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::{
    chunking::{self, ChunkReport},
    config::Config,
    config_db::ConfigDb,
    data_dir::DataDir,
    embedding::{Embedder, OllamaEmbedder},
    error::Result,
    generation::{Generator, OllamaGenerator},
    retrieval::{self, RetrievalResult},
    synthesis::{self, Answer},
    vector_store::{BuildReport, VectorStore},
};

/// How a store was obtained by [`open_store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOrigin {
    Loaded,
    Rebuilt,
}

/// Embed the chunk directory, persist the store and record the build.
pub fn rebuild_store(
    chunks_dir: &Path,
    store_path: &Path,
    config_db: &ConfigDb,
    config: &Config,
    embedder: &dyn Embedder,
) -> Result<BuildReport> {
    let chunks = chunking::load_chunks(chunks_dir)?;
    info!("loaded {} chunks from {}", chunks.len(), chunks_dir.display());

    let report = VectorStore::build(&chunks, embedder, config.metric)?;
    report.store.save(store_path)?;

    config_db.record_build(&[
        ("embed_model", embedder.model().to_string()),
        ("metric", report.store.metric().to_string()),
        ("dimension", report.store.dimension().to_string()),
        ("vectors", report.store.len().to_string()),
        ("chunks", report.chunks.to_string()),
        ("failed", report.failed.to_string()),
    ])?;
    Ok(report)
}

/// Regenerate the data directory's chunks from `corpus`.
///
/// The persisted store indexes chunk files by name, so once they are
/// renumbered it is removed along with its build record. The next
/// [`open_store`] rebuilds from the new chunks.
pub fn rechunk(
    corpus: &Path,
    data_dir: &DataDir,
    config_db: &ConfigDb,
) -> Result<ChunkReport> {
    let report = chunking::chunk_corpus(corpus, &data_dir.chunks_dir())?;
    if invalidate_store(data_dir, config_db)? {
        info!("removed vector store built from previous chunks");
    }
    Ok(report)
}

/// Delete the persisted store and its build record. Returns whether a
/// store file existed.
pub fn invalidate_store(
    data_dir: &DataDir,
    config_db: &ConfigDb,
) -> Result<bool> {
    let removed = match std::fs::remove_file(data_dir.vector_store()) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => return Err(e.into()),
    };
    config_db.record_build(&[])?;
    Ok(removed)
}

/// Load the persisted store, falling back to a rebuild when it is missing
/// or unreadable. `force` always rebuilds.
///
/// A loaded store keeps its own metric even if the configured one differs.
pub fn open_store(
    data_dir: &DataDir,
    config_db: &ConfigDb,
    config: &Config,
    embedder: &dyn Embedder,
    force: bool,
) -> Result<(VectorStore, StoreOrigin)> {
    let store_path = data_dir.vector_store();

    if !force {
        match VectorStore::load(&store_path) {
            Ok(store) => {
                if store.metric() != config.metric {
                    warn!(
                        "vector store was built with the {} metric, configured \
                         metric {} is ignored until the next rebuild",
                        store.metric(),
                        config.metric
                    );
                }
                return Ok((store, StoreOrigin::Loaded));
            }
            Err(e) if e.is_recoverable_load() => {
                warn!("error loading vector store: {e}; rebuilding");
            }
            Err(e) => return Err(e),
        }
    }

    let report = rebuild_store(
        &data_dir.chunks_dir(),
        &store_path,
        config_db,
        config,
        embedder,
    )?;
    Ok((report.store, StoreOrigin::Rebuilt))
}

/// Everything a query needs, shared read-only between requests.
pub struct Pipeline {
    config: Config,
    store: VectorStore,
    chunks_dir: PathBuf,
    embedder: Box<dyn Embedder>,
    generator: Box<dyn Generator>,
}

impl Pipeline {
    pub fn new(
        config: Config,
        store: VectorStore,
        chunks_dir: PathBuf,
        embedder: Box<dyn Embedder>,
        generator: Box<dyn Generator>,
    ) -> Self {
        Self {
            config,
            store,
            chunks_dir,
            embedder,
            generator,
        }
    }

    /// Build the Ollama clients from `config` and open the store.
    pub fn open(
        data_dir: &DataDir,
        config_db: &ConfigDb,
        config: Config,
    ) -> Result<Self> {
        let embedder = OllamaEmbedder::new(
            &config.ollama_url,
            &config.embed_model,
            config.timeout(),
        )?;
        let generator = OllamaGenerator::new(
            &config.ollama_url,
            &config.generate_model,
            config.timeout(),
        )?;
        let (store, _) =
            open_store(data_dir, config_db, &config, &embedder, false)?;

        Ok(Self::new(
            config,
            store,
            data_dir.chunks_dir(),
            Box::new(embedder),
            Box::new(generator),
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Top `k` chunks for `query` (the configured `top_k` when `None`).
    pub fn search(
        &self,
        query: &str,
        k: Option<usize>,
    ) -> Result<Vec<RetrievalResult>> {
        retrieval::retrieve(
            query,
            &self.store,
            &self.chunks_dir,
            self.embedder.as_ref(),
            k.unwrap_or(self.config.top_k),
            self.config.preview_chars,
        )
    }

    /// Answer `question` from the forum posts, optionally noting a base64
    /// image.
    pub fn ask(
        &self,
        question: &str,
        image: Option<&str>,
        k: Option<usize>,
    ) -> Result<Answer> {
        let results = self.search(question, k)?;
        info!(results = results.len(), "retrieved context");
        synthesis::synthesize(
            question,
            &results,
            image,
            self.generator.as_ref(),
            &self.config,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::Error,
        synthesis::NO_CONTEXT_ANSWER,
        testing::{KeywordEmbedder, RecordingGenerator},
        vector_store::Metric,
    };

    const KEYWORDS: &[&str] = &["docker", "podman", "deadline"];

    fn setup() -> (tempfile::TempDir, DataDir, ConfigDb) {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let config_db = ConfigDb::open(&data_dir.config_db()).unwrap();

        let corpus = tmp.path().join("corpus.md");
        std::fs::write(
            &corpus,
            "### Post 1\n**Post URL**: /t/docker/1/1\n- **Content**:\n\
             Use docker for the project.\n\
             ### Post 2\n**Post URL**: /t/podman/1/2\n- **Content**:\n\
             Podman works too.\n\
             ### Post 3\nno marker here\n",
        )
        .unwrap();
        chunking::chunk_corpus(&corpus, &data_dir.chunks_dir()).unwrap();

        (tmp, data_dir, config_db)
    }

    #[test]
    fn open_store_rebuilds_then_loads() {
        let (_tmp, data_dir, config_db) = setup();
        let embedder = KeywordEmbedder::new(KEYWORDS);
        let config = Config::default();

        let (built, origin) =
            open_store(&data_dir, &config_db, &config, &embedder, false)
                .unwrap();
        assert_eq!(origin, StoreOrigin::Rebuilt);
        assert_eq!(built.len(), 2);
        assert!(data_dir.vector_store().exists());

        let info = config_db.build_info().unwrap();
        assert!(info.contains(&("vectors".to_string(), "2".to_string())));

        let calls = embedder.calls();
        let (loaded, origin) =
            open_store(&data_dir, &config_db, &config, &embedder, false)
                .unwrap();
        assert_eq!(origin, StoreOrigin::Loaded);
        assert_eq!(loaded, built);
        assert_eq!(embedder.calls(), calls);
    }

    #[test]
    fn corrupt_store_falls_back_to_rebuild() {
        let (_tmp, data_dir, config_db) = setup();
        std::fs::write(data_dir.vector_store(), b"garbage").unwrap();

        let (store, origin) = open_store(
            &data_dir,
            &config_db,
            &Config::default(),
            &KeywordEmbedder::new(KEYWORDS),
            false,
        )
        .unwrap();
        assert_eq!(origin, StoreOrigin::Rebuilt);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn loaded_store_keeps_its_metric() {
        let (_tmp, data_dir, config_db) = setup();
        let embedder = KeywordEmbedder::new(KEYWORDS);
        let mut config = Config::default();
        config.metric = Metric::L2;
        open_store(&data_dir, &config_db, &config, &embedder, false).unwrap();

        config.metric = Metric::Cosine;
        let (store, _) =
            open_store(&data_dir, &config_db, &config, &embedder, false)
                .unwrap();
        assert_eq!(store.metric(), Metric::L2);

        let (store, origin) =
            open_store(&data_dir, &config_db, &config, &embedder, true)
                .unwrap();
        assert_eq!(origin, StoreOrigin::Rebuilt);
        assert_eq!(store.metric(), Metric::Cosine);
    }

    #[test]
    fn rechunk_drops_store_built_from_old_chunks() {
        let (tmp, data_dir, config_db) = setup();
        let embedder = KeywordEmbedder::new(KEYWORDS);
        let config = Config::default();
        open_store(&data_dir, &config_db, &config, &embedder, false).unwrap();

        // Same posts in the opposite order, so chunk_001.md changes hands.
        let corpus = tmp.path().join("corpus.md");
        std::fs::write(
            &corpus,
            "### Post 1\n**Post URL**: /t/podman/1/2\n- **Content**:\n\
             Podman works too.\n\
             ### Post 2\n**Post URL**: /t/docker/1/1\n- **Content**:\n\
             Use docker for the project.\n",
        )
        .unwrap();
        rechunk(&corpus, &data_dir, &config_db).unwrap();

        assert!(!data_dir.vector_store().exists());
        assert!(config_db.build_info().unwrap().is_empty());

        let (store, origin) =
            open_store(&data_dir, &config_db, &config, &embedder, false)
                .unwrap();
        assert_eq!(origin, StoreOrigin::Rebuilt);

        let results = retrieval::retrieve(
            "docker",
            &store,
            &data_dir.chunks_dir(),
            &embedder,
            1,
            200,
        )
        .unwrap();
        assert_eq!(results[0].post_url, "/t/docker/1/1");
        assert_eq!(results[0].file, "chunk_002.md");
        assert_eq!(results[0].preview, "Use docker for the project.");
    }

    #[test]
    fn rechunk_without_store_succeeds() {
        let (tmp, data_dir, config_db) = setup();
        let report =
            rechunk(&tmp.path().join("corpus.md"), &data_dir, &config_db)
                .unwrap();
        assert_eq!(report.chunks.len(), 2);
        assert!(!data_dir.vector_store().exists());
    }

    #[test]
    fn missing_chunks_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let config_db = ConfigDb::open(&data_dir.config_db()).unwrap();

        let err = open_store(
            &data_dir,
            &config_db,
            &Config::default(),
            &KeywordEmbedder::new(KEYWORDS),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn ask_end_to_end() {
        let (_tmp, data_dir, config_db) = setup();
        let embedder = KeywordEmbedder::new(KEYWORDS);
        let config = Config::default();
        let (store, _) =
            open_store(&data_dir, &config_db, &config, &embedder, false)
                .unwrap();

        let pipeline = Pipeline::new(
            config,
            store,
            data_dir.chunks_dir(),
            Box::new(embedder),
            Box::new(RecordingGenerator::replying("Use docker.")),
        );

        let answer = pipeline.ask("docker?", None, Some(1)).unwrap();
        assert_eq!(answer.answer, "Use docker.");
        assert_eq!(answer.links.len(), 1);
        assert_eq!(
            answer.links[0].url,
            "https://discourse.onlinedegree.iitm.ac.in/t/docker/1/1"
        );
        assert_eq!(answer.links[0].text, "Use docker for the project.");
    }

    #[test]
    fn ask_without_readable_chunks_returns_no_context_answer() {
        let (_tmp, data_dir, config_db) = setup();
        let embedder = KeywordEmbedder::new(KEYWORDS);
        let config = Config::default();
        let (store, _) =
            open_store(&data_dir, &config_db, &config, &embedder, false)
                .unwrap();
        std::fs::remove_dir_all(data_dir.chunks_dir()).unwrap();

        let pipeline = Pipeline::new(
            config,
            store,
            data_dir.chunks_dir(),
            Box::new(embedder),
            Box::new(RecordingGenerator::failing()),
        );

        let answer = pipeline.ask("docker?", None, None).unwrap();
        assert_eq!(answer.answer, NO_CONTEXT_ANSWER);
        assert!(answer.links.is_empty());
    }
}
