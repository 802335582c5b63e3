use std::{fmt, path::Path, str::FromStr};

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{
    chunking::StoredChunk,
    embedding::Embedder,
    error::{Error, Result},
};

const MAGIC: [u8; 4] = *b"FRVS";
const VERSION: u32 = 1;
const HEADER_SIZE: usize = std::mem::size_of::<StoreHeader>();
const F32_SIZE: usize = std::mem::size_of::<f32>();

/// Fixed-size artifact header.
///
/// Artifact layout:
/// - header (magic, version, metric code, dimension D, row count N)
/// - N * D f32 values in row-major order
/// - the metadata array as JSON, one `{file, post_url}` object per row
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct StoreHeader {
    magic: [u8; 4],
    version: u32,
    metric: u32,
    dimension: u32,
    rows: u32,
}

/// How query and stored vectors are compared. Scores are always
/// "higher is better".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Euclidean distance `d`, scored as `1 / (1 + d)`.
    L2,
    /// Cosine similarity of the L2-normalized vectors.
    Cosine,
}

impl Metric {
    fn code(self) -> u32 {
        match self {
            Metric::L2 => 0,
            Metric::Cosine => 1,
        }
    }

    fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Metric::L2),
            1 => Some(Metric::Cosine),
            _ => None,
        }
    }

    /// Score `vector` against `query`. `query_norm` is `||query||`.
    pub fn score(self, query: &[f32], query_norm: f32, vector: &[f32]) -> f32 {
        match self {
            Metric::L2 => {
                let distance = query
                    .iter()
                    .zip(vector)
                    .map(|(q, v)| (q - v) * (q - v))
                    .sum::<f32>()
                    .sqrt();
                1.0 / (1.0 + distance)
            }
            Metric::Cosine => {
                let norm = l2_norm(vector);
                if norm == 0.0 || query_norm == 0.0 {
                    return 0.0;
                }
                let dot: f32 = query.iter().zip(vector).map(|(q, v)| q * v).sum();
                dot / (query_norm * norm)
            }
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::L2 => f.write_str("l2"),
            Metric::Cosine => f.write_str("cosine"),
        }
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l2" | "euclidean" => Ok(Metric::L2),
            "cosine" => Ok(Metric::Cosine),
            other => Err(Error::Validation(format!(
                "unknown metric '{other}' (expected 'l2' or 'cosine')"
            ))),
        }
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Where a vector came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    /// Chunk file name relative to the chunk directory.
    pub file: String,
    pub post_url: String,
}

/// One indexed chunk: its vector and metadata travel together, so a
/// position always resolves to the metadata of the same row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreEntry {
    pub vector: Vec<f32>,
    pub meta: ChunkMeta,
}

/// A search candidate: row position and similarity score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub position: usize,
    pub score: f32,
}

/// Result of [`VectorStore::build`].
#[derive(Debug)]
pub struct BuildReport {
    pub store: VectorStore,
    /// Chunks offered to the build.
    pub chunks: usize,
    /// Chunks left out because their embedding failed.
    pub failed: usize,
}

/// In-memory exact nearest-neighbour index over chunk embeddings.
///
/// Every vector shares the dimension of the first one pushed. The store
/// is never updated incrementally: a rebuild replaces it whole.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorStore {
    metric: Metric,
    dimension: usize,
    entries: Vec<StoreEntry>,
}

impl VectorStore {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            dimension: 0,
            entries: Vec::new(),
        }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Vector dimension, or 0 while the store is empty.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[StoreEntry] {
        &self.entries
    }

    /// Entry at `position`, if the position is in range.
    pub fn get(&self, position: usize) -> Option<&StoreEntry> {
        self.entries.get(position)
    }

    /// Append a vector. The first vector fixes the store's dimension.
    pub fn push(&mut self, vector: Vec<f32>, meta: ChunkMeta) -> Result<()> {
        if vector.is_empty() {
            return Err(Error::Validation(format!(
                "empty vector for {}",
                meta.file
            )));
        }
        if self.entries.is_empty() {
            self.dimension = vector.len();
        } else if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                found: vector.len(),
                context: meta.file,
            });
        }
        self.entries.push(StoreEntry { vector, meta });
        Ok(())
    }

    /// Embed every chunk and index the results.
    ///
    /// A chunk whose embedding fails is logged and left out, so the store
    /// may hold fewer vectors than there are chunks. The build fails if no
    /// chunk could be embedded or if a vector's dimension disagrees with
    /// the first one.
    pub fn build(
        chunks: &[StoredChunk],
        embedder: &dyn Embedder,
        metric: Metric,
    ) -> Result<BuildReport> {
        let mut store = Self::new(metric);
        let mut failed = 0;

        for chunk in chunks {
            let vector = match embedder.embed(&chunk.content) {
                Ok(v) => v,
                Err(e) => {
                    error!("failed to embed {}: {e}", chunk.file);
                    failed += 1;
                    continue;
                }
            };

            store.push(
                vector,
                ChunkMeta {
                    file: chunk.file.clone(),
                    post_url: chunk.post_url.clone(),
                },
            )?;
            debug!("processed chunk {} ({})", chunk.file, chunk.post_url);
        }

        if store.is_empty() {
            return Err(Error::EmptyIndex(
                "no valid chunks found for embedding".to_string(),
            ));
        }

        info!(
            vectors = store.len(),
            failed,
            dimension = store.dimension,
            "built vector store"
        );
        Ok(BuildReport {
            store,
            chunks: chunks.len(),
            failed,
        })
    }

    /// Top `k` entries for `query`, best first.
    ///
    /// Returns every entry when `k` exceeds the store size. A query whose
    /// dimension differs from the store's is an error.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>> {
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                found: query.len(),
                context: "query".to_string(),
            });
        }

        Ok(rank(
            self.metric,
            query,
            self.entries.iter().map(|e| e.vector.as_slice()),
            k,
        ))
    }

    /// Serialize the whole store into one artifact.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let rows: Vec<&[f32]> =
            self.entries.iter().map(|e| e.vector.as_slice()).collect();
        let metas: Vec<&ChunkMeta> =
            self.entries.iter().map(|e| &e.meta).collect();
        encode_parts(self.metric, self.dimension, &rows, &metas)
    }

    /// Reconstruct a store from an artifact produced by [`encode`].
    ///
    /// Rows without a matching metadata entry (or metadata without a row)
    /// are dropped with a warning rather than misaligned.
    ///
    /// [`encode`]: VectorStore::encode
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(corrupt("artifact shorter than its header"));
        }
        let header: StoreHeader =
            bytemuck::pod_read_unaligned(&bytes[..HEADER_SIZE]);

        if header.magic != MAGIC {
            return Err(corrupt("bad magic bytes"));
        }
        if header.version != VERSION {
            return Err(corrupt(format!(
                "unsupported version {}",
                header.version
            )));
        }
        let metric = Metric::from_code(header.metric).ok_or_else(|| {
            corrupt(format!("unknown metric code {}", header.metric))
        })?;

        let dimension = header.dimension as usize;
        let rows = header.rows as usize;
        if dimension == 0 || rows == 0 {
            return Err(corrupt("artifact contains no vectors"));
        }

        let matrix_len = rows
            .checked_mul(dimension)
            .and_then(|n| n.checked_mul(F32_SIZE))
            .ok_or_else(|| corrupt("matrix size overflows"))?;
        let matrix_end = HEADER_SIZE + matrix_len;
        if bytes.len() < matrix_end {
            return Err(corrupt(format!(
                "matrix truncated: expected {matrix_len} bytes"
            )));
        }

        let values: Vec<f32> = bytes[HEADER_SIZE..matrix_end]
            .chunks_exact(F32_SIZE)
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect();
        let metas: Vec<ChunkMeta> = serde_json::from_slice(&bytes[matrix_end..])
            .map_err(|e| corrupt(format!("unreadable metadata: {e}")))?;

        if metas.len() != rows {
            warn!(
                "metadata has {} entries for {rows} vectors; unmatched rows dropped",
                metas.len()
            );
        }

        let entries: Vec<StoreEntry> = values
            .chunks_exact(dimension)
            .zip(metas)
            .map(|(vector, meta)| StoreEntry {
                vector: vector.to_vec(),
                meta,
            })
            .collect();
        if entries.is_empty() {
            return Err(corrupt("no vector has metadata"));
        }

        Ok(Self {
            metric,
            dimension,
            entries,
        })
    }

    /// Write the artifact to `path`, replacing any previous one atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = self.encode()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, path)?;
        info!(
            "saved {} vectors to {} ({} bytes)",
            self.len(),
            path.display(),
            bytes.len()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound {
                    kind: "vector store",
                    name: path.display().to_string(),
                }
            } else {
                Error::Io(e)
            }
        })?;
        let store = Self::decode(&bytes)?;
        info!("loaded {} vectors from {}", store.len(), path.display());
        Ok(store)
    }
}

/// Exact top-`k` ranking of `rows` against `query`.
///
/// Ties keep row order; rows producing a NaN score are skipped.
pub fn rank<'a>(
    metric: Metric,
    query: &[f32],
    rows: impl IntoIterator<Item = &'a [f32]>,
    k: usize,
) -> Vec<Hit> {
    let query_norm = l2_norm(query);
    let mut hits: Vec<Hit> = rows
        .into_iter()
        .enumerate()
        .filter_map(|(position, row)| {
            let score = metric.score(query, query_norm, row);
            (!score.is_nan()).then_some(Hit { position, score })
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.position.cmp(&b.position))
    });
    hits.truncate(k);
    hits
}

fn encode_parts<M: Serialize>(
    metric: Metric,
    dimension: usize,
    rows: &[&[f32]],
    metas: &[M],
) -> Result<Vec<u8>> {
    let too_large = || Error::Validation("vector store too large".into());
    let header = StoreHeader {
        magic: MAGIC,
        version: VERSION,
        metric: metric.code(),
        dimension: u32::try_from(dimension).map_err(|_| too_large())?,
        rows: u32::try_from(rows.len()).map_err(|_| too_large())?,
    };

    let mut bytes =
        Vec::with_capacity(HEADER_SIZE + rows.len() * dimension * F32_SIZE);
    bytes.extend_from_slice(bytemuck::bytes_of(&header));
    for row in rows {
        if row.len() != dimension {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                found: row.len(),
                context: "encode".to_string(),
            });
        }
        bytes.extend_from_slice(bytemuck::cast_slice(row));
    }
    serde_json::to_writer(&mut bytes, metas)?;
    Ok(bytes)
}

fn corrupt(message: impl Into<String>) -> Error {
    Error::CorruptStore(message.into())
}
