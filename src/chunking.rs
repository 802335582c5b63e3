//! Splitting a forum-post corpus into one addressable chunk per post.
//!
//! The corpus is a single markdown document. Every post starts with a
//! `### Post <n>` header line, and the first line of a valid post body is
//! `**Post URL**: <url>`. Each valid post is written to its own
//! `chunk_NNN.md` file, numbered from 1 in the order posts survive
//! validation.

use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

/// Marker that must open every post body.
pub const POST_URL_MARKER: &str = "**Post URL**:";

/// Header given to a post that precedes the first `### Post` line.
const PREAMBLE_HEADER: &str = "### Post 0\n";

static POST_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^### Post \d+\r?\n").expect("post header pattern")
});

static CHUNK_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^chunk_\d+\.md$").expect("chunk file pattern")
});

/// One validated post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 1-based sequential id, gap-free across written chunks.
    pub id: usize,
    /// Header line plus body, verbatim.
    pub content: String,
    /// Value of the `**Post URL**:` line (may be relative to the site).
    pub post_url: String,
}

impl Chunk {
    pub fn file_name(&self) -> String {
        chunk_file_name(self.id)
    }
}

/// Zero-padded file name for a chunk id.
///
/// # Examples
///
/// ```
/// use forumrag::chunking::chunk_file_name;
///
/// assert_eq!(chunk_file_name(7), "chunk_007.md");
/// assert_eq!(chunk_file_name(1234), "chunk_1234.md");
/// ```
pub fn chunk_file_name(id: usize) -> String {
    format!("chunk_{id:03}.md")
}

/// Outcome of splitting a document, before anything touches disk.
#[derive(Debug, Default)]
pub struct ChunkSplit {
    pub chunks: Vec<Chunk>,
    pub skipped_empty: usize,
    pub rejected: usize,
}

/// Outcome of a full chunking run.
#[derive(Debug, Default)]
pub struct ChunkReport {
    /// Chunks written to disk, with their final ids.
    pub chunks: Vec<Chunk>,
    pub skipped_empty: usize,
    pub rejected: usize,
    pub write_failures: usize,
}

/// Split a corpus document into validated chunks.
///
/// Text before the first header is a preamble (the document title) and is
/// dropped unless it itself opens with the post URL marker, in which case
/// it becomes a post headed `### Post 0`. Sections with
/// only whitespace are skipped; sections whose body does not open with the
/// marker are rejected and logged. Neither consumes an id.
///
/// # Examples
///
/// ```
/// use forumrag::chunking::split_posts;
///
/// let doc = concat!(
///     "# Forum Posts\n\n",
///     "### Post 1\n**Post URL**: /t/a/1\nhello\n",
///     "### Post 2\nno marker here\n",
///     "### Post 3\n**Post URL**: /t/b/3\nworld\n",
/// );
/// let split = split_posts(doc);
/// assert_eq!(split.chunks.len(), 2);
/// assert_eq!(split.rejected, 1);
/// assert_eq!(split.chunks[1].id, 2);
/// assert_eq!(split.chunks[1].post_url, "/t/b/3");
/// ```
pub fn split_posts(document: &str) -> ChunkSplit {
    let headers: Vec<_> = POST_HEADER.find_iter(document).collect();

    let mut sections: Vec<(&str, &str)> = Vec::with_capacity(headers.len());
    let preamble_end = headers.first().map_or(document.len(), |m| m.start());
    let preamble = &document[..preamble_end];
    if opens_with_marker(preamble) {
        sections.push((PREAMBLE_HEADER, preamble));
    } else if !preamble.trim().is_empty() {
        debug!("dropping corpus preamble ({} bytes)", preamble.len());
    }

    for (i, header) in headers.iter().enumerate() {
        let end = headers.get(i + 1).map_or(document.len(), |m| m.start());
        sections.push((header.as_str(), &document[header.end()..end]));
    }

    let mut split = ChunkSplit::default();
    for (ordinal, (header, body)) in sections.into_iter().enumerate() {
        let ordinal = ordinal + 1;
        let label = header.trim();

        if body.trim().is_empty() {
            debug!(section = ordinal, "skipping empty post section {label}");
            split.skipped_empty += 1;
            continue;
        }

        if !opens_with_marker(body) {
            error!(
                section = ordinal,
                "{label} missing or misplaced {POST_URL_MARKER}"
            );
            split.rejected += 1;
            continue;
        }

        let content = format!("{header}{body}");
        let post_url = extract_post_url(&content).unwrap_or_default();
        split.chunks.push(Chunk {
            id: split.chunks.len() + 1,
            content,
            post_url,
        });
    }

    split
}

fn opens_with_marker(body: &str) -> bool {
    body.trim_start().starts_with(POST_URL_MARKER)
}

/// Extract the URL from the first `**Post URL**:` line, if non-empty.
pub fn extract_post_url(content: &str) -> Option<String> {
    content
        .lines()
        .find_map(|line| line.trim().strip_prefix(POST_URL_MARKER))
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
}

/// Persist chunks into `out_dir`, assigning ids as writes succeed.
///
/// A failed write is logged and does not consume an id, so the ids of the
/// returned chunks are always `1..=n`.
pub fn write_chunks(chunks: Vec<Chunk>, out_dir: &Path) -> ChunkReport {
    let mut report = ChunkReport::default();

    for mut chunk in chunks {
        chunk.id = report.chunks.len() + 1;
        let path = out_dir.join(chunk.file_name());
        match std::fs::write(&path, &chunk.content) {
            Ok(()) => {
                debug!("created chunk {}", path.display());
                report.chunks.push(chunk);
            }
            Err(e) => {
                error!("failed to write chunk {}: {e}", path.display());
                report.write_failures += 1;
            }
        }
    }

    report
}

/// Chunk the corpus at `corpus` into `out_dir`.
///
/// Fails before producing anything if the corpus cannot be read. Chunk
/// files left over from a previous run are removed first so the directory
/// always mirrors the current corpus.
pub fn chunk_corpus(corpus: &Path, out_dir: &Path) -> Result<ChunkReport> {
    let document = std::fs::read_to_string(corpus).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound {
                kind: "corpus",
                name: corpus.display().to_string(),
            }
        } else {
            Error::Io(e)
        }
    })?;

    let split = split_posts(&document);

    std::fs::create_dir_all(out_dir)?;
    let removed = remove_stale_chunks(out_dir)?;
    if removed > 0 {
        debug!("removed {removed} stale chunk files");
    }

    let mut report = write_chunks(split.chunks, out_dir);
    report.skipped_empty = split.skipped_empty;
    report.rejected = split.rejected;

    info!(
        written = report.chunks.len(),
        rejected = report.rejected,
        skipped_empty = report.skipped_empty,
        write_failures = report.write_failures,
        "chunking complete"
    );
    Ok(report)
}

fn remove_stale_chunks(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if entry.file_type()?.is_file()
            && CHUNK_FILE.is_match(&name.to_string_lossy())
        {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// A chunk file read back from disk for indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunk {
    /// File name relative to the chunk directory.
    pub file: String,
    /// Trimmed file content.
    pub content: String,
    pub post_url: String,
}

/// Load every `*.md` chunk in `dir`, in file-name order.
///
/// Empty files and files without a usable post URL are skipped with a
/// warning; unreadable files are logged and skipped.
pub fn load_chunks(dir: &Path) -> Result<Vec<StoredChunk>> {
    if !dir.is_dir() {
        return Err(Error::NotFound {
            kind: "chunk directory",
            name: dir.display().to_string(),
        });
    }

    let mut files: Vec<(String, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file()
            && path.extension().is_some_and(|ext| ext == "md")
        {
            files.push((entry.file_name().to_string_lossy().into(), path));
        }
    }
    files.sort();

    if files.is_empty() {
        return Err(Error::EmptyIndex(format!(
            "no chunk files in {}",
            dir.display()
        )));
    }

    let mut chunks = Vec::with_capacity(files.len());
    for (file, path) in files {
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                error!("error reading {file}: {e}");
                continue;
            }
        };

        let content = raw.trim();
        if content.is_empty() {
            warn!("empty chunk: {file}");
            continue;
        }

        let Some(post_url) = extract_post_url(content) else {
            warn!("skipping chunk {file}: missing or empty post URL");
            continue;
        };

        chunks.push(StoredChunk {
            file,
            content: content.to_string(),
            post_url,
        });
    }

    Ok(chunks)
}

/// Read the full content of one chunk file.
///
/// `file` must be a bare file name; anything that would escape `dir` is
/// reported as not found.
pub fn read_chunk(dir: &Path, file: &str) -> Result<String> {
    let not_found = || Error::NotFound {
        kind: "chunk",
        name: file.to_string(),
    };

    let name = Path::new(file);
    if name.file_name().is_none_or(|n| n != name.as_os_str()) {
        return Err(not_found());
    }

    std::fs::read_to_string(dir.join(name)).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            not_found()
        } else {
            Error::Io(e)
        }
    })
}
