//! Deterministic stand-ins for the external services.

use std::{
    io::Write,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use tracing_subscriber::fmt::MakeWriter;

use crate::{
    embedding::Embedder,
    error::{Error, Result},
    generation::{GenerateOptions, Generator},
};

/// Embeds a text as keyword occurrence counts, one axis per keyword, plus a
/// constant bias axis so no vector is all zeros.
pub struct KeywordEmbedder {
    keywords: Vec<&'static str>,
    fail_on: Option<&'static str>,
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new(keywords: &[&'static str]) -> Self {
        Self {
            keywords: keywords.to_vec(),
            fail_on: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail every text containing `needle`.
    pub fn failing_on(mut self, needle: &'static str) -> Self {
        self.fail_on = Some(needle);
        self
    }

    pub fn dimension(&self) -> usize {
        self.keywords.len() + 1
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Embedder for KeywordEmbedder {
    fn model(&self) -> &str {
        "keyword-stub"
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(needle) = self.fail_on
            && text.contains(needle)
        {
            return Err(Error::Service {
                service: "embedding",
                message: format!("stub refuses texts containing '{needle}'"),
            });
        }

        let lower = text.to_lowercase();
        let mut vector: Vec<f32> = self
            .keywords
            .iter()
            .map(|k| lower.matches(k).count() as f32)
            .collect();
        vector.push(0.1);
        Ok(vector)
    }
}

/// Returns vectors of a fixed dimension, ignoring the text.
pub struct FixedEmbedder(pub Vec<f32>);

impl Embedder for FixedEmbedder {
    fn model(&self) -> &str {
        "fixed-stub"
    }

    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(self.0.clone())
    }
}

/// Records prompts and answers with a canned reply.
pub struct RecordingGenerator {
    reply: Result<String>,
    prompts: Mutex<Vec<String>>,
}

impl RecordingGenerator {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: Err(Error::Service {
                service: "generation",
                message: "stub is down".to_string(),
            }),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Generator for RecordingGenerator {
    fn model(&self) -> &str {
        "recording-stub"
    }

    fn generate(
        &self,
        prompt: &str,
        _options: &GenerateOptions,
    ) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match &self.reply {
            Ok(reply) => Ok(reply.clone()),
            Err(e) => Err(Error::Service {
                service: "generation",
                message: e.to_string(),
            }),
        }
    }
}

/// In-memory log sink for asserting on emitted tracing events.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Run `f` with a debug-level subscriber writing into a fresh capture.
    pub fn run<T>(f: impl FnOnce() -> T) -> (T, Self) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .without_time()
            .finish();
        let out = tracing::subscriber::with_default(subscriber, f);
        (out, capture)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// The first captured line containing `needle`.
    pub fn line_with(&self, needle: &str) -> Option<String> {
        self.contents()
            .lines()
            .find(|line| line.contains(needle))
            .map(str::to_string)
    }
}

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
