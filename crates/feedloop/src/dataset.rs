// ai
//! 🗃️ Datasets: finite, ordered, read-only, and about to be looped forever.
//!
//! 🎬 *[a JSONL file sits on disk. it has 1.2 million lines. it thinks that's a lot.]*
//! *[it has not yet met the high-throughput endpoint.]*
//!
//! A [`Dataset`] is loaded once by the composition root and shared by every session via
//! `Arc`. Nobody mutates it. Nobody gets a static global. The cursor that walks it lives in
//! [`cursor`]; the ways of obtaining one live in the provider modules:
//!
//! - [`local_file`]: JSONL (optionally gzipped) from disk
//! - [`remote`]: JSONL (optionally gzipped) from a URL
//! - [`synthetic`]: a seeded call-center generator for when the other two come up empty
//!
//! [`TranscriptDatasetConfig`] picks one; [`load_transcripts`] runs it and, if told to,
//! falls back to synthetic. Explicitly. With a warning. No silent `except: pass` energy. 🦆

use std::ops::Range;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::FeedError;
use crate::records::{FlightState, Record, Utterance};

pub mod cursor;
pub mod local_file;
pub mod remote;
pub mod synthetic;

pub use cursor::{Cursor, DatasetCursor};
pub use local_file::LocalFileLoader;
pub use remote::RemoteLoader;
pub use synthetic::SyntheticGenerator;

/// 📚 An ordered, finite, non-empty run of records. Cheap to clone, impossible to mutate.
///
/// Internally a window (`range`) over a shared `Arc<[R]>`, so [`Dataset::partition`] can
/// hand out disjoint views without copying a single utterance.
#[derive(Debug)]
pub struct Dataset<R> {
    records: Arc<[R]>,
    range: Range<usize>,
}

// 🔧 manual Clone: derive would demand R: Clone, and the Arc does not care
impl<R> Clone for Dataset<R> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
            range: self.range.clone(),
        }
    }
}

impl<R> Dataset<R> {
    /// 🏗️ Wrap loaded records. An empty dataset cannot be looped, so it is refused here,
    /// at startup, where refusing things is cheap.
    pub fn new(records: Vec<R>) -> Result<Self, FeedError> {
        if records.is_empty() {
            return Err(FeedError::Configuration(
                "dataset is empty; there is nothing to stream, loop, or pretend about".to_string(),
            ));
        }
        let len = records.len();
        Ok(Self {
            records: records.into(),
            range: 0..len,
        })
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    /// Always false for a constructed dataset. Here to keep clippy and the API tidy.
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn as_slice(&self) -> &[R] {
        &self.records[self.range.clone()]
    }

    pub fn get(&self, index: usize) -> Option<&R> {
        self.as_slice().get(index)
    }

    /// 🍰 Split into `n` disjoint, contiguous, non-empty views that together cover the whole
    /// dataset in order. `n` is clamped to `1..=len`.
    pub fn partition(&self, n: usize) -> Vec<Dataset<R>> {
        let len = self.len();
        let n = n.clamp(1, len);
        (0..n)
            .map(|i| {
                let start = self.range.start + len * i / n;
                let end = self.range.start + len * (i + 1) / n;
                Dataset {
                    records: Arc::clone(&self.records),
                    range: start..end,
                }
            })
            .collect()
    }
}

impl Dataset<Utterance> {
    /// 📊 How many distinct conversations are in here. Conversations are contiguous runs.
    pub fn conversation_count(&self) -> usize {
        let slice = self.as_slice();
        slice
            .iter()
            .enumerate()
            .filter(|(i, u)| *i == 0 || slice[i - 1].conversation_id != u.conversation_id)
            .count()
    }
}

// ============================================================
//  🎛️ Provider selection
// ============================================================

/// 🎛️ Where the transcript dataset comes from. Externally tagged, so TOML names the variant as a table:
///
/// ```toml
/// [transcript.dataset.LocalFile]
/// path = "data/conversations.jsonl"
/// ```
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub enum TranscriptDatasetConfig {
    LocalFile(local_file::LocalFileConfig),
    Remote(remote::RemoteConfig),
    Synthetic(synthetic::SyntheticConfig),
}

impl Default for TranscriptDatasetConfig {
    fn default() -> Self {
        TranscriptDatasetConfig::LocalFile(local_file::LocalFileConfig::default())
    }
}

/// 📥 Load the transcript dataset the configuration asks for.
///
/// If the chosen provider fails and `fallback` is set, the synthetic generator steps in
/// with `fallback` as its config. If it is not set, the failure is the answer.
pub async fn load_transcripts(
    config: &TranscriptDatasetConfig,
    fallback: Option<&synthetic::SyntheticConfig>,
) -> Result<Dataset<Utterance>, FeedError> {
    let attempt = match config {
        TranscriptDatasetConfig::LocalFile(c) => LocalFileLoader::new(c.clone()).load().await,
        TranscriptDatasetConfig::Remote(c) => RemoteLoader::new(c.clone())?.load().await,
        TranscriptDatasetConfig::Synthetic(c) => Ok(SyntheticGenerator::new(c.clone()).generate()),
    };

    let records = match (attempt, fallback) {
        (Ok(records), _) if !records.is_empty() => records,
        (Ok(_), Some(fallback)) => {
            warn!("⚠️ transcript dataset loaded but was empty: falling back to synthetic conversations");
            SyntheticGenerator::new(fallback.clone()).generate()
        }
        (Err(err), Some(fallback)) => {
            warn!("⚠️ transcript dataset unavailable ({err}): falling back to synthetic conversations");
            SyntheticGenerator::new(fallback.clone()).generate()
        }
        (Ok(records), None) => records,
        (Err(err), None) => return Err(err),
    };

    let dataset = Dataset::new(records)?;
    let conversations = dataset.conversation_count().max(1);
    let avg = dataset.len() as f64 / conversations as f64;
    info!(
        "📚 transcript dataset ready: {} utterances across {} conversations ({:.1} per conversation, ~{} utterances/s for 500k calls/day)",
        dataset.len(),
        conversations,
        avg,
        (500_000.0 * avg / 86_400.0) as u64
    );
    Ok(dataset)
}

/// 📥 Load a flight replay dataset from disk.
pub async fn load_flights(config: &local_file::LocalFileConfig) -> Result<Dataset<FlightState>, FeedError> {
    let records = LocalFileLoader::new(config.clone()).load().await?;
    let dataset = Dataset::new(records)?;
    info!("✈️ flight replay dataset ready: {} state vectors", dataset.len());
    Ok(dataset)
}

/// 🧾 Parse JSONL bytes into records, one object per line, blank lines ignored.
///
/// Shared by the file and remote loaders. Gzip is sniffed from the magic bytes, so
/// `conversations.jsonl.gz` and a gzip `Content-Encoding`-less download both just work.
pub(crate) fn parse_jsonl<R: Record>(raw: &[u8], origin: &str) -> Result<Vec<R>, FeedError> {
    let decompressed;
    let bytes: &[u8] = if raw.starts_with(&[0x1f, 0x8b]) {
        use std::io::Read;
        let mut buf = Vec::with_capacity(raw.len() * 4);
        flate2::read::GzDecoder::new(raw)
            .read_to_end(&mut buf)
            .map_err(|e| FeedError::Schema(format!("{origin}: gzip stream is broken: {e}")))?;
        decompressed = buf;
        &decompressed
    } else {
        raw
    };

    let mut records = Vec::new();
    let mut line_start = 0usize;
    let mut line_number = 0usize;
    // 🔍 memchr finds the newlines, we find the records
    let ends = memchr::memchr_iter(b'\n', bytes).chain(std::iter::once(bytes.len()));
    for line_end in ends {
        if line_start > bytes.len() {
            break;
        }
        line_number += 1;
        let line = bytes[line_start..line_end].trim_ascii();
        line_start = line_end + 1;
        if line.is_empty() {
            continue;
        }
        let record = serde_json::from_slice::<R>(line).map_err(|e| {
            FeedError::Schema(format!("{origin}: line {line_number} is not a valid record: {e}"))
        })?;
        records.push(record);
    }
    Ok(records)
}
