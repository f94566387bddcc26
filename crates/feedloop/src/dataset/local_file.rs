// ai
//! 📂 LocalFileLoader: "It's just a file", said no sysadmin ever before the disk filled up.
//!
//! Reads a whole JSONL dataset into memory at startup. One record per line, conversations
//! grouped by contiguous lines. Gzip is welcome; we sniff it, no extension required.
//!
//! 🧠 Knowledge graph: config lives co-located with the loader that uses it. Ethos pattern,
//! baby. 🎯 No scavenger hunt at 2am for where `path` is defined.

use std::path::PathBuf;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::FeedError;
use crate::records::Record;

/// 📂 Where on disk the dataset lives.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LocalFileConfig {
    #[serde(default = "default_dataset_path")]
    pub path: PathBuf,
}

/// 🔧 The original's convention: `data/conversations.jsonl`, relative to wherever you ran us.
fn default_dataset_path() -> PathBuf {
    PathBuf::from("data/conversations.jsonl")
}

impl Default for LocalFileConfig {
    fn default() -> Self {
        Self {
            path: default_dataset_path(),
        }
    }
}

/// 📂 Loads records from a local JSONL file. Reads everything. Regrets nothing.
#[derive(Debug, Clone)]
pub struct LocalFileLoader {
    config: LocalFileConfig,
}

impl LocalFileLoader {
    pub fn new(config: LocalFileConfig) -> Self {
        Self { config }
    }

    /// 🚀 Slurp the file and parse every line.
    ///
    /// 💀 A missing or unreadable file is a `Configuration` error: the dataset is a startup
    /// requirement, not a runtime surprise. A malformed line is a `Schema` error naming the line.
    pub async fn load<R: Record>(&self) -> Result<Vec<R>, FeedError> {
        let path = &self.config.path;
        info!("📂 Loading dataset from local file: {}", path.display());
        let raw = tokio::fs::read(path).await.map_err(|e| {
            FeedError::Configuration(format!(
                "💀 The door to '{}' would not budge ({e}). We knocked. We checked permissions. \
                 The dataset remains unopened.",
                path.display()
            ))
        })?;
        debug!("📖 hauled {} bytes off the disk: parsing", raw.len());
        let records = super::parse_jsonl(&raw, &path.display().to_string())?;
        info!("✅ Loaded {} records from {}", records.len(), path.display());
        Ok(records)
    }
}
