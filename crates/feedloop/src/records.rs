// ai
//! 📦 Records: the building blocks of feedloop.
//!
//! ---
//!
//! 🎬 COLD OPEN: INT. CALL CENTER: 3:47 AM
//!
//! A customer is very frustrated with the service quality. An agent sincerely
//! apologizes for the inconvenience. Neither of them exists. Both of them will be
//! streamed to a dashboard four hundred times before lunch, each time with a fresh
//! timestamp, each time believed.
//!
//! ---
//!
//! Two feeds, two shapes, one contract. A dataset stores the timeless half of a record
//! (`Utterance`, `FlightState`). The moment a record leaves the building it gets stamped
//! with an ingestion time and becomes its emitted twin (`TranscriptRecord`,
//! `FlightRecord`). Stamping happens at emission, never at authoring. 🦆

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// 🏷️ One column in a feed's schema, as the streaming framework sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub name: &'static str,
    pub data_type: DataType,
    pub nullable: bool,
}

/// 🔢 The handful of column types our two feeds actually use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Timestamp,
    String,
    Integer,
    Double,
    Boolean,
}

const fn field(name: &'static str, data_type: DataType, nullable: bool) -> Field {
    Field {
        name,
        data_type,
        nullable,
    }
}

/// 📦 A dataset-side record. Knows who it is, does not yet know when it was seen.
///
/// # Contract
/// - `stamp` consumes the stored record and returns the emitted form with `at` as its
///   ingestion time. Called by `BatchFetcher` at the moment of return, not before.
/// - `schema` lists the emitted form's fields in row order.
/// - `identity` is stable within a dataset; used for logs and duplicate hunting in tests.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + std::fmt::Debug + 'static {
    type Emitted: Clone + Send + Sync + Serialize + std::fmt::Debug + 'static;

    fn stamp(self, at: DateTime<Utc>) -> Self::Emitted;

    fn schema() -> Vec<Field>;

    fn identity(&self) -> String;
}

// ============================================================
//  🎧 Transcript feed
// ============================================================

/// 🎧 One thing one person said on one call. As stored in the dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub conversation_id: String,
    /// 🔢 zero-based, strictly increasing within a conversation
    pub utterance_id: u32,
    /// 🗣️ "agent" or "customer"
    pub speaker: String,
    pub text: String,
    /// 🎯 ASR confidence, 0..=1
    pub confidence: f64,
    pub start_time: f64,
    pub end_time: f64,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub accent: Option<String>,
}

/// 📡 An utterance on the wire, wearing its ingestion timestamp like a name tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub utterance: Utterance,
}

impl Record for Utterance {
    type Emitted = TranscriptRecord;

    fn stamp(self, at: DateTime<Utc>) -> TranscriptRecord {
        TranscriptRecord {
            timestamp: at,
            utterance: self,
        }
    }

    fn schema() -> Vec<Field> {
        vec![
            field("timestamp", DataType::Timestamp, false),
            field("conversation_id", DataType::String, false),
            field("utterance_id", DataType::Integer, false),
            field("speaker", DataType::String, false),
            field("text", DataType::String, false),
            field("confidence", DataType::Double, true),
            field("start_time", DataType::Double, true),
            field("end_time", DataType::Double, true),
            field("domain", DataType::String, true),
            field("topic", DataType::String, true),
            field("accent", DataType::String, true),
        ]
    }

    fn identity(&self) -> String {
        format!("{}#{}", self.conversation_id, self.utterance_id)
    }
}

// ============================================================
//  ✈️ Flight feed
// ============================================================

/// ✈️ One aircraft state vector, as the upstream (or a replay file) hands it over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightState {
    pub icao24: String,
    #[serde(default)]
    pub callsign: Option<String>,
    pub origin_country: String,
    #[serde(default)]
    pub time_position: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_contact: Option<DateTime<Utc>>,
    pub longitude: f64,
    pub latitude: f64,
    #[serde(default)]
    pub geo_altitude: Option<f64>,
    #[serde(default)]
    pub on_ground: Option<bool>,
    #[serde(default)]
    pub velocity: Option<f64>,
    #[serde(default)]
    pub true_track: Option<f64>,
    #[serde(default)]
    pub vertical_rate: Option<f64>,
}

/// 📡 A flight state with its `time_ingest` stamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightRecord {
    pub time_ingest: DateTime<Utc>,
    #[serde(flatten)]
    pub state: FlightState,
}

impl Record for FlightState {
    type Emitted = FlightRecord;

    fn stamp(self, at: DateTime<Utc>) -> FlightRecord {
        FlightRecord {
            time_ingest: at,
            state: self,
        }
    }

    fn schema() -> Vec<Field> {
        vec![
            field("time_ingest", DataType::Timestamp, false),
            field("icao24", DataType::String, false),
            field("callsign", DataType::String, true),
            field("origin_country", DataType::String, false),
            field("time_position", DataType::Timestamp, true),
            field("last_contact", DataType::Timestamp, true),
            field("longitude", DataType::Double, false),
            field("latitude", DataType::Double, false),
            field("geo_altitude", DataType::Double, true),
            field("on_ground", DataType::Boolean, true),
            field("velocity", DataType::Double, true),
            field("true_track", DataType::Double, true),
            field("vertical_rate", DataType::Double, true),
        ]
    }

    fn identity(&self) -> String {
        // 🛰️ icao24 alone repeats every poll; the last contact epoch makes it unique per snapshot
        let epoch = self.last_contact.map(|t| t.timestamp()).unwrap_or_default();
        format!("{}@{}", self.icao24, epoch)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// 🧪 A tiny call center: one conversation per entry in `sizes`, ids conv_000001.. .
    pub(crate) fn conversations(sizes: &[u32]) -> Vec<Utterance> {
        let mut utterances = Vec::new();
        for (conv_idx, &size) in sizes.iter().enumerate() {
            for utterance_id in 0..size {
                utterances.push(utterance(&format!("conv_{:06}", conv_idx + 1), utterance_id));
            }
        }
        utterances
    }

    pub(crate) fn utterance(conversation_id: &str, utterance_id: u32) -> Utterance {
        Utterance {
            conversation_id: conversation_id.to_string(),
            utterance_id,
            speaker: if utterance_id % 2 == 0 { "agent" } else { "customer" }.to_string(),
            text: format!("line {utterance_id} of {conversation_id}"),
            confidence: 0.97,
            start_time: utterance_id as f64 * 2.0,
            end_time: utterance_id as f64 * 2.0 + 1.5,
            domain: Some("billing".to_string()),
            topic: Some("inbound".to_string()),
            accent: Some("american".to_string()),
        }
    }
}
