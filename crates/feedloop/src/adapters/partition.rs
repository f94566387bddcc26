// ai
//! 🧩 The streaming framework's partition/offset contract, over a [`Dataset`].
//!
//! 🎬 *[the framework restarts. it holds out a crumpled note: `{"position":412,"loop_count":3}`.
//! the reader reads the note, and carries on from utterance 412 of lap 3. nothing lost.
//! nothing said twice.]*
//!
//! 🧠 Knowledge graph:
//! - [`PartitionOptions`] arrive as the framework's string map (`num_partitions`, `batch_size`).
//! - [`DatasetSource::list_partitions`] splits the dataset into disjoint contiguous views.
//! - [`PartitionReader::read`] resumes a cursor from the offset JSON, pulls one batch through
//!   a `BatchFetcher` (so records are stamped at the moment of return), and answers with
//!   rows in schema order plus the next offset.
//! - Partitions always loop. A framework stream has no natural end.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::dataset::{Cursor, Dataset};
use crate::error::FeedError;
use crate::fetcher::{BatchFetcher, FetchOutcome};
use crate::rate_control::{RateController, RatePolicy};
use crate::records::{Field, Record};
use crate::upstreams::{LocalUpstream, Upstream};

/// 🎛️ Reader options, parsed from the framework's string map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionOptions {
    pub num_partitions: usize,
    pub batch_size: usize,
}

impl Default for PartitionOptions {
    fn default() -> Self {
        Self {
            num_partitions: 1,
            batch_size: 100,
        }
    }
}

impl PartitionOptions {
    /// 🧾 Parse `num_partitions` and `batch_size`. Missing keys take defaults; unparseable or
    /// zero values are a `Configuration` error. Unknown keys are ignored.
    pub fn from_map(options: &HashMap<String, String>) -> Result<Self, FeedError> {
        let defaults = Self::default();
        Ok(Self {
            num_partitions: positive(options, "num_partitions", defaults.num_partitions)?,
            batch_size: positive(options, "batch_size", defaults.batch_size)?,
        })
    }
}

fn positive(options: &HashMap<String, String>, key: &str, default: usize) -> Result<usize, FeedError> {
    let Some(raw) = options.get(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(FeedError::Configuration(format!(
            "option '{key}' must be a positive integer, got '{raw}'"
        ))),
    }
}

/// 🍰 One partition, as the framework lists it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartitionDescriptor {
    pub index: usize,
    /// 📍 first dataset index covered by this partition
    pub start: usize,
    pub len: usize,
}

/// 🧩 A dataset exposed as a partitioned framework source.
#[derive(Debug, Clone)]
pub struct DatasetSource<R> {
    dataset: Dataset<R>,
    options: PartitionOptions,
}

impl<R: Record> DatasetSource<R> {
    pub fn new(dataset: Dataset<R>, options: PartitionOptions) -> Self {
        Self { dataset, options }
    }

    /// 🏷️ Column names and types, in row order.
    pub fn schema(&self) -> Vec<Field> {
        R::schema()
    }

    pub fn list_partitions(&self) -> Vec<PartitionDescriptor> {
        let mut start = 0;
        self.dataset
            .partition(self.options.num_partitions)
            .iter()
            .enumerate()
            .map(|(index, view)| {
                let descriptor = PartitionDescriptor {
                    index,
                    start,
                    len: view.len(),
                };
                start += view.len();
                descriptor
            })
            .collect()
    }

    /// 📖 A reader over one partition's view. Offsets are relative to that view.
    pub fn reader(&self, partition: &PartitionDescriptor) -> Result<PartitionReader<R>, FeedError> {
        let view = self
            .dataset
            .partition(self.options.num_partitions)
            .into_iter()
            .nth(partition.index)
            .ok_or_else(|| FeedError::Configuration(format!("no partition with index {}", partition.index)))?;
        Ok(PartitionReader {
            view,
            batch_size: self.options.batch_size,
        })
    }
}

/// 📖 Reads one partition, one batch per call, from wherever the offset says.
#[derive(Debug, Clone)]
pub struct PartitionReader<R> {
    view: Dataset<R>,
    batch_size: usize,
}

impl<R: Record> PartitionReader<R> {
    /// 🏁 Where a brand-new stream starts: position 0, lap 0.
    pub fn initial_offset(&self) -> String {
        offset_json(&Cursor::default())
    }

    /// 📖 One batch from `start_offset`, as rows in schema order, plus the offset to hand
    /// back next time.
    pub async fn read(&self, start_offset: &str) -> Result<(Vec<Vec<Value>>, String), FeedError> {
        self.read_window(start_offset, self.batch_size).await
    }

    /// ⏪ Replay exactly the records between two offsets the framework has seen before.
    pub async fn read_between(&self, start_offset: &str, end_offset: &str) -> Result<Vec<Vec<Value>>, FeedError> {
        let start = parse_offset(start_offset)?;
        let end = parse_offset(end_offset)?;
        let len = self.view.len() as u64;
        let absolute = |c: &Cursor| c.loop_count * len + c.position as u64;
        let window = absolute(&end).checked_sub(absolute(&start)).ok_or_else(|| {
            FeedError::Configuration(format!("end offset {end} comes before start offset {start}"))
        })?;
        if window == 0 {
            return Ok(Vec::new());
        }
        let window = usize::try_from(window)
            .map_err(|_| FeedError::Configuration(format!("{window} records is too many to replay at once")))?;
        Ok(self.read_window(start_offset, window).await?.0)
    }

    async fn read_window(&self, start_offset: &str, window: usize) -> Result<(Vec<Vec<Value>>, String), FeedError> {
        let start = parse_offset(start_offset)?;
        let upstream = LocalUpstream::resume(self.view.clone(), start, true)?;
        let mut fetcher = BatchFetcher::new(
            upstream,
            Arc::new(RateController::new(RatePolicy::default())),
            std::time::Duration::from_secs(30),
        );
        let records = match fetcher.fetch(window, &CancellationToken::new()).await? {
            FetchOutcome::Records(records) => records,
            FetchOutcome::Cancelled => Vec::new(),
        };
        let next = fetcher.upstream().cursor().unwrap_or(start);
        let schema = R::schema();
        let rows = records
            .iter()
            .map(|record| to_row(record, &schema))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((rows, offset_json(&next)))
    }
}

fn parse_offset(raw: &str) -> Result<Cursor, FeedError> {
    serde_json::from_str(raw).map_err(|e| FeedError::Configuration(format!("unreadable offset '{raw}': {e}")))
}

fn offset_json(cursor: &Cursor) -> String {
    format!(r#"{{"position":{},"loop_count":{}}}"#, cursor.position, cursor.loop_count)
}

/// 🧱 An emitted record as a row: its JSON fields, picked out in schema order.
fn to_row<E: Serialize>(record: &E, schema: &[Field]) -> Result<Vec<Value>, FeedError> {
    let Value::Object(mut fields) =
        serde_json::to_value(record).map_err(|e| FeedError::Schema(format!("record would not serialize: {e}")))?
    else {
        return Err(FeedError::Schema("record did not serialize to an object".to_string()));
    };
    Ok(schema
        .iter()
        .map(|field| fields.remove(field.name).unwrap_or(Value::Null))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Utterance, fixtures};
    use std::collections::HashSet;

    fn the_source(sizes: &[u32], options: PartitionOptions) -> DatasetSource<Utterance> {
        match Dataset::new(fixtures::conversations(sizes)) {
            Ok(d) => DatasetSource::new(d, options),
            Err(e) => panic!("💀 fixture dataset refused: {e}"),
        }
    }

    fn the_options(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn identity_of(row: &[Value]) -> String {
        format!("{}#{}", row[1].as_str().unwrap_or("?"), row[2])
    }

    #[test]
    fn the_one_where_options_come_in_as_strings_and_leave_as_numbers() -> anyhow::Result<()> {
        let the_parsed = PartitionOptions::from_map(&the_options(&[("num_partitions", "3"), ("batch_size", "50")]))?;
        assert_eq!(
            the_parsed,
            PartitionOptions {
                num_partitions: 3,
                batch_size: 50
            }
        );
        assert_eq!(PartitionOptions::from_map(&HashMap::new())?, PartitionOptions::default());
        assert!(PartitionOptions::from_map(&the_options(&[("batch_size", "0")])).is_err());
        assert!(PartitionOptions::from_map(&the_options(&[("num_partitions", "lots")])).is_err());
        Ok(())
    }

    #[test]
    fn the_one_where_partitions_tile_the_dataset_without_gaps() {
        let the_partitions = the_source(&[4, 3, 3], PartitionOptions { num_partitions: 3, batch_size: 2 }).list_partitions();
        assert_eq!(the_partitions.len(), 3);
        assert_eq!(the_partitions.iter().map(|p| p.len).sum::<usize>(), 10);
        for pair in the_partitions.windows(2) {
            assert_eq!(pair[0].start + pair[0].len, pair[1].start);
        }
    }

    #[tokio::test]
    async fn the_one_where_rows_follow_the_schema_order() -> anyhow::Result<()> {
        let the_source = the_source(&[2], PartitionOptions::default());
        let the_reader = the_source.reader(&the_source.list_partitions()[0])?;
        let (the_rows, the_next) = the_reader.read(&the_reader.initial_offset()).await?;

        assert_eq!(the_rows.len(), 100, "a batch bigger than the dataset laps it");
        assert_eq!(the_next, r#"{"position":0,"loop_count":50}"#);
        let the_first = &the_rows[0];
        assert_eq!(the_first.len(), Utterance::schema().len());
        assert!(the_first[0].is_string(), "timestamp leads");
        assert_eq!(the_first[1], "conv_000001");
        assert_eq!(the_first[2], 0);
        assert_eq!(the_first[3], "agent");
        assert_eq!(the_first[10], "american");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_restarted_reader_loses_nothing_and_repeats_nothing() -> anyhow::Result<()> {
        let the_source = the_source(&[3, 4], PartitionOptions { num_partitions: 1, batch_size: 3 });
        let the_partition = the_source.list_partitions()[0];

        let mut the_offset = the_source.reader(&the_partition)?.initial_offset();
        let mut the_seen = Vec::new();
        for _ in 0..3 {
            // 🔄 a fresh reader every batch, as if the framework restarted in between
            let the_reader = the_source.reader(&the_partition)?;
            let (the_rows, the_next) = the_reader.read(&the_offset).await?;
            the_seen.extend(the_rows.iter().map(|r| identity_of(r)));
            the_offset = the_next;
        }

        assert_eq!(the_seen.len(), 9);
        let the_first_lap: HashSet<_> = the_seen[..7].iter().collect();
        assert_eq!(the_first_lap.len(), 7, "every record exactly once per lap");
        assert_eq!(the_seen[7], the_seen[0], "second lap starts over in order");
        assert_eq!(the_offset, r#"{"position":2,"loop_count":1}"#);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_replaying_between_offsets_gives_the_same_rows() -> anyhow::Result<()> {
        let the_source = the_source(&[5], PartitionOptions { num_partitions: 1, batch_size: 4 });
        let the_reader = the_source.reader(&the_source.list_partitions()[0])?;
        let the_start = the_reader.initial_offset();
        let (the_rows, the_end) = the_reader.read(&the_start).await?;

        let the_replay = the_reader.read_between(&the_start, &the_end).await?;
        let ids = |rows: &[Vec<Value>]| rows.iter().map(|r| identity_of(r)).collect::<Vec<_>>();
        assert_eq!(ids(&the_replay), ids(&the_rows));
        assert!(the_reader.read_between(&the_end, &the_start).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_garbled_offset_is_a_configuration_problem() -> anyhow::Result<()> {
        let the_source = the_source(&[2], PartitionOptions::default());
        let the_reader = the_source.reader(&the_source.list_partitions()[0])?;
        assert!(matches!(the_reader.read("not json").await, Err(FeedError::Configuration(_))));
        assert!(matches!(
            the_reader.read(r#"{"position":99,"loop_count":0}"#).await,
            Err(FeedError::Configuration(_))
        ));
        Ok(())
    }
}
