// ai
//! 🔁 LocalUpstream: the in-memory dataset, walked by a cursor, looped forever (usually).
//!
//! 🎬 *[the dataset ends. the cursor does not flinch. position 0. loop_count + 1.]*
//!
//! With `loop_enabled = false` the walk stops at the end of the current pass: the last
//! window is truncated at the boundary, and every pull after that returns nothing, which
//! the emitter reads as "source exhausted" and finishes politely.

use async_trait::async_trait;

use super::Upstream;
use crate::dataset::{Cursor, Dataset, DatasetCursor};
use crate::error::FeedError;
use crate::records::Record;

#[derive(Debug)]
pub struct LocalUpstream<R> {
    cursor: DatasetCursor<R>,
    loop_enabled: bool,
    /// 🔄 the lap we started on; a non-looping walk ends when this changes
    starting_lap: u64,
}

impl<R: Record> LocalUpstream<R> {
    pub fn new(dataset: Dataset<R>, loop_enabled: bool) -> Self {
        Self::from_cursor(DatasetCursor::new(dataset), loop_enabled)
    }

    /// ⏯️ Resume a walk from a saved cursor.
    pub fn resume(dataset: Dataset<R>, cursor: Cursor, loop_enabled: bool) -> Result<Self, FeedError> {
        Ok(Self::from_cursor(DatasetCursor::resume(dataset, cursor)?, loop_enabled))
    }

    fn from_cursor(cursor: DatasetCursor<R>, loop_enabled: bool) -> Self {
        let starting_lap = cursor.cursor().loop_count;
        Self {
            cursor,
            loop_enabled,
            starting_lap,
        }
    }

    pub fn dataset_len(&self) -> usize {
        self.cursor.dataset().len()
    }

    fn exhausted(&self) -> bool {
        !self.loop_enabled && self.cursor.cursor().loop_count != self.starting_lap
    }
}

#[async_trait]
impl<R: Record> Upstream for LocalUpstream<R> {
    type Record = R;

    async fn pull(&mut self, window: usize) -> Result<Vec<R>, FeedError> {
        if self.exhausted() {
            return Ok(Vec::new());
        }
        let window = if self.loop_enabled {
            window
        } else {
            window.min(self.cursor.cursor().remaining_in_pass(self.dataset_len()))
        };
        Ok(self.cursor.advance(window))
    }

    fn cursor(&self) -> Option<Cursor> {
        Some(self.cursor.cursor())
    }

    fn is_finite(&self) -> bool {
        !self.loop_enabled
    }

    fn describe(&self) -> String {
        format!("local dataset ({} records, at {})", self.dataset_len(), self.cursor.cursor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Utterance, fixtures};

    fn the_call_center() -> Dataset<Utterance> {
        match Dataset::new(fixtures::conversations(&[2, 3])) {
            Ok(d) => d,
            Err(e) => panic!("💀 fixture dataset refused: {e}"),
        }
    }

    #[tokio::test]
    async fn the_one_where_the_loop_keeps_going_round() -> anyhow::Result<()> {
        let mut the_upstream = LocalUpstream::new(the_call_center(), true);
        let mut the_total = 0;
        for _ in 0..4 {
            the_total += the_upstream.pull(3).await?.len();
        }
        assert_eq!(the_total, 12);
        assert_eq!(the_upstream.cursor(), Some(Cursor::new(2, 2)));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_no_loop_means_the_party_ends_at_the_last_record() -> anyhow::Result<()> {
        let mut the_upstream = LocalUpstream::new(the_call_center(), false);
        assert_eq!(the_upstream.pull(3).await?.len(), 3);
        assert_eq!(the_upstream.pull(3).await?.len(), 2, "truncated at the boundary");
        assert!(the_upstream.pull(3).await?.is_empty());
        assert!(the_upstream.pull(3).await?.is_empty(), "and it stays empty");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_resumed_walk_without_loop_finishes_its_own_lap() -> anyhow::Result<()> {
        let mut the_upstream = LocalUpstream::resume(the_call_center(), Cursor::new(4, 7), false)?;
        let the_last = the_upstream.pull(10).await?;
        assert_eq!(the_last.len(), 1);
        assert_eq!(the_last[0].identity(), "conv_000002#2");
        assert!(the_upstream.pull(10).await?.is_empty());
        Ok(())
    }
}
