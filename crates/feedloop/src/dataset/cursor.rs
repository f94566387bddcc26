// ai
//! 🧭 The cursor: a bookmark that knows how many times you've reread the book.
//!
//! 🎬 *[position 4,203 of 4,204. the cursor takes a deep breath.]*
//! *[position 0. loop_count: 1. nobody noticed the seam. that's the whole trick.]*
//!
//! 🧠 Knowledge graph:
//! - [`Cursor`] is the serializable value: `{position, loop_count}`. It is the offset the
//!   partition adapter hands the framework, and the thing a restarted stream resumes from.
//! - [`Cursor::advance`] is pure: same cursor + same window = same records, every time.
//! - [`DatasetCursor`] pairs a cursor with the dataset it walks, for callers that want a
//!   stateful `advance(&mut self, w)`.
//! - Windows larger than the dataset loop inside the single call; `loop_count` goes up once
//!   per boundary crossed. The concatenation of every window ever returned is the dataset,
//!   in order, repeated. No skips. No duplicates. No seams. 🦆

use serde::{Deserialize, Serialize};

use super::Dataset;
use crate::error::FeedError;

/// 🔖 Where we are, and how many laps we've done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Cursor {
    /// 📍 offset of the next record to hand out; always `< len(dataset)`
    pub position: usize,
    /// 🔄 completed passes over the dataset
    pub loop_count: u64,
}

impl Cursor {
    pub fn new(position: usize, loop_count: u64) -> Self {
        Self { position, loop_count }
    }

    /// 🔍 Make sure a cursor that came from the outside world fits this dataset.
    pub fn validate(&self, len: usize) -> Result<(), FeedError> {
        if self.position >= len {
            return Err(FeedError::Configuration(format!(
                "cursor position {} is out of range for a dataset of {} records",
                self.position, len
            )));
        }
        Ok(())
    }

    /// 📦 Take the next `window` records starting at `position`, wrapping as needed.
    ///
    /// Returns the records and the cursor that follows them. For `window ≤ len` there is at
    /// most one wrap; bigger windows lap the dataset as many times as it takes.
    pub fn advance<R: Clone>(&self, dataset: &Dataset<R>, window: usize) -> (Vec<R>, Cursor) {
        let records = dataset.as_slice();
        let len = records.len();
        // 🛡️ a cursor from a bigger dataset gets folded back in rather than indexing off a cliff
        let mut position = self.position % len;
        let mut loop_count = self.loop_count;
        let mut out = Vec::with_capacity(window);

        let mut remaining = window;
        while remaining > 0 {
            let take = remaining.min(len - position);
            out.extend_from_slice(&records[position..position + take]);
            remaining -= take;
            position += take;
            if position == len {
                position = 0;
                loop_count += 1;
            }
        }

        (out, Cursor { position, loop_count })
    }

    /// 📏 How many records are left before the next wrap.
    pub fn remaining_in_pass(&self, len: usize) -> usize {
        len.saturating_sub(self.position)
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@loop{}", self.position, self.loop_count)
    }
}

/// 🚶 A cursor walking a specific dataset. Owned by exactly one session.
#[derive(Debug, Clone)]
pub struct DatasetCursor<R> {
    dataset: Dataset<R>,
    cursor: Cursor,
}

impl<R: Clone> DatasetCursor<R> {
    /// 🏁 Start at the beginning of the first lap.
    pub fn new(dataset: Dataset<R>) -> Self {
        Self {
            dataset,
            cursor: Cursor::default(),
        }
    }

    /// ⏯️ Resume from a cursor someone saved earlier.
    pub fn resume(dataset: Dataset<R>, cursor: Cursor) -> Result<Self, FeedError> {
        cursor.validate(dataset.len())?;
        Ok(Self { dataset, cursor })
    }

    pub fn advance(&mut self, window: usize) -> Vec<R> {
        let (records, next) = self.cursor.advance(&self.dataset, window);
        self.cursor = next;
        records
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn dataset(&self) -> &Dataset<R> {
        &self.dataset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Utterance, fixtures};

    fn numbers(n: u32) -> Dataset<u32> {
        Dataset::new((0..n).collect()).expect("💀 non-empty by construction")
    }

    #[test]
    fn the_one_where_every_window_size_lands_exactly_where_the_math_says() {
        // 🧪 for all w ≤ len and every start position: w records, (p + w) mod len, loop iff wrapped
        let the_dataset = numbers(7);
        for start in 0..7usize {
            for window in 0..=7usize {
                let the_start = Cursor::new(start, 3);
                let (the_records, the_next) = the_start.advance(&the_dataset, window);
                assert_eq!(the_records.len(), window);
                assert_eq!(the_next.position, (start + window) % 7);
                let wrapped = start + window >= 7;
                assert_eq!(the_next.loop_count, if wrapped { 4 } else { 3 }, "start={start} w={window}");
                for (i, r) in the_records.iter().enumerate() {
                    assert_eq!(*r as usize, (start + i) % 7);
                }
            }
        }
    }

    #[test]
    fn the_one_where_two_conversations_share_a_window() -> anyhow::Result<()> {
        // 🧪 conversations {2,3,1}, window 4 from 0 → utterances 0..=3 spanning conversations 1 and 2
        let the_dataset: Dataset<Utterance> = Dataset::new(fixtures::conversations(&[2, 3, 1]))?;
        let (the_window, the_next) = Cursor::default().advance(&the_dataset, 4);

        let the_ids: Vec<(String, u32)> = the_window
            .iter()
            .map(|u| (u.conversation_id.clone(), u.utterance_id))
            .collect();
        assert_eq!(
            the_ids,
            vec![
                ("conv_000001".to_string(), 0),
                ("conv_000001".to_string(), 1),
                ("conv_000002".to_string(), 0),
                ("conv_000002".to_string(), 1),
            ]
        );
        assert_eq!(the_next, Cursor::new(4, 0));
        Ok(())
    }

    #[test]
    fn the_one_where_one_step_at_a_time_visits_everyone_once() {
        let the_dataset = numbers(5);
        let mut the_walker = DatasetCursor::new(the_dataset);
        let mut the_visits = Vec::new();
        for _ in 0..5 {
            assert_eq!(the_walker.cursor().loop_count, 0, "no lap should finish early");
            the_visits.extend(the_walker.advance(1));
        }
        assert_eq!(the_visits, vec![0, 1, 2, 3, 4]);
        assert_eq!(the_walker.cursor(), Cursor::new(0, 1));
    }

    #[test]
    fn the_one_where_a_resumed_cursor_picks_up_mid_sentence() -> anyhow::Result<()> {
        let the_dataset = numbers(9);

        // 🎬 the uninterrupted run
        let mut the_marathon = DatasetCursor::new(the_dataset.clone());
        let the_reference: Vec<u32> = (0..6).flat_map(|_| the_marathon.advance(4)).collect();

        // 🎬 the run that took a nap after two windows
        let mut the_napper = DatasetCursor::new(the_dataset.clone());
        let mut the_replay: Vec<u32> = (0..2).flat_map(|_| the_napper.advance(4)).collect();
        let the_saved = serde_json::to_string(&the_napper.cursor())?;
        drop(the_napper);

        let the_cursor: Cursor = serde_json::from_str(&the_saved)?;
        let mut the_comeback = DatasetCursor::resume(the_dataset, the_cursor)?;
        the_replay.extend((0..4).flat_map(|_| the_comeback.advance(4)));

        assert_eq!(the_replay, the_reference);
        Ok(())
    }

    #[test]
    fn the_one_where_an_oversized_window_laps_the_track() {
        let the_dataset = numbers(3);
        let (the_records, the_next) = Cursor::new(2, 0).advance(&the_dataset, 8);
        assert_eq!(the_records, vec![2, 0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(the_next, Cursor::new(1, 3));
    }

    #[test]
    fn the_one_where_an_out_of_range_resume_is_refused() {
        let the_verdict = DatasetCursor::resume(numbers(3), Cursor::new(3, 0));
        assert!(matches!(the_verdict, Err(FeedError::Configuration(_))));
    }

    #[test]
    fn the_one_where_the_offset_format_is_exactly_what_the_framework_stores() -> anyhow::Result<()> {
        let the_offset = serde_json::to_string(&Cursor::new(12, 2))?;
        assert_eq!(the_offset, r#"{"position":12,"loop_count":2}"#);
        Ok(())
    }
}
