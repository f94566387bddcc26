// ai
//! 📊 progress.rs: "Are we fast enough yet?": every load test, every time, forever.
//!
//! 🚀 The drain harness answers one question: can this feed keep up with a call center
//! taking 500,000 calls a day? Roughly 78 utterances per second, it turns out. This module
//! draws the progress bar, the sliding-window rate, and the final verdict table.
//!
//! ⚠️  Warning: Watching this progress bar will not make the stream go faster.
//! 🦆 The duck is also waiting for 78/s.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

/// 📞 calls per day the original simulation was sized for
pub const CALLS_PER_DAY: u64 = 500_000;
/// 🎧 average utterances per call in the generated dataset
pub const UTTERANCES_PER_CALL: f64 = 13.5;

/// 🎯 Sustained rate needed to replay `CALLS_PER_DAY` calls of `UTTERANCES_PER_CALL` each.
pub fn required_rate() -> f64 {
    CALLS_PER_DAY as f64 * UTTERANCES_PER_CALL / 86_400.0
}

/// 🔢 "1000000" → "1,000,000". For the humans.
pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS for the marathon runs.
pub(crate) fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// 📊 Live throughput for one drained stream.
///
/// Uses a sliding 5-second window for the displayed rate so one slow chunk doesn't
/// look like an outage.
pub struct ProgressMetrics {
    source_name: String,
    /// 🎯 records expected; 0 when the stream is unbounded
    target: u64,
    total_records: u64,
    chunks: u64,
    progress_bar: ProgressBar,
    rate_samples: VecDeque<(Instant, u64)>,
    start_time: Instant,
}

impl std::fmt::Debug for ProgressMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar doesn't derive Debug, so we speak for it
        f.debug_struct("ProgressMetrics")
            .field("source_name", &self.source_name)
            .field("target", &self.target)
            .field("total_records", &self.total_records)
            .field("chunks", &self.chunks)
            .finish()
    }
}

/// 🏁 The numbers a drain run ends with.
#[derive(Debug, Clone, PartialEq)]
pub struct DrainReport {
    pub total_records: u64,
    pub chunks: u64,
    pub elapsed: Duration,
    pub throughput: f64,
}

impl DrainReport {
    pub fn keeps_up(&self) -> bool {
        self.throughput >= required_rate()
    }

    /// 🧾 The verdict, as a comfy table.
    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        let rows = [
            ("records", format_number(self.total_records)),
            ("chunks", format_number(self.chunks)),
            ("elapsed", format!("{:.2}s", self.elapsed.as_secs_f64())),
            ("throughput", format!("{:.2} records/s", self.throughput)),
            ("needed for 500k calls/day", format!("{:.0} records/s", required_rate())),
            (
                "verdict",
                if self.keeps_up() { "✅ keeps up".to_string() } else { "❌ falls behind".to_string() },
            ),
        ];
        for (label, value) in rows {
            table.add_row(vec![
                Cell::new(label).set_alignment(CellAlignment::Right),
                Cell::new(value).set_alignment(CellAlignment::Right),
            ]);
        }
        table
    }
}

impl ProgressMetrics {
    /// 🚀 `target` of 0 means "unbounded", and the bar becomes a spinner.
    pub fn new(source_name: String, target: u64) -> Self {
        let progress_bar = if target > 0 {
            let bar = ProgressBar::new(target);
            if let Ok(style) = ProgressStyle::default_bar().template("{msg}\n| [{bar:40.cyan/blue}]") {
                bar.set_style(style.progress_chars("=>-"));
            }
            bar
        } else {
            ProgressBar::new_spinner()
        };

        let start_time = Instant::now();
        let mut rate_samples = VecDeque::new();
        rate_samples.push_back((start_time, 0u64));

        Self {
            source_name,
            target,
            total_records: 0,
            chunks: 0,
            progress_bar,
            rate_samples,
            start_time,
        }
    }

    /// 🔄 One chunk arrived.
    pub fn update(&mut self, records: u64) {
        self.total_records += records;
        self.chunks += 1;
        let rate = self.windowed_rate();
        self.render(rate);
        self.progress_bar.set_position(self.total_records);
    }

    /// ✅ Stop the bar and hand back the totals.
    pub fn finish(&self) -> DrainReport {
        self.progress_bar.finish();
        let elapsed = self.start_time.elapsed();
        let secs = elapsed.as_secs_f64();
        DrainReport {
            total_records: self.total_records,
            chunks: self.chunks,
            elapsed,
            throughput: if secs > 0.0 { self.total_records as f64 / secs } else { 0.0 },
        }
    }

    fn windowed_rate(&mut self) -> f64 {
        let now = Instant::now();
        let window = Duration::from_secs(5);
        while let Some(&(timestamp, _)) = self.rate_samples.front() {
            if now.duration_since(timestamp) > window {
                self.rate_samples.pop_front();
            } else {
                break;
            }
        }
        self.rate_samples.push_back((now, self.total_records));

        match self.rate_samples.front() {
            Some(&(oldest_time, oldest_records)) => {
                let elapsed = now.duration_since(oldest_time).as_secs_f64();
                if elapsed > 0.0 {
                    self.total_records.saturating_sub(oldest_records) as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }

    fn render(&self, rate: f64) {
        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);

        let of_target = if self.target > 0 {
            format!(
                "{} / {} ({:.1}%)",
                format_number(self.total_records),
                format_number(self.target),
                self.total_records as f64 / self.target as f64 * 100.0
            )
        } else {
            format!("{} records", format_number(self.total_records))
        };
        table.add_row(vec![
            Cell::new(format!("{} records/s", format_number(rate as u64))).set_alignment(CellAlignment::Right),
            Cell::new(of_target).set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} elapsed", format_duration(self.start_time.elapsed())))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} chunks", format_number(self.chunks))).set_alignment(CellAlignment::Right),
        ]);

        self.progress_bar
            .set_message(format!("source: {}\n{}", self.source_name, table));
    }
}
