// ai
//! 👷 Workers: background tasks that do work. duh.
//!
//! 🎬 *[an emitter ticks. a channel fills. an SSE body drains it, one event at a time.]*
//! *[the client closes the tab. the channel closes. the worker notices, and goes home.]*
//!
//! 🧠 Knowledge graph:
//! - [`Worker`]: anything that can be spawned and handed back as a `JoinHandle`.
//! - [`StreamEvent`]: what travels down the channel: a chunk, a completion, or a failure.
//! - [`stream_worker::StreamWorker`]: drives one `ChunkedStreamEmitter` into a bounded
//!   `async_channel`. The bound is the backpressure: a slow consumer slows the emitter.

use anyhow::Result;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::emitter::{Chunk, StreamSummary};
use crate::error::FeedError;

pub mod stream_worker;

pub use stream_worker::{StreamWorker, spawn_stream};

/// 👷 A background worker, that does work.
pub trait Worker {
    fn start(self) -> JoinHandle<Result<()>>;
}

/// 📨 One message from a stream session to whoever is listening.
///
/// Serialized with a `status` tag so consumers can switch on it:
/// `"streaming"` for chunks, then exactly one `"complete"` or `"failed"`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StreamEvent<E> {
    #[serde(rename = "streaming")]
    Chunk(Chunk<E>),
    Complete(StreamSummary),
    Failed { error: String, kind: &'static str },
}

impl<E> StreamEvent<E> {
    pub fn failed(error: &FeedError) -> Self {
        StreamEvent::Failed {
            error: error.to_string(),
            kind: error.kind(),
        }
    }

    /// 🏁 Is this the last event a session will send?
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Chunk(_))
    }
}
