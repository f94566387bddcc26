// ai
//! 🔌 Adapters: where feedloop meets the outside world and has to speak its language.
//!
//! 🎬 *[a streaming framework asks for partitions and offsets. a browser asks for
//! server-sent events. the emitter shrugs: records are records.]*
//!
//! - [`partition`]: the streaming framework's contract: schema, partitions, and
//!   `read(start_offset) -> (rows, next_offset)`, with the cursor as the offset.
//! - [`http`]: the axum router: status, polling, and SSE streams for both feeds.

pub mod http;
pub mod partition;
