//! # Gateway Streaming
//!
//! SSE re-framing pipeline for the LLM routing gateway.
//!
//! - Incremental SSE parsing and outbound framing
//! - A cheap bracket-balance check for buffered JSON fragments
//! - Image splicing straight into serialized deltas, and image counting
//! - The re-framer state machine guaranteeing a single terminal marker

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod images;
pub mod json_balance;
pub mod reframer;
pub mod sse;

pub use images::{count_images_in_text, count_message_images, find_object_end, splice_images};
pub use json_balance::might_be_complete_json;
pub use reframer::{
    ReframedStream, Reframer, ReframerState, StreamSummary, EMPTY_COMPLETION_MESSAGE,
    TRUNCATED_STREAM_MESSAGE,
};
pub use sse::{data_frame, done_frame, error_frame, is_done_frame, SseEvent, SseParser, DONE_DATA};
