//! Streaming re-framer.
//!
//! Consumes an upstream byte stream (or a buffered completion), decodes it
//! with the provider's [`StreamDecoder`] and emits OpenAI-shaped
//! `chat.completion.chunk` events. Every response ends with exactly one
//! `data: [DONE]` frame; an `error` event, when emitted, always precedes it.
//!
//! ```text
//! AwaitingHeader -> StreamingDeltas -> Finalizing -> Terminal
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use gateway_core::{
    describe_error_chain, ChatCompletion, ErrorBody, ErrorClass, GatewayError, StreamingChunk,
    Usage,
};
use gateway_providers::{ByteStream, DecodeOutcome, ProviderAdapter, StreamDecoder};
use serde_json::{json, Map, Value};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::images::{count_images_in_text, splice_images};
use crate::json_balance::might_be_complete_json;
use crate::sse::{data_frame, done_frame, error_frame, SseEvent, SseParser};

/// Message of the error emitted when an upstream stream produced nothing
pub const EMPTY_COMPLETION_MESSAGE: &str =
    "Response finished successfully but returned no content or tool calls";

/// Message of the error emitted when a buffered upstream event never completed
pub const TRUNCATED_STREAM_MESSAGE: &str = "Upstream stream ended in the middle of an event";

/// Upper bound for a single buffered upstream event
pub const MAX_PENDING_BYTES: usize = 64 * 1024 * 1024;

/// Re-framer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReframerState {
    /// No upstream bytes seen yet
    AwaitingHeader,
    /// Forwarding deltas
    StreamingDeltas,
    /// Upstream finished; terminal frames being produced
    Finalizing,
    /// `[DONE]` emitted; nothing more will be produced
    Terminal,
}

/// What the stream produced, for usage accounting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Image parts plus bare image URLs in the generated text
    pub image_count: usize,
    /// Last usage reported by the upstream
    pub usage: Option<Usage>,
    /// Last finish reason
    pub finish_reason: Option<String>,
    /// Whether any content, reasoning, tool call or image was forwarded
    pub produced_output: bool,
    /// Class of the error event, if one was emitted
    pub error: Option<ErrorClass>,
    /// Upstream HTTP status behind the error event, when known
    pub error_status: Option<u16>,
}

impl StreamSummary {
    /// Summary of a buffered completion
    #[must_use]
    pub fn from_completion(completion: &ChatCompletion) -> Self {
        Self {
            image_count: completion.images.len()
                + completion
                    .content
                    .as_deref()
                    .map_or(0, count_images_in_text),
            usage: completion.usage,
            finish_reason: completion.finish_reason.clone(),
            produced_output: completion.has_output(),
            error: None,
            error_status: None,
        }
    }
}

/// Frames produced by [`Reframer::into_sse_stream`] and its summary
pub struct ReframedStream {
    /// Outgoing SSE frames
    pub frames: BoxStream<'static, Bytes>,
    /// Resolves once the last frame has been produced
    pub summary: oneshot::Receiver<StreamSummary>,
}

/// Callback run once with the final summary of a stream
pub type CompletionHook = Box<dyn FnOnce(&StreamSummary) + Send>;

/// Incremental SSE re-framer for one response
pub struct Reframer {
    id: String,
    model: String,
    provider: String,
    created: i64,
    adapter: Arc<dyn ProviderAdapter>,
    decoder: Box<dyn StreamDecoder>,
    parser: SseParser,
    pending: String,
    pending_event: Option<String>,
    state: ReframerState,
    upstream_done: bool,
    produced_output: bool,
    text: String,
    image_parts: usize,
    usage: Option<Usage>,
    finish_reason: Option<String>,
    error: Option<ErrorClass>,
    error_status: Option<u16>,
    next_event_id: u64,
    on_complete: Option<CompletionHook>,
}

impl Reframer {
    /// Re-framer for a response from `adapter`
    pub fn new(
        adapter: Arc<dyn ProviderAdapter>,
        id: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            provider: adapter.provider_id().to_string(),
            created: chrono::Utc::now().timestamp(),
            decoder: adapter.stream_decoder(),
            adapter,
            parser: SseParser::new(),
            pending: String::new(),
            pending_event: None,
            state: ReframerState::AwaitingHeader,
            upstream_done: false,
            produced_output: false,
            text: String::new(),
            image_parts: 0,
            usage: None,
            finish_reason: None,
            error: None,
            error_status: None,
            next_event_id: 0,
            on_complete: None,
        }
    }

    /// Run `hook` with the final summary once the last frame is produced.
    ///
    /// The hook does not run if the stream is dropped before it ends.
    #[must_use]
    pub fn on_complete(mut self, hook: impl FnOnce(&StreamSummary) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(hook));
        self
    }

    /// Override the `created` timestamp
    #[must_use]
    pub fn with_created(mut self, created: i64) -> Self {
        self.created = created;
        self
    }

    /// Current state
    pub fn state(&self) -> ReframerState {
        self.state
    }

    /// Whether `[DONE]` has been emitted
    pub fn is_terminal(&self) -> bool {
        self.state == ReframerState::Terminal
    }

    /// Usage accounting so far
    pub fn summary(&self) -> StreamSummary {
        StreamSummary {
            image_count: self.image_parts + count_images_in_text(&self.text),
            usage: self.usage,
            finish_reason: self.finish_reason.clone(),
            produced_output: self.produced_output,
            error: self.error,
            error_status: self.error_status,
        }
    }

    /// Feed upstream bytes; returns the frames to forward
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        if self.is_terminal() {
            return out;
        }
        if self.state == ReframerState::AwaitingHeader {
            self.state = ReframerState::StreamingDeltas;
        }
        for event in self.parser.push(bytes) {
            self.handle_event(event, &mut out);
            if self.is_terminal() {
                break;
            }
        }
        out
    }

    /// Upstream ended; returns the closing frames
    pub fn finish(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        if self.is_terminal() {
            return out;
        }
        if let Some(event) = self.parser.finish() {
            self.handle_event(event, &mut out);
            if self.is_terminal() {
                return out;
            }
        }
        self.state = ReframerState::Finalizing;

        // Leftovers are reported even after `[DONE]`
        if !self.pending.trim().is_empty() {
            warn!(
                provider = %self.provider,
                pending_bytes = self.pending.len(),
                "Upstream stream truncated mid-event"
            );
            self.truncated(&mut out);
            return out;
        }

        if !self.produced_output {
            warn!(provider = %self.provider, model = %self.model, "Upstream returned an empty completion");
            self.terminate(
                ErrorBody::new(ErrorClass::UpstreamError, EMPTY_COMPLETION_MESSAGE),
                ErrorClass::UpstreamError,
                None,
                &mut out,
            );
            return out;
        }

        let id = self.next_event_id();
        out.push(done_frame(id));
        self.state = ReframerState::Terminal;
        out
    }

    /// Surface a failure in-stream; returns the error and `[DONE]` frames
    pub fn fail(&mut self, error: &GatewayError) -> Vec<String> {
        let mut out = Vec::new();
        self.fail_into(error, &mut out);
        out
    }

    /// Emit a buffered completion as a stream
    pub fn synthesize(&mut self, completion: ChatCompletion) -> Vec<String> {
        let mut out = Vec::new();
        if self.is_terminal() {
            return out;
        }
        self.state = ReframerState::StreamingDeltas;
        for chunk in completion.into_chunks() {
            self.emit_chunk(chunk, &mut out);
        }
        self.upstream_done = true;
        out.extend(self.finish());
        out
    }

    /// Drive the re-framer over an upstream body.
    ///
    /// A gap longer than `idle_timeout` between upstream chunks ends the
    /// stream with an `upstream_error` event. Dropping the returned stream
    /// drops the upstream body with it.
    pub fn into_sse_stream(mut self, body: ByteStream, idle_timeout: Duration) -> ReframedStream {
        let (tx, rx) = oneshot::channel();
        let frames = async_stream::stream! {
            let mut body = body;
            loop {
                match tokio::time::timeout(idle_timeout, body.next()).await {
                    Ok(Some(Ok(bytes))) => {
                        for frame in self.push_bytes(&bytes) {
                            yield Bytes::from(frame);
                        }
                        if self.is_terminal() {
                            break;
                        }
                    }
                    Ok(Some(Err(e))) => {
                        warn!(provider = %self.provider, error = %describe_error_chain(&e), "Upstream stream failed");
                        for frame in self.fail(&e) {
                            yield Bytes::from(frame);
                        }
                        break;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        let e = GatewayError::timeout(self.provider.clone(), idle_timeout);
                        warn!(provider = %self.provider, "Upstream stream went idle");
                        for frame in self.fail(&e) {
                            yield Bytes::from(frame);
                        }
                        break;
                    }
                }
            }
            for frame in self.finish() {
                yield Bytes::from(frame);
            }
            self.complete(tx);
        };
        ReframedStream {
            frames: frames.boxed(),
            summary: rx,
        }
    }

    /// Stream for a buffered completion
    pub fn into_synthesized_stream(mut self, completion: ChatCompletion) -> ReframedStream {
        let (tx, rx) = oneshot::channel();
        let frames = async_stream::stream! {
            for frame in self.synthesize(completion) {
                yield Bytes::from(frame);
            }
            self.complete(tx);
        };
        ReframedStream {
            frames: frames.boxed(),
            summary: rx,
        }
    }

    fn complete(&mut self, tx: oneshot::Sender<StreamSummary>) {
        let summary = self.summary();
        if let Some(hook) = self.on_complete.take() {
            hook(&summary);
        }
        let _ = tx.send(summary);
    }

    fn handle_event(&mut self, event: SseEvent, out: &mut Vec<String>) {
        if self.upstream_done {
            return;
        }
        if event.is_done() {
            self.upstream_done = true;
            return;
        }
        if self.pending.is_empty() {
            self.pending = event.data;
            self.pending_event = event.event;
        } else {
            // A self-contained event after an unfinished one: the buffered
            // fragment can never complete
            let standalone = might_be_complete_json(&event.data);
            self.pending.push_str(&event.data);
            if standalone && !might_be_complete_json(&self.pending) {
                warn!(
                    provider = %self.provider,
                    pending_bytes = self.pending.len(),
                    "Buffered upstream event never completed"
                );
                self.truncated(out);
                return;
            }
        }

        let trimmed = self.pending.trim_start();
        if trimmed.is_empty() {
            self.pending.clear();
            return;
        }
        if !trimmed.starts_with(['{', '[']) {
            debug!(provider = %self.provider, "Dropping non-JSON stream event");
            self.pending.clear();
            self.pending_event = None;
            return;
        }
        if !might_be_complete_json(&self.pending) {
            if self.pending.len() > MAX_PENDING_BYTES {
                let e = GatewayError::streaming(format!(
                    "upstream event from {} exceeded {MAX_PENDING_BYTES} bytes",
                    self.provider
                ));
                self.fail_into(&e, out);
            }
            return;
        }

        let data = std::mem::take(&mut self.pending);
        let event_name = self.pending_event.take();
        let mut value: Value = match serde_json::from_str(&data) {
            Ok(value) => value,
            Err(e) => {
                warn!(provider = %self.provider, error = %e, "Malformed upstream stream event");
                let e = GatewayError::streaming(format!(
                    "malformed event from {}: {e}",
                    self.provider
                ));
                self.fail_into(&e, out);
                return;
            }
        };
        drop(data);

        let images = self.adapter.extract_images(&mut value);
        match self.decoder.decode(event_name.as_deref(), value) {
            DecodeOutcome::Chunks(mut chunks) => {
                if !images.is_empty() {
                    match chunks.first_mut() {
                        Some(first) => first.images.extend(images),
                        None => chunks.push(StreamingChunk {
                            images,
                            ..StreamingChunk::default()
                        }),
                    }
                }
                for chunk in chunks {
                    self.emit_chunk(chunk, out);
                }
            }
            DecodeOutcome::Done => {
                self.emit_chunk(
                    StreamingChunk {
                        images,
                        ..StreamingChunk::default()
                    },
                    out,
                );
                self.upstream_done = true;
            }
            DecodeOutcome::Error(e) => {
                warn!(provider = %self.provider, class = %e.class(), "Upstream reported an error mid-stream");
                self.fail_into(&e, out);
            }
        }
    }

    fn emit_chunk(&mut self, mut chunk: StreamingChunk, out: &mut Vec<String>) {
        if chunk.is_empty() {
            return;
        }
        if chunk.has_output() {
            self.produced_output = true;
        }
        if let Some(content) = &chunk.content {
            self.text.push_str(content);
        }
        self.image_parts += chunk.images.len();
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
        if chunk.finish_reason.is_some() {
            self.finish_reason.clone_from(&chunk.finish_reason);
        }

        let images = std::mem::take(&mut chunk.images);
        let json = self.chunk_json(chunk).to_string();
        let id = self.next_event_id();
        let frame = if images.is_empty() {
            data_frame(id, &json)
        } else {
            match splice_images(&json, "delta", &images) {
                Some(spliced) => data_frame(id, &spliced),
                None => data_frame(id, &json),
            }
        };
        out.push(frame);
    }

    fn chunk_json(&self, chunk: StreamingChunk) -> Value {
        let mut delta = Map::new();
        if let Some(role) = chunk.role {
            delta.insert("role".into(), json!(role.as_str()));
        }
        if let Some(content) = chunk.content {
            delta.insert("content".into(), Value::String(content));
        }
        if let Some(reasoning) = chunk.reasoning {
            delta.insert("reasoning".into(), Value::String(reasoning));
        }
        if !chunk.tool_calls.is_empty() {
            delta.insert("tool_calls".into(), json!(chunk.tool_calls));
        }

        let mut value = json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": Value::Object(delta),
                "finish_reason": chunk.finish_reason,
            }],
        });
        if let Some(usage) = chunk.usage {
            value["usage"] = json!(usage);
        }
        value
    }

    fn next_event_id(&mut self) -> u64 {
        self.next_event_id += 1;
        self.next_event_id
    }

    fn fail_into(&mut self, error: &GatewayError, out: &mut Vec<String>) {
        self.terminate(error.to_body(), error.class(), error.upstream_status(), out);
    }

    fn truncated(&mut self, out: &mut Vec<String>) {
        self.pending.clear();
        self.terminate(
            ErrorBody::new(ErrorClass::UpstreamError, TRUNCATED_STREAM_MESSAGE),
            ErrorClass::UpstreamError,
            None,
            out,
        );
    }

    fn terminate(
        &mut self,
        body: ErrorBody,
        class: ErrorClass,
        status: Option<u16>,
        out: &mut Vec<String>,
    ) {
        if self.is_terminal() {
            return;
        }
        self.error = Some(class);
        self.error_status = status;
        let id = self.next_event_id();
        out.push(error_frame(id, &body));
        let id = self.next_event_id();
        out.push(done_frame(id));
        self.state = ReframerState::Terminal;
    }
}
