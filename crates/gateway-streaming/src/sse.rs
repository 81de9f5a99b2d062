//! Server-sent event parsing and framing.

use gateway_core::ErrorBody;

/// Literal data payload of the terminal marker
pub const DONE_DATA: &str = "[DONE]";

/// One parsed event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field
    pub event: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
    /// `id:` field
    pub id: Option<String>,
}

impl SseEvent {
    /// Whether the event is the `[DONE]` marker
    pub fn is_done(&self) -> bool {
        self.data.trim() == DONE_DATA
    }
}

/// Incremental parser; feed arbitrary byte slices, get complete events.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    // Bytes of `buffer` already known to contain no newline
    scanned: usize,
    current: SseEvent,
    has_fields: bool,
    has_data: bool,
}

impl SseParser {
    /// Empty parser
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume bytes and return every event completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        let mut start = 0;

        while let Some(offset) = self.buffer[start + self.scanned..]
            .iter()
            .position(|&b| b == b'\n')
        {
            let end = start + self.scanned + offset;
            let mut line = &self.buffer[start..end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            let line = String::from_utf8_lossy(line).into_owned();
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
            start = end + 1;
            self.scanned = 0;
        }

        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        events
    }

    /// Flush a trailing event that was not followed by a blank line
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.scanned = 0;
            let line = String::from_utf8_lossy(&rest);
            let line = line.trim_end_matches('\r').to_string();
            if let Some(event) = self.process_line(&line) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    /// Bytes held back waiting for a newline
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => {
                if self.has_data {
                    self.current.data.push('\n');
                }
                self.current.data.push_str(value);
                self.has_data = true;
                self.has_fields = true;
            }
            "event" => {
                self.current.event = Some(value.to_string());
                self.has_fields = true;
            }
            "id" => {
                self.current.id = Some(value.to_string());
                self.has_fields = true;
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if !self.has_fields {
            return None;
        }
        self.has_fields = false;
        self.has_data = false;
        Some(std::mem::take(&mut self.current))
    }
}

/// Frame a data payload as event `id`
#[must_use]
pub fn data_frame(id: u64, data: &str) -> String {
    let mut out = String::with_capacity(data.len() + 32);
    push_id(&mut out, id);
    push_data_lines(&mut out, data);
    out.push('\n');
    out
}

/// Frame an error body as an `error` event
#[must_use]
pub fn error_frame(id: u64, body: &ErrorBody) -> String {
    let json = serde_json::to_string(body).unwrap_or_else(|_| {
        r#"{"error":{"message":"internal error","type":"gateway_error","code":"gateway_error","param":null,"responseText":null}}"#
            .to_string()
    });
    let mut out = String::with_capacity(json.len() + 48);
    out.push_str("event: error\n");
    push_id(&mut out, id);
    push_data_lines(&mut out, &json);
    out.push('\n');
    out
}

/// Terminal `data: [DONE]` frame
#[must_use]
pub fn done_frame(id: u64) -> String {
    data_frame(id, DONE_DATA)
}

/// Whether `frame` is the terminal marker
#[must_use]
pub fn is_done_frame(frame: &str) -> bool {
    frame.ends_with("data: [DONE]\n\n")
}

fn push_id(out: &mut String, id: u64) {
    out.push_str("id: ");
    out.push_str(&id.to_string());
    out.push('\n');
}

fn push_data_lines(out: &mut String, data: &str) {
    for line in data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
}
