//! Incremental decoders for streaming chat-completion bodies.
//!
//! Providers do not align their JSON framing with transport chunk
//! boundaries, so both decoders buffer across `feed` calls and favor
//! best-effort text recovery over strict protocol compliance: a malformed
//! remainder is counted as a diagnostic, never raised to the caller.

use serde_json::Value;

/// Turns raw response-body chunks into text deltas. One instance per
/// in-flight request; chunks must be fed in arrival order.
pub trait StreamDecoder {
    fn feed(&mut self, chunk: &[u8]) -> Vec<String>;

    /// Drains trailing buffered-but-complete data. Malformed fragments are
    /// logged to the diagnostic counter and dropped.
    fn finish(&mut self) -> Vec<String>;

    /// How many complete fragments failed to parse. Purely diagnostic.
    fn malformed_events(&self) -> u64;
}

/// Reassembles UTF-8 sequences split across chunk boundaries. Invalid
/// interior bytes degrade to the replacement character.
#[derive(Debug, Default)]
struct Utf8Carry {
    tail: Vec<u8>,
}

impl Utf8Carry {
    fn decode(&mut self, chunk: &[u8], out: &mut String) {
        let mut bytes = std::mem::take(&mut self.tail);
        bytes.extend_from_slice(chunk);
        let mut rest: &[u8] = &bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    return;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(std::str::from_utf8(&rest[..valid]).unwrap_or_default());
                    rest = &rest[valid..];
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[bad..];
                        }
                        None => {
                            // Incomplete sequence at the end; hold it for
                            // the next chunk.
                            self.tail = rest.to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Decoder for OpenAI-compatible SSE bodies: newline-delimited
/// `data: <json>` events with a literal `[DONE]` terminator. Used by the
/// OpenAI, DeepSeek, Tongyi, and custom provider paths.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: String,
    carry: Utf8Carry,
    done: bool,
    malformed: u64,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    fn handle_line(&mut self, line: &str, deltas: &mut Vec<String>) {
        let Some(payload) = line.strip_prefix("data: ") else {
            return;
        };
        let payload = payload.trim();
        if payload == "[DONE]" {
            self.done = true;
            return;
        }
        match serde_json::from_str::<Value>(payload) {
            Ok(event) => {
                if let Some(text) = choice_delta_text(&event) {
                    deltas.push(text.to_string());
                }
            }
            // A complete line that fails to parse is genuinely malformed
            // data, not a split fragment; the newline buffering already
            // covers that case.
            Err(_) => self.malformed += 1,
        }
    }
}

impl StreamDecoder for SseDecoder {
    fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut deltas = Vec::new();
        if self.done {
            return deltas;
        }
        self.carry.decode(chunk, &mut self.buf);
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            self.handle_line(line.trim(), &mut deltas);
            if self.done {
                break;
            }
        }
        deltas
    }

    fn finish(&mut self) -> Vec<String> {
        let mut deltas = Vec::new();
        if !self.done {
            let line = std::mem::take(&mut self.buf);
            let line = line.trim();
            if !line.is_empty() {
                self.handle_line(line, &mut deltas);
            }
        }
        self.buf.clear();
        deltas
    }

    fn malformed_events(&self) -> u64 {
        self.malformed
    }
}

/// Delta text for one SSE event: `choices[0].delta.content`, falling back
/// to `choices[0].delta.reasoning_content`. Empty strings fall through.
fn choice_delta_text(event: &Value) -> Option<&str> {
    let delta = event.get("choices")?.as_array()?.first()?.get("delta")?;
    delta
        .get("content")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .or_else(|| {
            delta
                .get("reasoning_content")
                .and_then(Value::as_str)
                .filter(|text| !text.is_empty())
        })
}

/// Decoder for the Gemini `streamGenerateContent` body: nominally one
/// top-level JSON array of response objects, but chunks may land mid-array
/// or as newline-delimited objects. Each feed first tries a repaired
/// whole-buffer parse, then falls back to object-per-line recovery.
#[derive(Debug, Default)]
pub struct GeminiDecoder {
    buf: String,
    carry: Utf8Carry,
    malformed: u64,
}

impl GeminiDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn drain_whole_buffer(&mut self, deltas: &mut Vec<String>) -> bool {
        let repaired = repair_as_array(self.buf.trim());
        match serde_json::from_str::<Value>(&repaired) {
            Ok(Value::Array(items)) => {
                for item in &items {
                    if let Some(text) = candidate_text(item) {
                        deltas.push(text.to_string());
                    }
                }
                self.buf.clear();
                true
            }
            // Parsed but not an array: likely incomplete, wait for more.
            Ok(_) => true,
            Err(_) => false,
        }
    }

    fn drain_lines(&mut self, deltas: &mut Vec<String>) {
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(item) => {
                    if let Some(text) = candidate_text(&item) {
                        deltas.push(text.to_string());
                    }
                }
                Err(_) => {
                    // An incomplete fragment spanning a future chunk; put
                    // it back and wait for more bytes.
                    self.buf.insert_str(0, line);
                    break;
                }
            }
        }
    }
}

impl StreamDecoder for GeminiDecoder {
    fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.decode(chunk, &mut self.buf);
        let mut deltas = Vec::new();
        if self.buf.trim().is_empty() {
            return deltas;
        }
        if !self.drain_whole_buffer(&mut deltas) {
            self.drain_lines(&mut deltas);
        }
        deltas
    }

    fn finish(&mut self) -> Vec<String> {
        let mut deltas = Vec::new();
        let remainder = std::mem::take(&mut self.buf);
        let remainder = remainder.trim();
        if remainder.is_empty() {
            return deltas;
        }
        let repaired = repair_as_array(remainder);
        match serde_json::from_str::<Value>(&repaired) {
            Ok(Value::Array(items)) => {
                for item in &items {
                    if let Some(text) = candidate_text(item) {
                        deltas.push(text.to_string());
                    }
                }
            }
            _ => match serde_json::from_str::<Value>(remainder) {
                Ok(item) => {
                    if let Some(text) = candidate_text(&item) {
                        deltas.push(text.to_string());
                    }
                }
                Err(_) => self.malformed += 1,
            },
        }
        deltas
    }

    fn malformed_events(&self) -> u64 {
        self.malformed
    }
}

/// Best-effort bracket repair: synthesize an array form by patching the
/// missing `[`/`]` and trimming a single stray leading/trailing comma.
/// Known not to handle a chunk split inside a string literal.
fn repair_as_array(cleaned: &str) -> String {
    if cleaned.starts_with('[') && cleaned.ends_with(']') {
        cleaned.to_string()
    } else if cleaned.starts_with('[') {
        let body = cleaned.strip_suffix(',').unwrap_or(cleaned).trim_end();
        format!("{body}]")
    } else if cleaned.ends_with(']') {
        let body = cleaned.strip_prefix(',').unwrap_or(cleaned).trim_start();
        format!("[{body}")
    } else {
        let body = cleaned.strip_suffix(',').unwrap_or(cleaned);
        let body = body.strip_prefix(',').unwrap_or(body).trim();
        format!("[{body}]")
    }
}

/// Delta text for one Gemini response object:
/// `candidates[0].content.parts[0].text`. Empty strings fall through.
fn candidate_text(item: &Value) -> Option<&str> {
    item.get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?
        .first()?
        .get("text")?
        .as_str()
        .filter(|text| !text.is_empty())
}
