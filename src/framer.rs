use tokio::io::{AsyncRead, AsyncReadExt};

use crate::event::Event;

/// Scans a byte stream and emits exactly one complete top-level JSON value
/// string per [`JsonFramer::feed`]/[`JsonFramer::feedeof`] completion. Emitted
/// strings are the original bytes, unmodified, so the endpoint can re-parse
/// them with `serde_json` and report parse errors on its own terms.
///
/// The scanner only balances `{}`/`[]` and tracks string/escape context; it
/// does not validate JSON grammar. Malformed content is still surfaced as a
/// single emission, which the endpoint will fail to parse.
pub struct JsonFramer {
    pub event: Event<String>,
    state: State,
    stack: Vec<char>,
    buffer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Outside,
    InStructure,
    InString,
    Escape,
}

impl JsonFramer {
    pub fn new() -> Self {
        Self {
            event: Event::new(),
            state: State::Outside,
            stack: Vec::new(),
            buffer: String::new(),
        }
    }

    fn reset(&mut self) {
        self.state = State::Outside;
        self.stack.clear();
        self.buffer.clear();
    }

    /// Feeds a chunk of bytes (assumed valid UTF-8, as all JSON-RPC traffic
    /// here is) through the scanner, firing `event` for each complete
    /// top-level value found.
    pub fn feed(&mut self, data: &str) {
        for ch in data.chars() {
            self.buffer.push(ch);
            self.transition(ch);
        }
    }

    fn transition(&mut self, ch: char) {
        match self.state {
            State::Outside => {
                if ch == '{' || ch == '[' {
                    self.state = State::InStructure;
                    self.stack.push(ch);
                } else if !ch.is_whitespace() {
                    self.send();
                }
            }
            State::InStructure => {
                if ch == '"' {
                    self.state = State::InString;
                } else if ch == '{' || ch == '[' {
                    self.stack.push(ch);
                } else if ch == '}' || ch == ']' {
                    let send = match self.stack.pop() {
                        None => true,
                        Some(open) => {
                            let mismatched =
                                (open == '{' && ch != '}') || (open == '[' && ch != ']');
                            mismatched || self.stack.is_empty()
                        }
                    };
                    if send {
                        self.send();
                    }
                }
            }
            State::InString => {
                if ch == '"' {
                    self.state = State::InStructure;
                } else if ch == '\\' {
                    self.state = State::Escape;
                }
            }
            State::Escape => {
                self.state = State::InString;
            }
        }
    }

    fn send(&mut self) {
        let data = std::mem::take(&mut self.buffer);
        self.reset();
        if !data.trim().is_empty() {
            self.event.fire(data);
        }
    }

    /// Reads from `reader` in 8 KiB chunks until EOF, then flushes any
    /// trailing value via [`JsonFramer::feedeof`].
    pub async fn feedfile<R: AsyncRead + Unpin>(&mut self, mut reader: R) -> std::io::Result<()> {
        let mut chunk = [0u8; 8192];
        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            let text = String::from_utf8_lossy(&chunk[..n]);
            self.feed(&text);
        }
        self.feedeof();
        Ok(())
    }

    /// Flushes whatever value is currently buffered, even if unbalanced.
    pub fn feedeof(&mut self) {
        self.send();
    }
}

impl Default for JsonFramer {
    fn default() -> Self {
        Self::new()
    }
}
