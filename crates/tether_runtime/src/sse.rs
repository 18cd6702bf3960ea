use std::collections::VecDeque;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;

use crate::errors::EngineError;

/// Response body as delivered by the transport, chunk by chunk.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, EngineError>>;

/// One server-sent event: the recognized fields of the lines preceding a blank line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    pub event: Option<String>,
    pub id: Option<String>,
    /// `data:` payloads, trimmed and joined with `\n`. Absent for keep-alive frames.
    pub data: Option<String>,
}

#[derive(Debug, Default)]
struct PendingFrame {
    seen_line: bool,
    event: Option<String>,
    id: Option<String>,
    data_lines: Vec<String>,
    invalid: Option<String>,
}

impl PendingFrame {
    fn push_bytes(&mut self, line: &[u8]) {
        match std::str::from_utf8(line) {
            Ok(line) => self.push_line(line),
            Err(err) => {
                self.seen_line = true;
                self.invalid
                    .get_or_insert_with(|| format!("frame is not valid UTF-8: {err}"));
            }
        }
    }

    fn push_line(&mut self, line: &str) {
        self.seen_line = true;
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.trim()),
            None => (line, ""),
        };
        match field {
            "data" => self.data_lines.push(value.to_owned()),
            "event" => self.event = Some(value.to_owned()),
            "id" => self.id = Some(value.to_owned()),
            _ => {}
        }
    }

    fn take_frame(&mut self) -> Option<Result<Frame, EngineError>> {
        if !self.seen_line {
            return None;
        }
        let pending = std::mem::take(self);
        if let Some(reason) = pending.invalid {
            return Some(Err(EngineError::Protocol(reason)));
        }
        let data = if pending.data_lines.is_empty() {
            None
        } else {
            Some(pending.data_lines.join("\n"))
        };
        Some(Ok(Frame {
            event: pending.event,
            id: pending.id,
            data,
        }))
    }
}

/// Incremental SSE frame decoder.
///
/// Bytes are buffered until a full line is available, so a chunk boundary inside a
/// multi-byte character never reaches the UTF-8 check. A frame holding a line that is
/// not UTF-8 decodes to a `Protocol` error in its place; later frames are unaffected.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    pending: PendingFrame,
}

impl FrameDecoder {
    /// Feed one chunk and drain every frame it completes, in arrival order.
    /// Allocation: one String per completed line. Complexity: O(chunk + carried bytes).
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<Frame, EngineError>> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut consumed = 0;

        while let Some(offset) = self.buffer[consumed..].iter().position(|b| *b == b'\n') {
            let end = consumed + offset;
            let mut line = &self.buffer[consumed..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            consumed = end + 1;

            if line.is_empty() {
                if let Some(frame) = self.pending.take_frame() {
                    frames.push(frame);
                }
            } else {
                self.pending.push_bytes(line);
            }
        }

        self.buffer.drain(..consumed);
        frames
    }

    /// Close the decoder at end of stream. Leftover bytes or an unterminated frame
    /// mean the stream was cut short.
    pub fn finish(&mut self) -> Result<(), EngineError> {
        let leftover = std::mem::take(&mut self.buffer);
        let unterminated = std::mem::take(&mut self.pending).seen_line;
        if unterminated || !leftover.iter().all(u8::is_ascii_whitespace) {
            return Err(EngineError::Protocol(format!(
                "stream truncated: {} byte(s) after the last complete frame",
                leftover.len()
            )));
        }
        Ok(())
    }
}

/// Pull-based frame sequence over a response body. Finite and not restartable:
/// once it returns `None` it keeps returning `None`.
pub struct FrameReader {
    body: Option<ByteStream>,
    decoder: FrameDecoder,
    ready: VecDeque<Result<Frame, EngineError>>,
}

impl FrameReader {
    pub fn new(body: ByteStream) -> Self {
        Self {
            body: Some(body),
            decoder: FrameDecoder::default(),
            ready: VecDeque::new(),
        }
    }

    /// Suspend until the next complete frame is available.
    /// A frame that is not UTF-8 is yielded as `Err` and reading goes on. A transport
    /// failure or a truncated tail is yielded once as `Err`, then the reader is
    /// exhausted.
    pub async fn next_frame(&mut self) -> Option<Result<Frame, EngineError>> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Some(frame);
            }
            let body = self.body.as_mut()?;
            match body.next().await {
                Some(Ok(chunk)) => self.ready.extend(self.decoder.feed(&chunk)),
                Some(Err(err)) => {
                    self.body = None;
                    return Some(Err(err));
                }
                None => {
                    self.body = None;
                    if let Err(err) = self.decoder.finish() {
                        return Some(Err(err));
                    }
                }
            }
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.body.is_none() && self.ready.is_empty()
    }
}

impl std::fmt::Debug for FrameReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReader")
            .field("open", &self.body.is_some())
            .field("ready", &self.ready.len())
            .finish()
    }
}
