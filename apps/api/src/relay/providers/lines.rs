use std::collections::VecDeque;

use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream};
use futures::StreamExt;

use crate::relay::error::RelayError;

/// Longest partial line accepted from an upstream before giving up (1 MB).
const MAX_PENDING_LINE_BYTES: usize = 1024 * 1024;

/// Splits an upstream byte stream into text lines.
///
/// Bytes are buffered until a `\n` arrives, so a multi-byte UTF-8 character
/// split across two network chunks is decoded intact. A trailing `\r` is
/// stripped from every line.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every line it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, RelayError> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            lines.push(decode_line(&self.pending[start..end]));
            start = end + 1;
        }
        self.pending.drain(..start);

        if self.pending.len() > MAX_PENDING_LINE_BYTES {
            return Err(RelayError::transport(format!(
                "upstream sent more than {MAX_PENDING_LINE_BYTES} bytes without a line break"
            )));
        }
        Ok(lines)
    }

    /// Returns the unterminated remainder once the upstream has closed.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode_line(&rest))
    }
}

/// Yields every line of `body` in order, then the unterminated tail once the
/// body ends. A transport failure is yielded once and ends the stream.
pub fn line_stream<S>(body: S) -> BoxStream<'static, Result<String, RelayError>>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let state = LineStream {
        body: body.boxed(),
        buffer: LineBuffer::new(),
        ready: VecDeque::new(),
        closed: false,
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.ready.pop_front() {
                return Some((Ok(line), state));
            }
            if state.closed {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => match state.buffer.push(&chunk) {
                    Ok(lines) => state.ready.extend(lines),
                    Err(e) => {
                        state.closed = true;
                        return Some((Err(e), state));
                    }
                },
                Some(Err(e)) => {
                    state.closed = true;
                    return Some((Err(e.into()), state));
                }
                None => {
                    state.closed = true;
                    state.ready.extend(state.buffer.finish());
                }
            }
        }
    })
    .boxed()
}

struct LineStream {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    buffer: LineBuffer,
    ready: VecDeque<String>,
    closed: bool,
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
