//! Server-sent events framing for streamed completions.
//!
//! Turns a raw `reqwest` byte stream into the payloads of its `data:` lines.
//! Bytes are buffered until a full line is available, so a multi-byte
//! character split across network chunks is decoded intact.

use bytes::Bytes;
use futures::stream::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::ProviderError;

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Stream adapter yielding one item per SSE `data:` line.
///
/// Ends on `data: [DONE]` or when the body ends.
pub struct SseDataStream {
    inner: ByteStream,
    buffer: Vec<u8>,
    finished: bool,
}

impl SseDataStream {
    pub fn new(byte_stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            buffer: Vec::new(),
            finished: false,
        }
    }
}

impl Stream for SseDataStream {
    type Item = Result<String, ProviderError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        loop {
            match next_data_line(&mut this.buffer) {
                Some(Ok(DataLine::Done)) => {
                    this.finished = true;
                    return Poll::Ready(None);
                }
                Some(Ok(DataLine::Payload(data))) => return Poll::Ready(Some(Ok(data))),
                Some(Err(e)) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                None => {}
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.buffer.extend_from_slice(&bytes),
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(ProviderError::Stream(e.to_string()))));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    // A final event may arrive without a trailing newline
                    if !this.buffer.is_empty() {
                        this.buffer.push(b'\n');
                        if let Some(Ok(DataLine::Payload(data))) = next_data_line(&mut this.buffer) {
                            return Poll::Ready(Some(Ok(data)));
                        }
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

enum DataLine {
    Payload(String),
    Done,
}

/// Pop complete lines off the buffer until one is a `data:` line.
fn next_data_line(buffer: &mut Vec<u8>) -> Option<Result<DataLine, ProviderError>> {
    loop {
        let newline = buffer.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = buffer.drain(..=newline).collect();

        let line = match std::str::from_utf8(&line) {
            Ok(text) => text.trim(),
            Err(e) => {
                return Some(Err(ProviderError::Stream(format!(
                    "Invalid UTF-8 in stream: {}",
                    e
                ))))
            }
        };

        // Blank separators and event:/id:/retry: lines carry no payload
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() {
            continue;
        }
        if data == "[DONE]" {
            return Some(Ok(DataLine::Done));
        }
        return Some(Ok(DataLine::Payload(data.to_string())));
    }
}
