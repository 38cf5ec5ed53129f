//! Incremental parser for completion event streams
//!
//! Completion APIs stream newline-delimited lines of the form
//! `data: {json}` and close with `data: [DONE]`. [`CompletionStream`]
//! turns the raw body into a lazy stream of text fragments.

use futures::stream::{FusedStream, Stream, StreamExt};
use serde::Deserialize;
use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Lazy sequence of content fragments decoded from an event-stream body
///
/// Fragments come out in arrival order. The sequence ends at the `[DONE]`
/// sentinel, at the end of the body, or at the first read error, and never
/// yields again afterwards. The underlying body is dropped as soon as the
/// sequence ends, or when the parser itself is dropped.
pub struct CompletionStream<S> {
    inner: Option<Pin<Box<S>>>,
    // bytes of a UTF-8 sequence split across reads
    carry: Vec<u8>,
    line_buf: String,
    pending: VecDeque<String>,
    finished: bool,
    fragments: usize,
}

impl<S> CompletionStream<S> {
    fn release(&mut self, reason: &str) {
        if self.inner.take().is_some() {
            tracing::debug!(
                fragments = self.fragments,
                "Releasing completion stream ({})",
                reason
            );
        }
    }

    fn finish(&mut self, reason: &str) {
        self.finished = true;
        self.release(reason);
    }

    fn decode(&mut self, bytes: &[u8]) {
        self.carry.extend_from_slice(bytes);
        loop {
            let (valid, invalid_len) = match std::str::from_utf8(&self.carry) {
                Ok(_) => (self.carry.len(), None),
                Err(e) => (e.valid_up_to(), e.error_len()),
            };
            self.line_buf
                .push_str(&String::from_utf8_lossy(&self.carry[..valid]));
            match invalid_len {
                Some(len) => {
                    self.line_buf.push(char::REPLACEMENT_CHARACTER);
                    self.carry.drain(..valid + len);
                }
                None => {
                    self.carry.drain(..valid);
                    break;
                }
            }
        }
    }

    /// Process every complete line; returns true once the sentinel is seen
    fn drain_lines(&mut self) -> bool {
        while let Some(pos) = self.line_buf.find('\n') {
            let line: String = self.line_buf.drain(..=pos).collect();
            if self.process_line(&line) {
                return true;
            }
        }
        false
    }

    fn flush_tail(&mut self) {
        if !self.carry.is_empty() {
            let tail = String::from_utf8_lossy(&self.carry).into_owned();
            self.line_buf.push_str(&tail);
            self.carry.clear();
        }
        self.drain_lines();
        if !self.line_buf.is_empty() {
            let line = std::mem::take(&mut self.line_buf);
            self.process_line(&line);
        }
    }

    fn process_line(&mut self, raw: &str) -> bool {
        let line = raw.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            return false;
        }

        let Some(data) = line.strip_prefix(DATA_PREFIX) else {
            tracing::debug!("Ignoring non-data line in stream: {}", line);
            return false;
        };

        if data.trim() == DONE_SENTINEL {
            tracing::debug!("Received stream sentinel");
            return true;
        }

        match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => {
                let content = chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta)
                    .and_then(|d| d.content)
                    .unwrap_or_default();
                if !content.is_empty() {
                    self.fragments += 1;
                    if self.fragments <= 2 || self.fragments % 20 == 0 {
                        tracing::debug!(
                            "Stream fragment {}: {} chars",
                            self.fragments,
                            content.chars().count()
                        );
                    }
                    self.pending.push_back(content);
                }
            }
            Err(e) => {
                tracing::warn!("Skipping malformed stream payload ({}): {}", e, data);
            }
        }
        false
    }
}

impl<S, B, E> CompletionStream<S>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    /// Wrap a byte stream
    pub fn new(inner: S) -> Self {
        Self {
            inner: Some(Box::pin(inner)),
            carry: Vec::new(),
            line_buf: String::new(),
            pending: VecDeque::new(),
            finished: false,
            fragments: 0,
        }
    }
}

impl<S, B, E> Stream for CompletionStream<S>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        let this = self.get_mut();
        loop {
            if let Some(fragment) = this.pending.pop_front() {
                return Poll::Ready(Some(fragment));
            }
            if this.finished {
                return Poll::Ready(None);
            }
            let Some(inner) = this.inner.as_mut() else {
                this.finished = true;
                continue;
            };

            match inner.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(chunk))) => {
                    this.decode(chunk.as_ref());
                    if this.drain_lines() {
                        this.finish("sentinel");
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    tracing::warn!("Error reading completion stream: {}", e);
                    this.finish("read error");
                }
                Poll::Ready(None) => {
                    this.flush_tail();
                    this.finish("end of body");
                }
            }
        }
    }
}

impl<S, B, E> FusedStream for CompletionStream<S>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    fn is_terminated(&self) -> bool {
        self.finished && self.pending.is_empty()
    }
}

impl<S> Drop for CompletionStream<S> {
    fn drop(&mut self) {
        self.release("dropped");
    }
}

/// Parse a completion event stream into content fragments
pub fn parse_completion_stream<S, B, E>(stream: S) -> CompletionStream<S>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    CompletionStream::new(stream)
}

/// Collect every fragment of a completion stream into one string
///
/// Whatever was received before an early end is returned.
pub async fn read_stream_to_completion<S, B, E>(stream: S) -> String
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    parse_completion_stream(stream)
        .fold(String::new(), |mut acc, fragment| async move {
            acc.push_str(&fragment);
            acc
        })
        .await
}
