//! Buffered server-sent-events line parsing.
//!
//! Splits a raw byte stream into the payloads of `data:` lines, handling the
//! case where one network packet carries several events or an event is split
//! across packets.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;

use crate::LlmError;

/// Stream adapter yielding the payload of each SSE `data:` line.
///
/// Empty lines and `:` comment lines are skipped, as is the `[DONE]`
/// sentinel some backends append.
pub struct SseDataStream<S> {
    inner: S,
    buffer: String,
    pending: VecDeque<String>,
    done: bool,
}

impl<S> SseDataStream<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            inner: stream,
            buffer: String::new(),
            pending: VecDeque::new(),
            done: false,
        }
    }

    fn drain_buffer(&mut self) {
        while let Some(newline_pos) = self.buffer.find('\n') {
            let line = self.buffer.drain(..=newline_pos).collect::<String>();
            let line = line.trim();

            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            if let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) {
                let data = data.trim();
                if data == "[DONE]" {
                    continue;
                }
                self.pending.push_back(data.to_string());
            }
        }
    }
}

impl<S> Stream for SseDataStream<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<String, LlmError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(data) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(data)));
            }
            if this.done {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.buffer.push_str(&String::from_utf8_lossy(&bytes));
                    this.drain_buffer();
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(LlmError::StreamError(e.to_string()))));
                }
                Poll::Ready(None) => {
                    // Flush a final unterminated data line, if any.
                    if !this.buffer.is_empty() {
                        this.buffer.push('\n');
                        this.drain_buffer();
                        this.buffer.clear();
                    }
                    this.done = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn chunks(parts: &[&str]) -> Vec<Result<Bytes, reqwest::Error>> {
        parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
            .collect()
    }

    async fn collect(parts: &[&str]) -> Vec<String> {
        SseDataStream::new(futures_util::stream::iter(chunks(parts)))
            .map(|r| r.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn parses_multiple_events_in_one_packet() {
        let got = collect(&["data: one\n\ndata: two\n\n"]).await;
        assert_eq!(got, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn reassembles_events_split_across_packets() {
        let got = collect(&["data: hel", "lo\n\n", "data: world\n\n"]).await;
        assert_eq!(got, vec!["hello", "world"]);
    }

    #[tokio::test]
    async fn skips_comments_and_done_marker() {
        let got = collect(&[": keepalive\n\ndata: x\n\ndata: [DONE]\n\n"]).await;
        assert_eq!(got, vec!["x"]);
    }

    #[tokio::test]
    async fn flushes_unterminated_final_line() {
        let got = collect(&["data: tail"]).await;
        assert_eq!(got, vec!["tail"]);
    }
}
