//! NDJSON streaming response parser.
//!
//! Reads a chat response body as a byte stream, splits it into
//! newline-delimited JSON records, and yields the `message.content` of each
//! record as a text fragment.
//!
//! Records are split on raw `\n` bytes before UTF-8 decoding. A newline byte
//! never occurs inside a multi-byte UTF-8 sequence, so a character split
//! across two network chunks is reassembled in the buffer before it is
//! decoded.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::errors::InferenceError;
use super::transport::ByteStream;
use super::types::StreamRecord;

/// Longest record excerpt included in a parse warning.
const LOG_PREVIEW_CHARS: usize = 200;

// ─── FragmentStream ──────────────────────────────────────────────────────────

/// Lazy, finite, non-restartable sequence of text fragments.
///
/// Ends when the transport closes, a record carries `done: true`, or the
/// cancellation token fires. The transport body is owned by the stream, so
/// dropping it releases the connection even when iteration stops early.
pub struct FragmentStream {
    inner: Pin<Box<dyn Stream<Item = Result<String, InferenceError>> + Send>>,
}

impl Stream for FragmentStream {
    type Item = Result<String, InferenceError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for FragmentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentStream").finish_non_exhaustive()
    }
}

/// Parse an NDJSON chat body into a [`FragmentStream`].
pub fn parse_ndjson_stream(body: ByteStream, cancel: CancellationToken) -> FragmentStream {
    let state = NdjsonState {
        body: Some(body),
        buffer: Vec::new(),
        finished: false,
        cancel,
    };

    let inner = stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }

            // Drain complete records already buffered.
            if let Some(pos) = state.buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = state.buffer.drain(..=pos).collect();
                match process_line(&line) {
                    Line::Skip => continue,
                    Line::Fragment(text) => return Some((Ok(text), state)),
                    Line::Done(fragment) => {
                        state.finish("done record");
                        return fragment.map(|text| (Ok(text), state));
                    }
                    Line::Failed(e) => {
                        state.finish("backend error record");
                        return Some((Err(e), state));
                    }
                }
            }

            let read = {
                let body = state.body.as_mut()?;
                tokio::select! {
                    biased;
                    _ = state.cancel.cancelled() => Read::Cancelled,
                    next = body.next() => Read::Chunk(next),
                }
            };

            match read {
                Read::Cancelled => {
                    state.finish("cancelled");
                    return None;
                }
                Read::Chunk(Some(Ok(bytes))) => state.buffer.extend_from_slice(&bytes),
                Read::Chunk(Some(Err(e))) => {
                    state.finish("transport error");
                    return Some((Err(e), state));
                }
                Read::Chunk(None) => {
                    // Transport closed; a final record may lack its newline.
                    let rest = std::mem::take(&mut state.buffer);
                    state.finish("transport closed");
                    return match process_line(&rest) {
                        Line::Fragment(text) | Line::Done(Some(text)) => Some((Ok(text), state)),
                        Line::Failed(e) => Some((Err(e), state)),
                        Line::Skip | Line::Done(None) => None,
                    };
                }
            }
        }
    });

    FragmentStream {
        inner: Box::pin(inner),
    }
}

// ─── Stream State ────────────────────────────────────────────────────────────

struct NdjsonState {
    /// `None` once released.
    body: Option<ByteStream>,
    /// Bytes received but not yet terminated by `\n`.
    buffer: Vec<u8>,
    finished: bool,
    cancel: CancellationToken,
}

impl NdjsonState {
    /// Mark the sequence ended and release the transport now rather than
    /// when the consumer drops the stream.
    fn finish(&mut self, reason: &'static str) {
        self.finished = true;
        if self.body.take().is_some() {
            tracing::debug!(reason, "released chat transport");
        }
    }
}

impl Drop for NdjsonState {
    fn drop(&mut self) {
        if self.body.is_some() {
            tracing::debug!("stream abandoned by consumer, released chat transport");
        }
    }
}

enum Read {
    Cancelled,
    Chunk(Option<Result<Bytes, InferenceError>>),
}

enum Line {
    Skip,
    Fragment(String),
    Done(Option<String>),
    Failed(InferenceError),
}

/// Decode and parse one record. Malformed records are logged and skipped.
fn process_line(raw: &[u8]) -> Line {
    let text = match std::str::from_utf8(raw) {
        Ok(t) => t.trim(),
        Err(e) => {
            tracing::warn!(error = %e, bytes = raw.len(), "skipping stream record with invalid UTF-8");
            return Line::Skip;
        }
    };

    if text.is_empty() {
        return Line::Skip;
    }

    let record: StreamRecord = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(
                error = %e,
                record = %text.chars().take(LOG_PREVIEW_CHARS).collect::<String>(),
                "skipping malformed stream record"
            );
            return Line::Skip;
        }
    };

    if let Some(reason) = record.error {
        return Line::Failed(InferenceError::StreamError { reason });
    }

    let fragment = record
        .message
        .and_then(|m| m.content)
        .filter(|c| !c.is_empty());

    if record.done {
        Line::Done(fragment)
    } else {
        match fragment {
            Some(text) => Line::Fragment(text),
            None => Line::Skip,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::inference::transport::stub::{StubReply, StubTransport};
    use crate::inference::transport::{Transport, TransportRequest};

    async fn body_for(stub: &StubTransport, reply: StubReply) -> ByteStream {
        stub.push_chat(reply);
        let req = TransportRequest::post_json("http://localhost:11434/api/chat", &1, Duration::from_secs(1))
            .unwrap();
        stub.send(req).await.unwrap().body
    }

    async fn collect(stream: FragmentStream) -> Vec<Result<String, InferenceError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_yields_content_until_done() {
        let stub = StubTransport::new();
        let body = body_for(
            &stub,
            StubReply::ndjson(&[
                r#"{"message":{"content":"Hel"}}"#,
                r#"{"message":{"content":"lo"}}"#,
                r#"{"done":true}"#,
                r#"{"message":{"content":"ignored"}}"#,
            ]),
        )
        .await;

        let items = collect(parse_ndjson_stream(body, CancellationToken::new())).await;
        let fragments: Vec<String> = items.into_iter().map(Result::unwrap).collect();
        assert_eq!(fragments, vec!["Hel", "lo"]);
        assert!(stub.was_released());
    }

    #[tokio::test]
    async fn test_records_split_across_chunks() {
        let stub = StubTransport::new();
        let body = body_for(
            &stub,
            StubReply::chunks(
                vec![
                    br#"{"message":{"con"#.to_vec(),
                    b"tent\":\"a\"}}\n{\"message\":{\"content\":\"b\"}}\n".to_vec(),
                ],
                false,
            ),
        )
        .await;

        let fragments: Vec<String> = collect(parse_ndjson_stream(body, CancellationToken::new()))
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(fragments, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_multibyte_character_split_across_chunks() {
        let record = "{\"message\":{\"content\":\"caf\u{e9} \u{1F600}\"}}\n".as_bytes().to_vec();
        // Split inside the 4-byte emoji.
        let split = record.len() - 6;
        let stub = StubTransport::new();
        let body = body_for(
            &stub,
            StubReply::chunks(vec![record[..split].to_vec(), record[split..].to_vec()], false),
        )
        .await;

        let fragments: Vec<String> = collect(parse_ndjson_stream(body, CancellationToken::new()))
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(fragments, vec!["caf\u{e9} \u{1F600}"]);
    }

    #[tokio::test]
    async fn test_malformed_record_is_skipped() {
        let stub = StubTransport::new();
        let body = body_for(
            &stub,
            StubReply::ndjson(&[
                r#"{"message":{"content":"one"}}"#,
                r#"{"message": not json"#,
                r#"{"message":{"content":"two"}}"#,
            ]),
        )
        .await;

        let fragments: Vec<String> = collect(parse_ndjson_stream(body, CancellationToken::new()))
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(fragments, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_trailing_record_without_newline() {
        let stub = StubTransport::new();
        let body = body_for(
            &stub,
            StubReply::chunks(
                vec![br#"{"message":{"content":"x"}}"#.to_vec(), b"\n".to_vec(), br#"{"message":{"content":"y"},"done":true}"#.to_vec()],
                false,
            ),
        )
        .await;

        let fragments: Vec<String> = collect(parse_ndjson_stream(body, CancellationToken::new()))
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(fragments, vec!["x", "y"]);
    }

    #[tokio::test]
    async fn test_error_record_ends_stream_with_error() {
        let stub = StubTransport::new();
        let body = body_for(
            &stub,
            StubReply::ndjson(&[
                r#"{"message":{"content":"partial"}}"#,
                r#"{"error":"model crashed"}"#,
                r#"{"message":{"content":"never"}}"#,
            ]),
        )
        .await;

        let items = collect(parse_ndjson_stream(body, CancellationToken::new())).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "partial");
        assert!(matches!(
            &items[1],
            Err(InferenceError::StreamError { reason }) if reason == "model crashed"
        ));
    }

    #[tokio::test]
    async fn test_transport_error_is_surfaced() {
        let body: ByteStream = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"{\"message\":{\"content\":\"a\"}}\n")),
            Err(InferenceError::StreamError {
                reason: "connection reset".into(),
            }),
        ]));

        let items = collect(parse_ndjson_stream(body, CancellationToken::new())).await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn test_early_drop_releases_transport() {
        let stub = StubTransport::new();
        let body = body_for(
            &stub,
            StubReply::chunks(vec![b"{\"message\":{\"content\":\"first\"}}\n".to_vec()], true),
        )
        .await;

        let mut stream = parse_ndjson_stream(body, CancellationToken::new());
        assert_eq!(stream.next().await.unwrap().unwrap(), "first");
        assert!(!stub.was_released());

        drop(stream);
        assert!(stub.was_released());
    }

    #[tokio::test]
    async fn test_cancellation_ends_hanging_stream() {
        let stub = StubTransport::new();
        let body = body_for(
            &stub,
            StubReply::chunks(vec![b"{\"message\":{\"content\":\"first\"}}\n".to_vec()], true),
        )
        .await;

        let cancel = CancellationToken::new();
        let mut stream = parse_ndjson_stream(body, cancel.clone());
        assert_eq!(stream.next().await.unwrap().unwrap(), "first");

        let canceller = Arc::new(cancel);
        let handle = {
            let canceller = canceller.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                canceller.cancel();
            })
        };

        assert!(stream.next().await.is_none());
        assert!(stub.was_released(), "cancellation releases the body before drop");
        handle.await.unwrap();
    }

    #[test]
    fn test_process_line_variants() {
        assert!(matches!(process_line(b"   "), Line::Skip));
        assert!(matches!(process_line(b"{\"message\":{\"content\":\"\"}}"), Line::Skip));
        assert!(matches!(process_line(b"{\"done\":true}"), Line::Done(None)));
        assert!(matches!(process_line(&[0xff, 0xfe, b'\n']), Line::Skip));
        match process_line(b"{\"message\":{\"role\":\"assistant\",\"content\":\"hi\"}}\r\n") {
            Line::Fragment(t) => assert_eq!(t, "hi"),
            _ => panic!("expected fragment"),
        }
    }
}
