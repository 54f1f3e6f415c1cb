//! Server-sent event reader for bulk delete progress.
//!
//! The body is a `text/event-stream`. Unnamed frames carry a
//! [`DeleteProgress`], a `complete` frame carries the terminal
//! [`BulkDeleteResult`] and an `error` frame ends the run. Frames that fail to
//! decode are skipped.
//!
//! Cancellation is checked before every frame is applied. Returning from
//! [`ProgressStreamReader::run`] drops the body, which releases the connection.

use crate::types::{BulkDeleteResult, DeleteProgress};
use bridge_traits::ByteStream;
use futures::StreamExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const COMPLETE_EVENT: &str = "complete";
pub const ERROR_EVENT: &str = "error";

/// One dispatched event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub id: Option<String>,
    /// `data` lines joined with `\n`.
    pub data: String,
}

/// Line-oriented `text/event-stream` decoder.
///
/// Chunks may split a line anywhere. `\r\n`, `\r` and `\n` all end a line,
/// and a blank line dispatches the fields gathered since the previous one.
#[derive(Default)]
pub struct SseParser {
    /// Unterminated tail of the last chunk.
    buffer: String,
    /// The last chunk ended on `\r`, so a leading `\n` is part of it.
    skip_lf: bool,
    current: SseFrame,
    has_data: bool,
}

impl SseParser {
    pub fn push(&mut self, chunk: &str) -> Vec<SseFrame> {
        let mut chunk = chunk;
        if self.skip_lf && !chunk.is_empty() {
            self.skip_lf = false;
            chunk = chunk.strip_prefix('\n').unwrap_or(chunk);
        }

        let mut pending = std::mem::take(&mut self.buffer);
        pending.push_str(chunk);

        let mut frames = Vec::new();
        let mut rest = pending.as_str();
        while let Some(end) = rest.find(|c: char| c == '\r' || c == '\n') {
            let (line, tail) = rest.split_at(end);
            if tail == "\r" {
                self.skip_lf = true;
            }
            rest = if tail.starts_with("\r\n") {
                &tail[2..]
            } else {
                &tail[1..]
            };

            if let Some(frame) = self.line(line) {
                frames.push(frame);
            }
        }

        self.buffer = rest.to_string();
        frames
    }

    /// Flushes a final frame that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        let rest = std::mem::take(&mut self.buffer);
        if !rest.is_empty() {
            self.line(&rest);
        }
        self.dispatch()
    }

    fn line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }

        let (field, value) = match line.split_once(':') {
            // Comment, used by servers as a keep-alive.
            Some(("", _)) => return None,
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.current.event = Some(value.to_string()),
            "id" => self.current.id = Some(value.to_string()),
            "data" => {
                if self.has_data {
                    self.current.data.push('\n');
                }
                self.current.data.push_str(value);
                self.has_data = true;
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let frame = std::mem::take(&mut self.current);
        self.has_data = false;
        (frame != SseFrame::default()).then_some(frame)
    }
}

/// Decoded meaning of one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    Progress(DeleteProgress),
    Complete(BulkDeleteResult),
    Error(String),
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Decodes a frame, or returns why it was rejected.
pub fn decode_frame(frame: &SseFrame) -> Result<StreamFrame, String> {
    let data = frame.data.trim();

    match frame.event.as_deref() {
        None | Some("message") | Some("progress") => serde_json::from_str(data)
            .map(StreamFrame::Progress)
            .map_err(|e| format!("invalid progress frame: {}", e)),
        Some(COMPLETE_EVENT) => serde_json::from_str(data)
            .map(StreamFrame::Complete)
            .map_err(|e| format!("invalid complete frame: {}", e)),
        Some(ERROR_EVENT) => {
            let message = serde_json::from_str::<ErrorPayload>(data)
                .ok()
                .and_then(|p| p.error.or(p.message))
                .unwrap_or_else(|| data.to_string());
            Ok(StreamFrame::Error(message))
        }
        Some(other) => Err(format!("unexpected event {:?}", other)),
    }
}

/// How a stream stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// The terminal `complete` frame was received.
    Finished,
    /// The body ended before a terminal frame.
    Closed,
    /// Transport error or server `error` frame.
    Failed(String),
    /// The consumer cancelled the read.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReport {
    /// Latest progress frame applied.
    pub progress: Option<DeleteProgress>,
    /// Terminal result, present only when `end` is `Finished`.
    pub result: Option<BulkDeleteResult>,
    pub end: StreamEnd,
    pub frames_applied: usize,
    pub skipped_frames: usize,
}

pub struct ProgressStreamReader {
    body: ByteStream,
    cancel: CancellationToken,
    parser: SseParser,
    utf8_tail: Vec<u8>,
}

impl ProgressStreamReader {
    pub fn new(body: ByteStream, cancel: CancellationToken) -> Self {
        Self {
            body,
            cancel,
            parser: SseParser::default(),
            utf8_tail: Vec::new(),
        }
    }

    /// Reads until the terminal frame, the end of the body, an error or
    /// cancellation. `on_progress` is called for each progress frame in
    /// arrival order and never after cancellation.
    pub async fn run<F>(mut self, mut on_progress: F) -> StreamReport
    where
        F: FnMut(&DeleteProgress),
    {
        let mut report = StreamReport {
            progress: None,
            result: None,
            end: StreamEnd::Closed,
            frames_applied: 0,
            skipped_frames: 0,
        };

        let mut closed = false;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    report.end = StreamEnd::Cancelled;
                    return report;
                }
                chunk = self.body.next() => chunk,
            };

            let frames = match next {
                Some(Ok(bytes)) => {
                    let text = self.decode_utf8(&bytes);
                    self.parser.push(&text)
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Progress stream interrupted");
                    report.end = StreamEnd::Failed(e.to_string());
                    return report;
                }
                None => {
                    closed = true;
                    let mut text = String::from_utf8_lossy(&self.utf8_tail).into_owned();
                    self.utf8_tail.clear();
                    if !text.is_empty() && !text.ends_with('\n') {
                        text.push('\n');
                    }
                    let mut frames = self.parser.push(&text);
                    frames.extend(self.parser.finish());
                    if frames.is_empty() {
                        debug!("Progress stream closed without a result");
                        return report;
                    }
                    frames
                }
            };

            for frame in frames {
                if self.cancel.is_cancelled() {
                    report.end = StreamEnd::Cancelled;
                    return report;
                }

                match decode_frame(&frame) {
                    Ok(StreamFrame::Progress(progress)) => {
                        on_progress(&progress);
                        report.progress = Some(progress);
                        report.frames_applied += 1;
                    }
                    Ok(StreamFrame::Complete(result)) => {
                        report.result = Some(result);
                        report.frames_applied += 1;
                        report.end = StreamEnd::Finished;
                        return report;
                    }
                    Ok(StreamFrame::Error(message)) => {
                        warn!(%message, "Server reported a stream error");
                        report.end = StreamEnd::Failed(message);
                        return report;
                    }
                    Err(reason) => {
                        warn!(%reason, "Skipping malformed progress frame");
                        report.skipped_frames += 1;
                    }
                }
            }

            if closed {
                debug!("Progress stream closed without a result");
                return report;
            }
        }
    }

    /// Decodes a chunk, carrying an incomplete trailing UTF-8 sequence over
    /// to the next chunk.
    fn decode_utf8(&mut self, bytes: &[u8]) -> String {
        self.utf8_tail.extend_from_slice(bytes);

        match std::str::from_utf8(&self.utf8_tail) {
            Ok(text) => {
                let text = text.to_string();
                self.utf8_tail.clear();
                text
            }
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                let text = String::from_utf8_lossy(&self.utf8_tail[..valid]).into_owned();
                self.utf8_tail.drain(..valid);
                text
            }
            Err(_) => {
                let text = String::from_utf8_lossy(&self.utf8_tail).into_owned();
                self.utf8_tail.clear();
                text
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::BridgeError;
    use bytes::Bytes;

    fn body(chunks: Vec<&'static str>) -> ByteStream {
        raw_body(chunks.into_iter().map(|c| Bytes::from_static(c.as_bytes())).collect())
    }

    fn raw_body(chunks: Vec<Bytes>) -> ByteStream {
        Box::pin(futures::stream::iter(
            chunks.into_iter().map(Ok::<_, BridgeError>),
        ))
    }

    #[test]
    fn parser_emits_frames_on_blank_lines() {
        let mut parser = SseParser::default();
        let frames = parser.push("event: complete\ndata: {}\n\nid: 42\ndata: world\n\n");

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event.as_deref(), Some("complete"));
        assert_eq!(frames[0].data, "{}");
        assert_eq!(frames[1].id.as_deref(), Some("42"));
        assert_eq!(frames[1].data, "world");
    }

    #[test]
    fn parser_handles_split_chunks_and_crlf() {
        let mut parser = SseParser::default();
        assert!(parser.push("data: {\"cur").is_empty());
        assert!(parser.push("rent\":1}\r").is_empty());
        let frames = parser.push("\n\r\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"current\":1}");
    }

    #[test]
    fn parser_accepts_bare_carriage_returns() {
        let mut parser = SseParser::default();
        let frames = parser.push("event: complete\rdata: {}\r\r");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("complete"));

        // A chunk ending on CR followed by one that does not start with LF.
        assert!(parser.push("data: a\r").is_empty());
        let frames = parser.push("data: b\n\n");
        assert_eq!(frames[0].data, "a\nb");
    }

    #[test]
    fn parser_joins_multi_line_data_and_ignores_comments() {
        let mut parser = SseParser::default();
        let frames = parser.push(": keep-alive\ndata: first\ndata: second\n\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "first\nsecond");
    }

    #[test]
    fn parser_finish_flushes_unterminated_frame() {
        let mut parser = SseParser::default();
        assert!(parser.push("event: complete\ndata: {}").is_empty());

        let frame = parser.finish().unwrap();
        assert_eq!(frame.event.as_deref(), Some("complete"));
        assert_eq!(frame.data, "{}");
    }

    #[test]
    fn decode_distinguishes_frame_kinds() {
        let progress = SseFrame {
            data: r#"{"current":1,"total":2,"deleted":1}"#.to_string(),
            ..SseFrame::default()
        };
        assert!(matches!(decode_frame(&progress), Ok(StreamFrame::Progress(p)) if p.current == 1));

        let complete = SseFrame {
            event: Some("complete".to_string()),
            data: r#"{"deleted":2,"failed":0,"skipped":0,"total_size":0,"errors":[]}"#.to_string(),
            ..SseFrame::default()
        };
        assert!(matches!(decode_frame(&complete), Ok(StreamFrame::Complete(r)) if r.deleted == 2));

        let error = SseFrame {
            event: Some("error".to_string()),
            data: r#"{"error":"database locked"}"#.to_string(),
            ..SseFrame::default()
        };
        assert_eq!(
            decode_frame(&error),
            Ok(StreamFrame::Error("database locked".to_string()))
        );

        let garbage = SseFrame {
            data: "{not json".to_string(),
            ..SseFrame::default()
        };
        assert!(decode_frame(&garbage).is_err());
    }

    #[tokio::test]
    async fn reader_applies_progress_then_result() {
        let stream = body(vec![
            "data: {\"current\":0,\"total\":2}\n\n",
            "data: {\"current\":2,\"total\":2,\"deleted\":2}\n\nevent: complete\n",
            "data: {\"deleted\":2,\"failed\":0,\"skipped\":0,\"total_size\":99}\n\n",
        ]);

        let mut seen = Vec::new();
        let report = ProgressStreamReader::new(stream, CancellationToken::new())
            .run(|p| seen.push(p.current))
            .await;

        assert_eq!(seen, vec![0, 2]);
        assert_eq!(report.end, StreamEnd::Finished);
        assert_eq!(report.result.unwrap().total_size, 99);
        assert_eq!(report.frames_applied, 3);
    }

    #[tokio::test]
    async fn reader_skips_corrupt_frame_mid_stream() {
        let stream = body(vec![
            "data: {\"current\":1,\"total\":3}\n\n",
            "data: {\"current\":\n\n",
            "data: {\"current\":3,\"total\":3}\n\n",
            "event: complete\ndata: {\"deleted\":3,\"failed\":0,\"skipped\":0}\n\n",
        ]);

        let mut seen = Vec::new();
        let report = ProgressStreamReader::new(stream, CancellationToken::new())
            .run(|p| seen.push(p.current))
            .await;

        assert_eq!(seen, vec![1, 3]);
        assert_eq!(report.skipped_frames, 1);
        assert_eq!(report.end, StreamEnd::Finished);
        assert_eq!(report.result.unwrap().deleted, 3);
    }

    #[tokio::test]
    async fn reader_reports_closed_without_terminal_frame() {
        let stream = body(vec!["data: {\"current\":1,\"total\":3}\n\n"]);

        let report = ProgressStreamReader::new(stream, CancellationToken::new())
            .run(|_| {})
            .await;

        assert_eq!(report.end, StreamEnd::Closed);
        assert!(report.result.is_none());
        assert_eq!(report.progress.map(|p| p.current), Some(1));
    }

    #[tokio::test]
    async fn reader_handles_multibyte_split_across_chunks() {
        // "é" is 0xC3 0xA9
        let stream = raw_body(vec![
            Bytes::from_static(b"event: complete\ndata: {\"deleted\":1,\"failed\":0,\"skipped\":0,\"errors\":[{\"title\":\"Am\xC3"),
            Bytes::from_static(b"\xA9lie\",\"error\":\"x\"}]}\n\n"),
        ]);

        let report = ProgressStreamReader::new(stream, CancellationToken::new())
            .run(|_| {})
            .await;

        let result = report.result.unwrap();
        assert_eq!(result.errors[0].title, "Amélie");
    }

    #[tokio::test]
    async fn reader_stops_on_error_frame() {
        let stream = body(vec![
            "event: error\ndata: {\"message\":\"rule not found\"}\n\n",
            "event: complete\ndata: {\"deleted\":1,\"failed\":0,\"skipped\":0}\n\n",
        ]);

        let report = ProgressStreamReader::new(stream, CancellationToken::new())
            .run(|_| {})
            .await;

        assert_eq!(report.end, StreamEnd::Failed("rule not found".to_string()));
        assert!(report.result.is_none());
    }

    #[tokio::test]
    async fn reader_applies_nothing_after_cancel() {
        let token = CancellationToken::new();
        let (tx, rx) = futures::channel::mpsc::unbounded::<bridge_traits::error::Result<Bytes>>();
        let reader = ProgressStreamReader::new(Box::pin(rx), token.clone());

        tx.unbounded_send(Ok(Bytes::from_static(b"data: {\"current\":1,\"total\":2}\n\n")))
            .unwrap();

        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = tokio::spawn(async move {
            reader
                .run(move |p| sink.lock().unwrap().push(p.current))
                .await
        });

        while seen.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
        token.cancel();
        tx.unbounded_send(Ok(Bytes::from_static(
            b"event: complete\ndata: {\"deleted\":2,\"failed\":0,\"skipped\":0}\n\n",
        )))
        .ok();

        let report = handle.await.unwrap();
        assert_eq!(report.end, StreamEnd::Cancelled);
        assert!(report.result.is_none());
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }
}
