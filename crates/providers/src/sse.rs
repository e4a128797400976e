//! Server-sent-event framing shared by provider adapters.
//!
//! The wire pattern is always the same: buffer response chunks, cut the
//! buffer at `\n\n` frame boundaries, hand each complete frame to an
//! adapter-specific parser that returns zero or more stream events.

use cd_domain::error::Result;
use cd_domain::stream::{EventStream, StreamEvent};

use crate::util::from_reqwest;

/// One complete SSE frame: the optional `event:` name plus the joined
/// `data:` payload lines.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Cut complete frames out of the buffer.
///
/// Frames are delimited by a blank line. Multiple `data:` lines within one
/// frame are joined with `\n` per the SSE format; `id:`/`retry:` lines are
/// ignored. A trailing partial frame stays in the buffer for the next call.
pub(crate) fn drain_frames(buffer: &mut String) -> Vec<SseFrame> {
    let mut frames = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos + 2).collect();

        let mut event = None;
        let mut data_lines: Vec<String> = Vec::new();
        for line in block.lines() {
            if let Some(name) = line.strip_prefix("event:") {
                event = Some(name.trim().to_string());
            } else if let Some(payload) = line.strip_prefix("data:") {
                let payload = payload.trim();
                if !payload.is_empty() {
                    data_lines.push(payload.to_string());
                }
            }
        }

        if !data_lines.is_empty() {
            frames.push(SseFrame { event, data: data_lines.join("\n") });
        }
    }

    frames
}

/// Build an [`EventStream`] from an SSE `reqwest::Response` and an
/// adapter-specific frame parser.
///
/// The closure is `FnMut` because adapters keep assembly state across
/// frames (tool-call argument buffers). The stream:
/// 1. buffers chunks and drains complete frames,
/// 2. flushes any trailing partial frame when the body closes,
/// 3. emits a fallback `Done` if the parser never produced one, so the
///    consumer always observes stream-end.
pub(crate) fn sse_event_stream<F>(response: reqwest::Response, mut parse_frame: F) -> EventStream
where
    F: FnMut(&SseFrame) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut done_seen = false;

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for frame in drain_frames(&mut buffer) {
                        for event in parse_frame(&frame) {
                            if matches!(&event, Ok(StreamEvent::Done { .. })) {
                                done_seen = true;
                            }
                            yield event;
                        }
                    }
                }
                Ok(None) => {
                    // Body closed; force out whatever partial frame remains.
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for frame in drain_frames(&mut buffer) {
                            for event in parse_frame(&frame) {
                                if matches!(&event, Ok(StreamEvent::Done { .. })) {
                                    done_seen = true;
                                }
                                yield event;
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }
        }

        if !done_seen {
            yield Ok(StreamEvent::Done { usage: None, stop_reason: Some("stop".into()) });
        }
    };

    Box::pin(stream)
}
