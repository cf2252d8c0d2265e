//! Streaming reframer for `multipart/x-mixed-replace` camera streams.
//!
//! Network chunks never line up with parts, so bytes are accumulated and
//! drained as parts complete, the same way an SSE reader drains events.
//! The buffer is capped: a source that never produces a boundary is a
//! protocol error, not an unbounded allocation.

use std::sync::Arc;

use bytes::{Buf, BytesMut};

use super::Frame;

/// Content type assumed when a part carries none.
pub const DEFAULT_FRAME_TYPE: &str = "image/jpeg";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReframeState {
    SeekingBoundary,
    ReadingHeaders,
    ReadingBody,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReframeError {
    #[error("multipart buffer exceeded {limit} bytes without a complete part")]
    BufferOverflow { limit: usize },
}

pub struct MultipartReframer {
    delimiter: Vec<u8>,
    buffer: BytesMut,
    state: ReframeState,
    max_buffer: usize,
    /// Where the next delimiter search resumes in the body.
    scan_from: usize,
    part_type: Option<Arc<str>>,
    default_type: Arc<str>,
}

impl MultipartReframer {
    pub fn new(boundary: &str, max_buffer: usize) -> Self {
        let boundary = boundary.trim_start_matches("--");
        Self {
            delimiter: format!("--{boundary}").into_bytes(),
            buffer: BytesMut::with_capacity(64 * 1024),
            state: ReframeState::SeekingBoundary,
            max_buffer,
            scan_from: 0,
            part_type: None,
            default_type: Arc::from(DEFAULT_FRAME_TYPE),
        }
    }

    pub fn state(&self) -> ReframeState {
        self.state
    }

    /// Feed one chunk and return every part it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, ReframeError> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            match self.state {
                ReframeState::SeekingBoundary => {
                    let Some(pos) = find(&self.buffer, &self.delimiter, 0) else {
                        // Keep only a tail that could still start a delimiter.
                        let keep = self.delimiter.len().saturating_sub(1);
                        if self.buffer.len() > keep {
                            self.buffer.advance(self.buffer.len() - keep);
                        }
                        break;
                    };
                    self.buffer.advance(pos + self.delimiter.len());
                    self.state = ReframeState::ReadingHeaders;
                }
                ReframeState::ReadingHeaders => {
                    let Some((end, sep_len)) = header_end(&self.buffer) else {
                        break;
                    };
                    let headers = self.buffer.split_to(end);
                    self.buffer.advance(sep_len);
                    self.part_type = content_type(&headers).map(Arc::from);
                    self.scan_from = 0;
                    self.state = ReframeState::ReadingBody;
                }
                ReframeState::ReadingBody => {
                    let Some(pos) = find(&self.buffer, &self.delimiter, self.scan_from) else {
                        self.scan_from = self.buffer.len().saturating_sub(self.delimiter.len() - 1);
                        break;
                    };
                    let mut body = self.buffer.split_to(pos);
                    self.buffer.advance(self.delimiter.len());
                    trim_line_end(&mut body);
                    if !body.is_empty() {
                        let content_type = self
                            .part_type
                            .take()
                            .unwrap_or_else(|| self.default_type.clone());
                        frames.push(Frame::new(body.freeze(), content_type));
                    }
                    self.state = ReframeState::ReadingHeaders;
                }
            }
        }

        if self.buffer.len() > self.max_buffer {
            return Err(ReframeError::BufferOverflow {
                limit: self.max_buffer,
            });
        }
        Ok(frames)
    }
}

/// Boundary token from a `Content-Type` header, or `fallback`.
pub fn boundary_from_content_type(content_type: Option<&str>, fallback: &str) -> String {
    content_type
        .and_then(|ct| {
            ct.split(';').find_map(|param| {
                let (key, value) = param.split_once('=')?;
                key.trim()
                    .eq_ignore_ascii_case("boundary")
                    .then(|| value.trim().trim_matches('"').trim_start_matches("--").to_owned())
            })
        })
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| fallback.to_owned())
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() || from > haystack.len() - needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// End of the header block and the length of the blank-line separator.
fn header_end(buf: &[u8]) -> Option<(usize, usize)> {
    let crlf = find(buf, b"\r\n\r\n", 0).map(|p| (p, 4));
    let lf = find(buf, b"\n\n", 0).map(|p| (p, 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn content_type(headers: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(headers).ok()?;
    text.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("content-type")
            .then(|| value.trim().to_owned())
            .filter(|v| !v.is_empty())
    })
}

/// Drop a single trailing `\r\n` or `\n`.
fn trim_line_end(body: &mut BytesMut) {
    if body.ends_with(b"\r\n") {
        body.truncate(body.len() - 2);
    } else if body.ends_with(b"\n") {
        body.truncate(body.len() - 1);
    }
}
