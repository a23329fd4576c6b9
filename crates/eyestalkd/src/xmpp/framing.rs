//! Stanza framing: cuts an XMPP byte stream into top-level elements.
//!
//! The stream is one never-ending XML document, so a normal parser never
//! finishes. Instead the buffer is rescanned with quick-xml on every read
//! and the first complete depth-1 element (or the stream header/footer)
//! is split off. Partial input simply waits for more bytes.

use bytes::{Buf, BytesMut};
use quick_xml::events::Event;
use quick_xml::Reader;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound on buffered bytes that have not yet formed a stanza.
/// Typical stanzas are a few KB; this only trips on garbage input.
pub const MAX_FRAME_BUFFER: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `<stream:stream ...>` opening tag.
    StreamOpen(String),
    /// One complete top-level element.
    Stanza(String),
    /// `</stream:stream>`.
    StreamClose,
}

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("connection closed by server")]
    Closed,
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("buffered {0} bytes without a complete stanza")]
    Overflow(usize),
}

#[derive(Debug, Default)]
pub struct StanzaFramer {
    buf: BytesMut,
}

impl StanzaFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Split off the next complete frame, if the buffer holds one.
    pub fn next_frame(&mut self) -> Option<Frame> {
        let (frame, consumed) = extract(&self.buf);
        self.buf.advance(consumed);
        frame
    }

    /// Read from `io` until a complete frame is available.
    pub async fn read_frame<R: AsyncRead + Unpin>(&mut self, io: &mut R) -> Result<Frame, FramingError> {
        loop {
            if let Some(frame) = self.next_frame() {
                return Ok(frame);
            }
            if self.buf.len() > MAX_FRAME_BUFFER {
                return Err(FramingError::Overflow(self.buf.len()));
            }
            self.buf.reserve(8192);
            if io.read_buf(&mut self.buf).await? == 0 {
                return Err(FramingError::Closed);
            }
        }
    }
}

fn is_stream(name: &[u8]) -> bool {
    name == b"stream:stream" || name == b"stream"
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Returns the first complete frame and how many bytes it (plus any
/// leading whitespace/declarations) used. Bytes that can be discarded are
/// reported as consumed even when no frame is complete yet.
fn extract(buffer: &[u8]) -> (Option<Frame>, usize) {
    let mut reader = Reader::from_reader(buffer);
    reader.config_mut().check_end_names = false;

    let mut depth = 0usize;
    let mut stanza_start = 0usize;
    let mut idle = 0usize;

    loop {
        let pos = reader.buffer_position() as usize;

        // The stream header was split off by an earlier call, so quick-xml
        // sees the footer as an unmatched end tag. Recognise it by hand.
        if depth == 0 {
            let rest = &buffer[pos..];
            let lead = rest.iter().take_while(|b| b.is_ascii_whitespace()).count();
            let tag = &rest[lead..];
            if tag.starts_with(b"</") {
                let Some(gt) = tag.iter().position(|&b| b == b'>') else {
                    return (None, pos + lead);
                };
                let end = pos + lead + gt + 1;
                if is_stream(tag[2..gt].trim_ascii()) {
                    return (Some(Frame::StreamClose), end);
                }
                // Stray end tag outside any stanza: drop it and carry on.
                let (frame, used) = extract(&buffer[end..]);
                return (frame, end + used);
            }
        }

        let event = match reader.read_event() {
            Ok(event) => event,
            // Partial tag at the end of the buffer.
            Err(_) => return (None, idle),
        };
        let end = reader.buffer_position() as usize;

        match event {
            Event::Start(e) => {
                if depth == 0 && is_stream(e.name().as_ref()) {
                    return (Some(Frame::StreamOpen(text(&buffer[pos..end]))), end);
                }
                if depth == 0 {
                    stanza_start = pos;
                }
                depth += 1;
            }
            Event::Empty(_) => {
                if depth == 0 {
                    return (Some(Frame::Stanza(text(&buffer[pos..end]))), end);
                }
            }
            Event::End(_) => {
                // Depth-0 end tags were handled above.
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return (Some(Frame::Stanza(text(&buffer[stanza_start..end]))), end);
                }
            }
            Event::Eof => return (None, if depth == 0 { end } else { idle }),
            _ => {
                if depth == 0 {
                    idle = end;
                }
            }
        }
    }
}
