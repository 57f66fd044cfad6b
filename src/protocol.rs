use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Width of the type tag that prefixes every client request.
pub const TAG_LEN: usize = 4;

/// Terminates every server response. A response made of this byte alone is an ack.
pub const ACK: u8 = 0;

/// FrameKind identifies what a client request asks the server to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Name,
    Quit,
    Hist,
}

impl FrameKind {
    pub fn tag(self) -> &'static [u8; TAG_LEN] {
        match self {
            FrameKind::Text => b"text",
            FrameKind::Name => b"name",
            FrameKind::Quit => b"quit",
            FrameKind::Hist => b"hist",
        }
    }

    pub fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"text" => Some(FrameKind::Text),
            b"name" => Some(FrameKind::Name),
            b"quit" => Some(FrameKind::Quit),
            b"hist" => Some(FrameKind::Hist),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("connection error: {0}")]
    Io(#[from] io::Error),
    #[error("truncated frame ({0} bytes)")]
    Truncated(usize),
    #[error("unknown frame tag: {0:?}")]
    UnknownTag(String),
}

/// A client → server frame: a 4-byte tag followed by a newline-terminated payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub kind: FrameKind,
    /// Payload bytes, always ending in `\n`.
    pub payload: Vec<u8>,
}

impl Request {
    pub fn new(kind: FrameKind, line: &[u8]) -> Self {
        let mut payload = line.to_vec();
        if payload.last() != Some(&b'\n') {
            payload.push(b'\n');
        }
        Self { kind, payload }
    }

    pub fn hist() -> Self {
        Self::new(FrameKind::Hist, b"")
    }

    pub fn quit() -> Self {
        Self::new(FrameKind::Quit, b"")
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(TAG_LEN + self.payload.len());
        data.extend_from_slice(self.kind.tag());
        data.extend_from_slice(&self.payload);
        data
    }

    /// Decodes one frame as read off the wire, trailing newline included.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        if frame.len() <= TAG_LEN || frame.last() != Some(&b'\n') {
            return Err(ProtocolError::Truncated(frame.len()));
        }
        let (tag, payload) = frame.split_at(TAG_LEN);
        let kind = FrameKind::from_tag(tag)
            .ok_or_else(|| ProtocolError::UnknownTag(String::from_utf8_lossy(tag).into_owned()))?;
        Ok(Self {
            kind,
            payload: payload.to_vec(),
        })
    }

    /// The payload without its final `\n`. Any other byte, `\r` included, is kept.
    pub fn line(&self) -> &[u8] {
        self.payload.strip_suffix(b"\n").unwrap_or(&self.payload)
    }
}

/// Reads the next request frame. `Ok(None)` means the peer closed cleanly between frames.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<Request>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf).await? == 0 {
        return Ok(None);
    }
    Request::decode(&buf).map(Some)
}

/// Frames a history blob as a server response.
pub fn history_response(mut history: Vec<u8>) -> Vec<u8> {
    history.push(ACK);
    history
}

/// Reads one server response and returns it without its terminating zero byte.
/// An empty result is a plain acknowledgement.
pub async fn read_response<R>(reader: &mut R) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    reader.read_until(ACK, &mut buf).await?;
    if buf.pop() != Some(ACK) {
        return Err(ProtocolError::Truncated(buf.len()));
    }
    Ok(buf)
}
