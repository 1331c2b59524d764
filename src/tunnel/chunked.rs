//! Removes `Transfer-Encoding: chunked` framing from a non-101 handshake answer.
//!
//! Hosts re-frame response bodies themselves, so the chunk size lines must not reach
//! them as payload.

use crate::tunnel::parser::HeaderList;
use hyper::body::Bytes;
use hyper::header::TRANSFER_ENCODING;

/// True when the last transfer coding of the response is `chunked`.
pub fn is_chunked(headers: &HeaderList) -> bool {
    headers
        .iter()
        .rev()
        .find(|(name, _)| *name == TRANSFER_ENCODING)
        .and_then(|(_, value)| value.to_str().ok())
        .and_then(|value| value.rsplit(',').next())
        .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(u64),
    DataEnd,
    Trailers,
    Done,
}

/// Incremental chunked-body decoder. Input may be split anywhere.
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: ChunkState,
    buffer: Vec<u8>,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: ChunkState::Size, buffer: Vec::new() }
    }

    /// The terminating zero-size chunk and its trailer section have been read.
    pub fn is_done(&self) -> bool {
        self.state == ChunkState::Done
    }

    /// Feeds raw bytes and returns the payload they complete. Bytes after the end of the
    /// body are discarded.
    pub fn decode(&mut self, input: &[u8]) -> Result<Bytes, String> {
        if self.is_done() {
            return Ok(Bytes::new());
        }
        self.buffer.extend_from_slice(input);

        let mut payload = Vec::new();
        let mut pos = 0;
        loop {
            let rest = &self.buffer[pos..];
            match self.state {
                ChunkState::Size => match httparse::parse_chunk_size(rest) {
                    Ok(httparse::Status::Complete((used, 0))) => {
                        pos += used;
                        self.state = ChunkState::Trailers;
                    }
                    Ok(httparse::Status::Complete((used, size))) => {
                        pos += used;
                        self.state = ChunkState::Data(size);
                    }
                    Ok(httparse::Status::Partial) => break,
                    Err(_) => return Err("invalid chunk size line".to_string()),
                },
                ChunkState::Data(remaining) => {
                    if rest.is_empty() {
                        break;
                    }
                    let take = remaining.min(rest.len() as u64) as usize;
                    payload.extend_from_slice(&rest[..take]);
                    pos += take;
                    let left = remaining - take as u64;
                    self.state = if left == 0 { ChunkState::DataEnd } else { ChunkState::Data(left) };
                }
                ChunkState::DataEnd => {
                    if rest.len() < 2 {
                        break;
                    }
                    if &rest[..2] != b"\r\n" {
                        return Err("chunk data is not followed by CRLF".to_string());
                    }
                    pos += 2;
                    self.state = ChunkState::Size;
                }
                // Trailer fields are dropped; an empty line ends the body.
                ChunkState::Trailers => match rest.windows(2).position(|pair| pair == b"\r\n") {
                    Some(0) => {
                        pos += 2;
                        self.state = ChunkState::Done;
                    }
                    Some(end) => pos += end + 2,
                    None => break,
                },
                ChunkState::Done => {
                    pos = self.buffer.len();
                    break;
                }
            }
        }
        self.buffer.drain(..pos);
        Ok(Bytes::from(payload))
    }
}
