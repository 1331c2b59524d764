use hyper::StatusCode;
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue};

/// Response headers in wire order, repeated names kept as separate entries.
pub type HeaderList = Vec<(HeaderName, HeaderValue)>;

/// Same ceiling hyper applies to a single message head.
const MAX_HEADERS: usize = 100;

pub const DEFAULT_MAX_HEAD_BYTES: usize = 64 * 1024;

/// A complete backend response head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHead {
    pub status: StatusCode,
    pub headers: HeaderList,
    /// Bytes of the buffer that belong to the head, terminating blank line included.
    pub consumed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// No header terminator yet; feed more bytes.
    Incomplete,
    Complete(ParsedHead),
    /// Terminal. The session must be aborted, not retried with more input.
    Malformed(String),
}

/// Parses the cumulative bytes received from the backend so far.
///
/// Only the head is interpreted (as Latin-1 octets); whatever follows the blank line is
/// left untouched and accounted for through [`ParsedHead::consumed`].
pub fn parse(buffer: &[u8]) -> ParseOutcome {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    match response.parse(buffer) {
        Ok(httparse::Status::Partial) => ParseOutcome::Incomplete,
        Ok(httparse::Status::Complete(consumed)) => match head_from_httparse(&response, consumed) {
            Ok(head) => ParseOutcome::Complete(head),
            Err(reason) => ParseOutcome::Malformed(reason),
        },
        Err(e) => ParseOutcome::Malformed(format!("parse error: {e}")),
    }
}

fn head_from_httparse(response: &httparse::Response<'_, '_>, consumed: usize) -> Result<ParsedHead, String> {
    let code = response.code.ok_or("missing status code")?;
    let status = StatusCode::from_u16(code).map_err(|e| format!("invalid status code {code}: {e}"))?;
    let mut headers = HeaderList::with_capacity(response.headers.len());
    for header in response.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(|e| format!("invalid header name '{}': {e}", header.name))?;
        let value = HeaderValue::from_bytes(header.value).map_err(|e| format!("invalid value for '{}': {e}", header.name))?;
        headers.push((name, value));
    }
    Ok(ParsedHead { status, headers, consumed })
}

/// Accumulates backend bytes until the response head is complete.
#[derive(Debug)]
pub struct ParseState {
    buffer: Vec<u8>,
    max_head_bytes: usize,
}

impl ParseState {
    pub fn new(max_head_bytes: usize) -> Self {
        Self { buffer: Vec::with_capacity(1024), max_head_bytes }
    }

    /// Appends `chunk` and re-parses everything received so far.
    ///
    /// A head larger than `max_head_bytes` is malformed whether or not its terminator
    /// has arrived, so the outcome never depends on how the input was fragmented.
    pub fn feed(&mut self, chunk: &[u8]) -> ParseOutcome {
        self.buffer.extend_from_slice(chunk);
        match parse(&self.buffer) {
            ParseOutcome::Incomplete if self.buffer.len() > self.max_head_bytes => self.oversized(),
            ParseOutcome::Complete(head) if head.consumed > self.max_head_bytes => self.oversized(),
            outcome => outcome,
        }
    }

    /// Returns the bytes received past the head and releases the buffer.
    pub fn take_trailing(&mut self, consumed: usize) -> Bytes {
        let buffer = std::mem::take(&mut self.buffer);
        Bytes::copy_from_slice(buffer.get(consumed..).unwrap_or_default())
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn oversized(&self) -> ParseOutcome {
        ParseOutcome::Malformed(format!("response head exceeds {} bytes", self.max_head_bytes))
    }
}

impl Default for ParseState {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HEAD_BYTES)
    }
}
