use crate::tunnel::chunked::{ChunkedDecoder, is_chunked};
use crate::tunnel::host::{Responder, ResponseHead, ResponseHeaderFilter, ResponseStream};
use crate::tunnel::parser::{DEFAULT_MAX_HEAD_BYTES, ParseOutcome, ParseState};
use hyper::StatusCode;
use hyper::body::Bytes;
use log::{debug, trace, warn};
use std::fmt;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

/// Largest single read forwarded in either direction.
pub const RELAY_CHUNK_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Backend,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Client => f.write_str("client"),
            Side::Backend => f.write_str("backend"),
        }
    }
}

/// Why a session ended.
#[derive(Debug)]
pub enum CloseReason {
    PeerClosed,
    Transport(io::Error),
    Malformed(String),
}

#[derive(Debug)]
pub struct SessionReport {
    /// The side whose close or failure started the teardown.
    pub initiator: Side,
    pub reason: CloseReason,
    pub headers_sent: bool,
    pub client_to_backend: u64,
    pub backend_to_client: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    pub max_head_bytes: usize,
    /// How long a half-closed backend may keep sending after the client went away.
    pub drain_timeout: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self { max_head_bytes: DEFAULT_MAX_HEAD_BYTES, drain_timeout: Duration::from_secs(5) }
    }
}

/// Backend-to-client state. Once past `Parsing`, the parser is never consulted again.
#[derive(Debug)]
enum BackendPath {
    Parsing(ParseState),
    Relaying,
    /// A non-101 answer with a chunked body. The host frames the body itself.
    Dechunking(ChunkedDecoder),
    /// The chunked body has ended; further backend bytes are dropped.
    BodyComplete,
}

enum ResponseSlot<R: Responder> {
    Pending(R),
    Open(R::Stream),
    Finished,
}

impl<R: Responder> ResponseSlot<R> {
    fn start(&mut self, head: ResponseHead) {
        *self = match std::mem::replace(self, ResponseSlot::Finished) {
            ResponseSlot::Pending(responder) => ResponseSlot::Open(responder.start(head)),
            started => started,
        };
    }

    async fn write(&mut self, chunk: Bytes) -> io::Result<()> {
        match self {
            ResponseSlot::Open(stream) => stream.write(chunk).await,
            _ => Err(io::Error::new(io::ErrorKind::NotConnected, "response stream is not open")),
        }
    }

    /// A response that was never started stays unsent.
    async fn close(&mut self) {
        if let ResponseSlot::Open(mut stream) = std::mem::replace(self, ResponseSlot::Finished) {
            stream.close().await;
        }
    }

    fn abort(&mut self) {
        match std::mem::replace(self, ResponseSlot::Finished) {
            ResponseSlot::Pending(responder) => responder.abort(),
            ResponseSlot::Open(mut stream) => stream.abort(),
            ResponseSlot::Finished => {}
        }
    }
}

struct DirectionEnd {
    side: Side,
    reason: CloseReason,
}

impl DirectionEnd {
    fn closed(side: Side) -> Self {
        Self { side, reason: CloseReason::PeerClosed }
    }

    fn failed(side: Side, error: io::Error) -> Self {
        Self { side, reason: CloseReason::Transport(error) }
    }
}

/// One upgraded client paired with one backend connection.
///
/// The session owns both connections for its whole lifetime. The backend-to-client
/// direction parses until the response head is complete and relays raw bytes after;
/// the client-to-backend direction relays raw bytes from the first one.
pub struct TunnelSession<B, R: Responder> {
    backend: Option<(ReadHalf<B>, WriteHalf<B>)>,
    response: ResponseSlot<R>,
    path: BackendPath,
    settings: RelaySettings,
    torn_down: bool,
    client_to_backend: u64,
    backend_to_client: u64,
}

impl<B, R> TunnelSession<B, R>
where
    B: AsyncRead + AsyncWrite + Send,
    R: Responder,
{
    /// `backend` must already have been sent the handshake request.
    pub fn new(backend: B, responder: R, settings: RelaySettings) -> Self {
        Self {
            backend: Some(tokio::io::split(backend)),
            response: ResponseSlot::Pending(responder),
            path: BackendPath::Parsing(ParseState::new(settings.max_head_bytes)),
            settings,
            torn_down: false,
            client_to_backend: 0,
            backend_to_client: 0,
        }
    }

    pub fn headers_sent(&self) -> bool {
        !matches!(self.path, BackendPath::Parsing(_))
    }

    /// Drives both directions until one side ends, then tears the session down.
    ///
    /// `client` resolves to the readable side of the client connection.
    pub async fn run<C, Rd, F>(mut self, client: C, filter: &F) -> SessionReport
    where
        C: Future<Output = io::Result<Rd>> + Send,
        Rd: AsyncRead + Unpin + Send,
        F: ResponseHeaderFilter + ?Sized,
    {
        let end = match self.backend.as_mut() {
            Some((backend_read, backend_write)) => {
                let upstream = pump_client(client, backend_write, &mut self.client_to_backend);
                let downstream = pump_backend(backend_read, &mut self.path, &mut self.response, filter, &mut self.backend_to_client);
                tokio::select! {
                    end = upstream => end,
                    end = downstream => end,
                }
            }
            None => DirectionEnd::closed(Side::Backend),
        };

        match &end.reason {
            CloseReason::PeerClosed => debug!("Tunnel closed by {side}", side = end.side),
            CloseReason::Transport(e) => warn!("Tunnel transport error on {side} side: {e}", side = end.side),
            CloseReason::Malformed(reason) => warn!("Backend sent a malformed handshake response: {reason}"),
        }

        self.teardown(end.side).await;
        SessionReport {
            initiator: end.side,
            reason: end.reason,
            headers_sent: self.headers_sent(),
            client_to_backend: self.client_to_backend,
            backend_to_client: self.backend_to_client,
        }
    }

    /// Terminal shutdown. Only the first call acts; later calls from either side are no-ops.
    ///
    /// Client-initiated: the response ends gracefully and the backend is half-closed and
    /// drained. Backend-initiated: the backend is dropped and the response is torn down,
    /// since no well-formed response is left to finish.
    pub async fn teardown(&mut self, initiator: Side) {
        if self.torn_down {
            trace!("Tunnel already torn down, ignoring {initiator} shutdown");
            return;
        }
        self.torn_down = true;

        match initiator {
            Side::Client => {
                self.response.close().await;
                if let Some((mut backend_read, mut backend_write)) = self.backend.take() {
                    if let Err(e) = backend_write.shutdown().await {
                        debug!("Backend half-close failed: {e}");
                    }
                    let drained = drain(&mut backend_read, self.settings.drain_timeout).await;
                    trace!("Drained {drained} bytes from backend after client close");
                }
            }
            Side::Backend => {
                self.backend = None;
                self.response.abort();
            }
        }
    }
}

async fn pump_client<C, Rd, W>(client: C, backend: &mut W, forwarded: &mut u64) -> DirectionEnd
where
    C: Future<Output = io::Result<Rd>>,
    Rd: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = match client.await {
        Ok(reader) => reader,
        Err(e) => return DirectionEnd::failed(Side::Client, e),
    };
    let mut chunk = vec![0u8; RELAY_CHUNK_SIZE];
    loop {
        let read = match reader.read(&mut chunk).await {
            Ok(0) => return DirectionEnd::closed(Side::Client),
            Ok(read) => read,
            Err(e) => return DirectionEnd::failed(Side::Client, e),
        };
        // The next read waits on this write, which is how backpressure reaches the client.
        if let Err(e) = backend.write_all(&chunk[..read]).await {
            return DirectionEnd::failed(Side::Backend, e);
        }
        *forwarded += read as u64;
    }
}

async fn pump_backend<Rd, R, F>(
    backend: &mut Rd,
    path: &mut BackendPath,
    response: &mut ResponseSlot<R>,
    filter: &F,
    forwarded: &mut u64,
) -> DirectionEnd
where
    Rd: AsyncRead + Unpin,
    R: Responder,
    F: ResponseHeaderFilter + ?Sized,
{
    let mut chunk = vec![0u8; RELAY_CHUNK_SIZE];
    loop {
        let read = match backend.read(&mut chunk).await {
            Ok(0) => return DirectionEnd::closed(Side::Backend),
            Ok(read) => read,
            Err(e) => return DirectionEnd::failed(Side::Backend, e),
        };

        let outgoing = match path {
            BackendPath::Relaying => Bytes::copy_from_slice(&chunk[..read]),
            BackendPath::Dechunking(decoder) => match decoder.decode(&chunk[..read]) {
                Ok(payload) => payload,
                Err(reason) => return DirectionEnd { side: Side::Backend, reason: CloseReason::Malformed(reason) },
            },
            BackendPath::BodyComplete => {
                trace!("Dropping {read} backend bytes after the response body ended");
                continue;
            }
            BackendPath::Parsing(state) => match state.feed(&chunk[..read]) {
                ParseOutcome::Incomplete => continue,
                ParseOutcome::Malformed(reason) => {
                    return DirectionEnd { side: Side::Backend, reason: CloseReason::Malformed(reason) };
                }
                ParseOutcome::Complete(head) => {
                    let trailing = state.take_trailing(head.consumed);
                    let switching = head.status == StatusCode::SWITCHING_PROTOCOLS;
                    let chunked = !switching && is_chunked(&head.headers);
                    // Hop-by-hop filtering does not apply to a successful switch.
                    let headers = if switching { head.headers } else { filter.filter_response_headers(head.headers) };
                    debug!("Backend answered handshake with {status}", status = head.status);
                    response.start(ResponseHead { status: head.status, headers });
                    if chunked {
                        let mut decoder = ChunkedDecoder::new();
                        let payload = match decoder.decode(&trailing) {
                            Ok(payload) => payload,
                            Err(reason) => return DirectionEnd { side: Side::Backend, reason: CloseReason::Malformed(reason) },
                        };
                        *path = BackendPath::Dechunking(decoder);
                        payload
                    } else {
                        *path = BackendPath::Relaying;
                        trailing
                    }
                }
            },
        };

        if !outgoing.is_empty() {
            let length = outgoing.len() as u64;
            if let Err(e) = response.write(outgoing).await {
                return DirectionEnd::failed(Side::Client, e);
            }
            *forwarded += length;
        }

        if matches!(path, BackendPath::Dechunking(decoder) if decoder.is_done()) {
            debug!("Chunked response body complete");
            response.close().await;
            *path = BackendPath::BodyComplete;
        }
    }
}

async fn drain<Rd: AsyncRead + Unpin>(backend: &mut Rd, limit: Duration) -> u64 {
    let mut sink = tokio::io::sink();
    match tokio::time::timeout(limit, tokio::io::copy(backend, &mut sink)).await {
        Ok(Ok(drained)) => drained,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::parser::HeaderList;
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

    #[derive(Debug, PartialEq)]
    enum Event {
        Head(StatusCode, HeaderList),
        Chunk(Bytes),
        Closed,
        Aborted,
    }

    struct TestResponder(UnboundedSender<Event>);
    struct TestStream(UnboundedSender<Event>);

    impl Responder for TestResponder {
        type Stream = TestStream;

        fn start(self, head: ResponseHead) -> TestStream {
            let _ = self.0.send(Event::Head(head.status, head.headers));
            TestStream(self.0)
        }

        fn reject(self, _status: StatusCode, _body: &'static str) {
            unreachable!("the relay never rejects");
        }

        fn abort(self) {
            let _ = self.0.send(Event::Aborted);
        }
    }

    impl ResponseStream for TestStream {
        fn write(&mut self, chunk: Bytes) -> impl Future<Output = io::Result<()>> + Send {
            let sent = self.0.send(Event::Chunk(chunk)).map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe));
            async move { sent }
        }

        fn close(&mut self) -> impl Future<Output = ()> + Send {
            let _ = self.0.send(Event::Closed);
            async {}
        }

        fn abort(&mut self) {
            let _ = self.0.send(Event::Aborted);
        }
    }

    /// Drops the pseudo `Status` field, like the real filter.
    struct DropStatus;

    impl ResponseHeaderFilter for DropStatus {
        fn filter_response_headers(&self, headers: HeaderList) -> HeaderList {
            headers.into_iter().filter(|(name, _)| name != "status").collect()
        }
    }

    fn session() -> (TunnelSession<DuplexStream, TestResponder>, DuplexStream, UnboundedReceiver<Event>) {
        let (backend, backend_peer) = tokio::io::duplex(64);
        let (tx, rx) = unbounded_channel();
        (TunnelSession::new(backend, TestResponder(tx), RelaySettings::default()), backend_peer, rx)
    }

    fn drain_events(rx: &mut UnboundedReceiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_fragmented_head_and_body_arrive_byte_exact() {
        let (session, mut backend_peer, mut rx) = session();
        let (client, _client_peer) = tokio::io::duplex(64);
        let relay = tokio::spawn(async move { session.run(async { Ok(client) }, &DropStatus).await });

        let head = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n";
        let body: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let mut wire = head.to_vec();
        wire.extend_from_slice(&body);
        for fragment in wire.chunks(3) {
            backend_peer.write_all(fragment).await.unwrap();
            tokio::task::yield_now().await;
        }
        drop(backend_peer);

        let report = relay.await.unwrap();
        assert_eq!(report.initiator, Side::Backend);
        assert!(matches!(report.reason, CloseReason::PeerClosed));
        assert!(report.headers_sent);
        assert_eq!(report.backend_to_client, body.len() as u64);

        let events = drain_events(&mut rx);
        match &events[0] {
            Event::Head(status, headers) => {
                assert_eq!(*status, StatusCode::SWITCHING_PROTOCOLS);
                assert_eq!(headers.len(), 2);
            }
            other => panic!("expected head first, got {other:?}"),
        }
        let received: Vec<u8> = events
            .iter()
            .filter_map(|event| match event {
                Event::Chunk(chunk) => Some(chunk.to_vec()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(received, body);
        assert_eq!(events.last(), Some(&Event::Aborted));
    }

    #[tokio::test]
    async fn test_client_close_half_closes_backend() {
        let (session, mut backend_peer, mut rx) = session();
        let (client, mut client_peer) = tokio::io::duplex(64);
        let relay = tokio::spawn(async move { session.run(async { Ok(client) }, &DropStatus).await });

        backend_peer.write_all(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: chat\r\n\r\n").await.unwrap();
        assert!(matches!(rx.recv().await, Some(Event::Head(StatusCode::SWITCHING_PROTOCOLS, _))));

        client_peer.write_all(b"hello").await.unwrap();
        drop(client_peer);

        let mut received = Vec::new();
        backend_peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"hello");
        drop(backend_peer);

        let report = relay.await.unwrap();
        assert_eq!(report.initiator, Side::Client);
        assert_eq!(report.client_to_backend, 5);
        assert_eq!(drain_events(&mut rx), vec![Event::Closed]);
    }

    #[tokio::test]
    async fn test_malformed_head_aborts_without_response() {
        let (session, mut backend_peer, mut rx) = session();
        let (client, _client_peer) = tokio::io::duplex(64);
        let relay = tokio::spawn(async move { session.run(async { Ok(client) }, &DropStatus).await });

        backend_peer.write_all(b"HTTP/1.1 abc Broken\r\n\r\n").await.unwrap();

        let report = relay.await.unwrap();
        assert_eq!(report.initiator, Side::Backend);
        assert!(matches!(report.reason, CloseReason::Malformed(_)));
        assert!(!report.headers_sent);
        assert_eq!(drain_events(&mut rx), vec![Event::Aborted]);
    }

    #[tokio::test]
    async fn test_non_switching_status_is_filtered() {
        let (session, mut backend_peer, mut rx) = session();
        let (client, _client_peer) = tokio::io::duplex(64);
        let relay = tokio::spawn(async move { session.run(async { Ok(client) }, &DropStatus).await });

        backend_peer.write_all(b"HTTP/1.1 403 Forbidden\r\nStatus: 403\r\nContent-Length: 2\r\n\r\nno").await.unwrap();
        drop(backend_peer);
        relay.await.unwrap();

        let events = drain_events(&mut rx);
        match &events[0] {
            Event::Head(status, headers) => {
                assert_eq!(*status, StatusCode::FORBIDDEN);
                assert_eq!(headers.len(), 1);
                assert_eq!(headers[0].0, "content-length");
            }
            other => panic!("expected head first, got {other:?}"),
        }
        assert_eq!(events[1], Event::Chunk(Bytes::from_static(b"no")));
    }

    #[tokio::test]
    async fn test_chunked_answer_is_dechunked_and_closed_at_body_end() {
        let (session, mut backend_peer, mut rx) = session();
        let (client, _client_peer) = tokio::io::duplex(64);
        let relay = tokio::spawn(async move { session.run(async { Ok(client) }, &DropStatus).await });

        backend_peer.write_all(b"HTTP/1.1 403 Forbidden\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nden").await.unwrap();
        backend_peer.write_all(b"\r\n3\r\nied\r\n0\r\n\r\n").await.unwrap();

        // The response ends with the last chunk while the backend connection stays open.
        let mut events = Vec::new();
        while events.last() != Some(&Event::Closed) {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Some(event)) => events.push(event),
                other => panic!("response was not closed at body end: {other:?}"),
            }
        }
        assert!(!relay.is_finished());
        assert!(matches!(events[0], Event::Head(StatusCode::FORBIDDEN, _)));
        let body: Vec<u8> = events
            .iter()
            .filter_map(|event| match event {
                Event::Chunk(chunk) => Some(chunk.to_vec()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(body, b"denied");

        drop(backend_peer);
        let report = relay.await.unwrap();
        assert!(report.headers_sent);
        assert_eq!(report.backend_to_client, 6);
        assert!(drain_events(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_switching_status_headers_pass_unfiltered() {
        let (session, mut backend_peer, mut rx) = session();
        let (client, _client_peer) = tokio::io::duplex(64);
        let relay = tokio::spawn(async move { session.run(async { Ok(client) }, &DropStatus).await });

        backend_peer.write_all(b"HTTP/1.1 101 Switching Protocols\r\nStatus: 101\r\n\r\n").await.unwrap();
        drop(backend_peer);
        relay.await.unwrap();

        match &drain_events(&mut rx)[0] {
            Event::Head(_, headers) => assert_eq!(headers[0].0, "status"),
            other => panic!("expected head first, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let (mut session, _backend_peer, mut rx) = session();
        session.response.start(ResponseHead { status: StatusCode::SWITCHING_PROTOCOLS, headers: HeaderList::new() });

        session.teardown(Side::Backend).await;
        session.teardown(Side::Client).await;
        session.teardown(Side::Backend).await;

        assert!(session.backend.is_none());
        let events = drain_events(&mut rx);
        assert_eq!(events.iter().filter(|event| **event == Event::Aborted).count(), 1);
        assert!(!events.contains(&Event::Closed));
    }

    #[tokio::test]
    async fn test_client_teardown_before_head_sends_nothing() {
        let (mut session, backend_peer, mut rx) = session();
        drop(backend_peer);

        session.teardown(Side::Client).await;
        session.teardown(Side::Backend).await;

        assert!(drain_events(&mut rx).is_empty());
    }
}
