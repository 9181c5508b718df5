//! Connection Handler
//!
//! Each client gets its own handler task that runs in a loop,
//! reading requests and sending replies.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. ConnectionHandler spawned
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │                              │
//!    │  Decode every complete frame │
//!    │  in the buffer, execute it,  │
//!    │  queue the reply             │
//!    │              │               │
//!    │              ▼               │
//!    │  Flush queued replies        │
//!    │              │               │
//!    │              ▼               │
//!    │  Read more bytes             │
//!    │              │               │
//!    │         [Loop back]          │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. Client disconnects / decode error / I/O error
//!        │
//!        ▼
//! 5. Handler task ends
//! ```
//!
//! Bare `\n` keep-alives are consumed without a reply. A frame that fails to
//! decode gets a `-ERR Protocol error: ...` reply, after which the connection
//! is closed: the rest of the buffer cannot be trusted to be aligned on a
//! frame boundary.

use crate::commands::CommandHandler;
use crate::config::DEFAULT_MAX_BUFFER;
use crate::protocol::{ParseError, RespParser, RespValue};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Sent just before a client is dropped for exceeding its buffer cap
const ERR_BUFFER_FULL: &str = "ERR max buffer size exceeded";

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total keep-alive markers received
    pub keepalives_received: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn keepalive_received(&self) {
        self.keepalives_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Handles a single client connection.
///
/// Generic over the byte stream so that anything readable and writable
/// (a `TcpStream`, an in-memory mock) can be served.
pub struct ConnectionHandler<S> {
    /// The client stream, with replies buffered until flushed
    stream: BufWriter<S>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Bytes received but not yet decoded
    buffer: BytesMut,

    /// Upper bound on `buffer` before the client is dropped
    max_buffer: usize,

    command_handler: CommandHandler,

    parser: RespParser,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new connection handler.
    pub fn new(
        stream: S,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            max_buffer: DEFAULT_MAX_BUFFER,
            command_handler,
            parser: RespParser::new(),
            stats,
        }
    }

    /// Sets the limit on unparsed input held for this client.
    pub fn with_max_buffer(mut self, max_buffer: usize) -> Self {
        self.max_buffer = max_buffer;
        self
    }

    /// Runs the main connection loop until the client disconnects or an
    /// error occurs.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.addr, "Client disconnected")
            }
            Err(ConnectionError::Io(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    /// The main read-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            loop {
                match self.try_parse_command() {
                    Ok(Some(RespValue::NoReply)) => {
                        self.stats.keepalive_received();
                        trace!(client = %self.addr, "Keep-alive received");
                    }
                    Ok(Some(request)) => {
                        let response = self.command_handler.execute(request);
                        self.stats.command_processed();
                        if response.is_error() {
                            debug!(client = %self.addr, reply = %response, "Command rejected");
                        }
                        self.queue_response(&response).await?;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(client = %self.addr, error = %e, "Parse error");
                        let reply = RespValue::error(format!("ERR Protocol error: {}", e));
                        self.queue_response(&reply).await?;
                        self.stream.flush().await?;
                        return Err(ConnectionError::Parse(e));
                    }
                }
            }

            // Everything decodable has been answered; pipelined replies go
            // out in one write.
            self.stream.flush().await?;

            self.read_more_data().await?;
        }
    }

    /// Attempts to decode one frame from the buffer.
    fn try_parse_command(&mut self) -> Result<Option<RespValue>, ParseError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match self.parser.parse(&self.buffer)? {
            Some((value, consumed)) => {
                let _ = self.buffer.split_to(consumed);
                trace!(
                    client = %self.addr,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed command"
                );
                Ok(Some(value))
            }
            None => {
                trace!(
                    client = %self.addr,
                    buffered = self.buffer.len(),
                    "Incomplete command, need more data"
                );
                Ok(None)
            }
        }
    }

    /// Reads more data from the stream into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= self.max_buffer {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            self.queue_response(&RespValue::error(ERR_BUFFER_FULL)).await?;
            self.stream.flush().await?;
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            return if self.buffer.is_empty() {
                Err(ConnectionError::ClientDisconnected)
            } else {
                Err(ConnectionError::UnexpectedEof)
            };
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }

    /// Encodes a reply into the write buffer. Not flushed.
    async fn queue_response(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        let bytes = response.serialize();
        self.stream.write_all(&bytes).await?;
        self.stats.bytes_written(bytes.len());
        trace!(client = %self.addr, bytes = bytes.len(), "Queued response");
        Ok(())
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The client sent bytes that are not valid RESP
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial command)
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Buffer size limit exceeded
    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Handles a TCP client connection to completion.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    max_buffer: usize,
) {
    let handler =
        ConnectionHandler::new(stream, addr, command_handler, stats).with_max_buffer(max_buffer);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::Io(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ExpiryScheduler, StorageEngine};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_test::io::Builder;

    fn test_addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 50000))
    }

    fn create_command_handler() -> CommandHandler {
        let storage = Arc::new(StorageEngine::new());
        let expiry = Arc::new(ExpiryScheduler::new(Arc::clone(&storage)));
        CommandHandler::new(storage, expiry)
    }

    async fn run_mock(
        mock: tokio_test::io::Mock,
    ) -> (Result<(), ConnectionError>, Arc<ConnectionStats>) {
        let stats = Arc::new(ConnectionStats::new());
        let handler = ConnectionHandler::new(
            mock,
            test_addr(),
            create_command_handler(),
            Arc::clone(&stats),
        );
        (handler.run().await, stats)
    }

    #[tokio::test]
    async fn test_mock_ping_pong() {
        let mock = Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n")
            .write(b"+PONG\r\n")
            .build();

        let (result, stats) = run_mock(mock).await;
        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_mock_request_split_across_reads() {
        let mock = Builder::new()
            .read(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo")
            .read(b"\r\n$3\r\nbar\r\n")
            .write(b"+OK\r\n")
            .read(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n")
            .write(b"$3\r\nbar\r\n")
            .build();

        let (result, _) = run_mock(mock).await;
        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
    }

    #[tokio::test]
    async fn test_mock_keepalive_gets_no_reply() {
        let mock = Builder::new()
            .read(b"\n\n*1\r\n$4\r\nPING\r\n")
            .write(b"+PONG\r\n")
            .build();

        let (_, stats) = run_mock(mock).await;
        assert_eq!(stats.keepalives_received.load(Ordering::Relaxed), 2);
        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_mock_command_errors_keep_connection_open() {
        let mock = Builder::new()
            .read(b"*0\r\n")
            .write(b"-first argument must be a command\r\n")
            .read(b"*1\r\n$3\r\nGET\r\n")
            .write(b"-invalid arguments count for GET\r\n")
            .read(b"PING\r\n")
            .write(b"+PONG\r\n")
            .build();

        let (result, stats) = run_mock(mock).await;
        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_mock_parse_error_closes_connection() {
        let mock = Builder::new()
            .read(b"*1\r\n$x\r\n")
            .write(b"-ERR Protocol error: invalid integer: invalid digit found in string\r\n")
            .build();

        let (result, _) = run_mock(mock).await;
        assert!(matches!(
            result,
            Err(ConnectionError::Parse(ParseError::InvalidInteger(_)))
        ));
    }

    #[tokio::test]
    async fn test_mock_partial_frame_at_eof() {
        let mock = Builder::new().read(b"*2\r\n$3\r\nGET\r\n").build();

        let (result, _) = run_mock(mock).await;
        assert!(matches!(result, Err(ConnectionError::UnexpectedEof)));
    }

    #[tokio::test]
    async fn test_mock_buffer_limit() {
        let mock = Builder::new()
            .read(b"*2\r\n$100\r\n0123456789")
            .write(b"-ERR max buffer size exceeded\r\n")
            .build();

        let stats = Arc::new(ConnectionStats::new());
        let handler = ConnectionHandler::new(mock, test_addr(), create_command_handler(), stats)
            .with_max_buffer(16);

        assert!(matches!(handler.run().await, Err(ConnectionError::BufferFull)));
    }

    async fn create_test_server() -> (SocketAddr, Arc<ConnectionStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(ConnectionStats::new());
        let command_handler = create_command_handler();

        let stats_clone = Arc::clone(&stats);
        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let stats = Arc::clone(&stats_clone);
                tokio::spawn(handle_connection(
                    stream,
                    client_addr,
                    command_handler.clone(),
                    stats,
                    DEFAULT_MAX_BUFFER,
                ));
            }
        });

        (addr, stats)
    }

    async fn read_exact_reply(client: &mut TcpStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        tokio::time::timeout(
            std::time::Duration::from_secs(2),
            client.read_exact(&mut buf),
        )
        .await
        .unwrap()
        .unwrap();
        buf
    }

    #[tokio::test]
    async fn test_tcp_set_get() {
        let (addr, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n")
            .await
            .unwrap();
        assert_eq!(read_exact_reply(&mut client, 5).await, b"+OK\r\n");

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n")
            .await
            .unwrap();
        assert_eq!(read_exact_reply(&mut client, 9).await, b"$3\r\nbar\r\n");

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$7\r\nmissing\r\n")
            .await
            .unwrap();
        assert_eq!(read_exact_reply(&mut client, 5).await, b"$-1\r\n");
    }

    #[tokio::test]
    async fn test_tcp_pipelined_and_shared_store() {
        let (addr, stats) = create_test_server().await;
        let mut writer = TcpStream::connect(addr).await.unwrap();

        writer
            .write_all(b"*3\r\n$3\r\nSET\r\n$2\r\nk1\r\n$2\r\nv1\r\n*3\r\n$3\r\nSET\r\n$2\r\nk2\r\n$2\r\nv2\r\n*2\r\n$3\r\nGET\r\n$2\r\nk1\r\n")
            .await
            .unwrap();
        // +OK\r\n+OK\r\n$2\r\nv1\r\n
        assert_eq!(
            read_exact_reply(&mut writer, 18).await,
            b"+OK\r\n+OK\r\n$2\r\nv1\r\n"
        );

        // A second client sees the same store
        let mut reader = TcpStream::connect(addr).await.unwrap();
        reader
            .write_all(b"*2\r\n$3\r\nGET\r\n$2\r\nk2\r\n")
            .await
            .unwrap();
        assert_eq!(read_exact_reply(&mut reader, 8).await, b"$2\r\nv2\r\n");

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 2);
        assert!(stats.commands_processed.load(Ordering::Relaxed) >= 4);
    }

    #[tokio::test]
    async fn test_tcp_large_value_set_and_get() {
        let (addr, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        let big = vec![b'x'; 100 * 1024];
        let request = RespValue::request("SET", [b"big".to_vec(), big.clone()]);
        client.write_all(&request.serialize()).await.unwrap();
        assert_eq!(read_exact_reply(&mut client, 5).await, b"+OK\r\n");

        client
            .write_all(&RespValue::request("GET", ["big"]).serialize())
            .await
            .unwrap();
        let expected = RespValue::bulk_string(big).serialize();
        assert_eq!(read_exact_reply(&mut client, expected.len()).await, expected);
    }

    #[tokio::test]
    async fn test_tcp_px_expiry() {
        let (addr, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*5\r\n$3\r\nSET\r\n$3\r\ntmp\r\n$1\r\nx\r\n$2\r\nPX\r\n$2\r\n50\r\n")
            .await
            .unwrap();
        assert_eq!(read_exact_reply(&mut client, 5).await, b"+OK\r\n");

        tokio::time::sleep(std::time::Duration::from_millis(150)).await;

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$3\r\ntmp\r\n")
            .await
            .unwrap();
        assert_eq!(read_exact_reply(&mut client, 5).await, b"$-1\r\n");
    }
}
