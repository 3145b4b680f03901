//! Single-flight network client over a pluggable [`Transport`].
//!
//! At most one HTTP exchange or socket stream is pending at a time. Every
//! operation that is initiated, rejected, timed out or cancelled produces
//! exactly one [`Completion`], drained with [`NetworkClient::take_completion`].

pub mod http;
mod transport;

#[cfg(test)]
pub(crate) mod mock;

use alloc::{format, string::String, vec::Vec};
use core::{fmt, task::Poll};

use heapless::Deque;
use log::{debug, info, warn};

pub use transport::{ConnectProgress, HttpMethod, HttpRequest, SocketRead, Transport};

use crate::{
    config::bounded,
    types::{ErrorType, NetworkResult},
};

pub const DEFAULT_HTTP_TIMEOUT_MS: u32 = 10_000;
pub const DEFAULT_SOCKET_TIMEOUT_MS: u32 = 30_000;
/// Size of one socket read.
pub const READ_CHUNK_BYTES: usize = 512;
/// Socket reads performed per [`NetworkClient::update`].
pub const READS_PER_UPDATE: usize = 4;

const MAX_HOST_LEN: usize = 253;
const COMPLETION_QUEUE: usize = 8;
const LAST_ERROR_CAPACITY: usize = 128;

/// Rejected socket call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SocketError {
    InvalidHost,
    InvalidPort,
    /// Another operation is pending.
    Busy,
    NotConnected,
    ConnectFailed,
    PartialSend { sent: usize, expected: usize },
    SendFailed,
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHost => f.write_str("invalid host"),
            Self::InvalidPort => f.write_str("invalid port"),
            Self::Busy => f.write_str("operation already pending"),
            Self::NotConnected => f.write_str("socket not connected"),
            Self::ConnectFailed => f.write_str("socket connect failed"),
            Self::PartialSend { sent, expected } => {
                write!(f, "partial send ({sent}/{expected} bytes)")
            }
            Self::SendFailed => f.write_str("socket send failed"),
        }
    }
}

/// Result of one operation, tagged by the caller.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Completion<K> {
    pub tag: K,
    pub result: NetworkResult,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NetworkStatistics {
    pub http_requests_sent: u32,
    pub http_requests_successful: u32,
    pub socket_connections_made: u32,
    pub socket_bytes_sent: u32,
    pub socket_bytes_received: u32,
}

#[derive(Debug)]
enum PendingKind {
    Http { body: Vec<u8> },
    Stream { max_bytes: usize, received: usize },
}

#[derive(Debug)]
struct PendingOp<K> {
    tag: K,
    started_ms: u64,
    timeout_ms: u32,
    kind: PendingKind,
}

/// Accepts `http(s)://host[:port][/path]` with a `[A-Za-z0-9.-]` host.
pub fn is_valid_url(url: &str) -> bool {
    let Some(rest) = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
    else {
        return false;
    };

    let host_len = rest
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || *b == b'.' || *b == b'-')
        .count();
    if host_len == 0 {
        return false;
    }

    let mut rest = &rest[host_len..];
    if let Some(after_colon) = rest.strip_prefix(':') {
        let digits = after_colon.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return false;
        }
        rest = &after_colon[digits..];
    }

    rest.is_empty() || (rest.starts_with('/') && !rest.contains(['\r', '\n']))
}

/// Accepts 1..=253 characters of `[A-Za-z0-9.-]`.
pub fn is_valid_host(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= MAX_HOST_LEN
        && host
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-')
}

pub struct NetworkClient<T, K> {
    transport: T,
    pending: Option<PendingOp<K>>,
    completions: Deque<Completion<K>, COMPLETION_QUEUE>,
    socket_open: bool,
    http_timeout_ms: u32,
    socket_timeout_ms: u32,
    stats: NetworkStatistics,
    last_error: heapless::String<LAST_ERROR_CAPACITY>,
}

impl<T, K> NetworkClient<T, K>
where
    T: Transport,
    K: Copy + fmt::Debug,
{
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            pending: None,
            completions: Deque::new(),
            socket_open: false,
            http_timeout_ms: DEFAULT_HTTP_TIMEOUT_MS,
            socket_timeout_ms: DEFAULT_SOCKET_TIMEOUT_MS,
            stats: NetworkStatistics::default(),
            last_error: heapless::String::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// `0` restores the default.
    pub fn set_http_timeout(&mut self, timeout_ms: u32) {
        self.http_timeout_ms = if timeout_ms == 0 {
            DEFAULT_HTTP_TIMEOUT_MS
        } else {
            timeout_ms
        };
    }

    /// `0` restores the default.
    pub fn set_socket_timeout(&mut self, timeout_ms: u32) {
        self.socket_timeout_ms = if timeout_ms == 0 {
            DEFAULT_SOCKET_TIMEOUT_MS
        } else {
            timeout_ms
        };
    }

    pub fn http_timeout_ms(&self) -> u32 {
        self.http_timeout_ms
    }

    pub fn is_operation_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_socket_connected(&mut self) -> bool {
        self.socket_open && matches!(self.transport.socket_poll_connect(), Poll::Ready(Ok(())))
    }

    /// Reports how the handshake of the open socket ended, if it has.
    ///
    /// A failed handshake closes the socket.
    pub fn poll_socket_connect(&mut self) -> Poll<Result<(), SocketError>> {
        if !self.socket_open {
            return Poll::Ready(Err(SocketError::NotConnected));
        }

        match self.transport.socket_poll_connect() {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(())) => Poll::Ready(Ok(())),
            Poll::Ready(Err(err)) => {
                let message = format!("Socket connect failed: {err:?}");
                self.set_last_error(&message);
                warn!("net: {message}");
                self.socket_close();
                Poll::Ready(Err(SocketError::ConnectFailed))
            }
        }
    }

    pub fn take_completion(&mut self) -> Option<Completion<K>> {
        self.completions.pop_front()
    }

    /// Drops completions nobody will consume.
    pub fn discard_completions(&mut self) {
        self.completions.clear();
    }

    pub fn http_get(&mut self, tag: K, url: &str, timeout_ms: u32, now_ms: u64) -> bool {
        self.start_http(tag, HttpRequest::get(url, timeout_ms), now_ms)
    }

    pub fn http_post(
        &mut self,
        tag: K,
        url: &str,
        body: &[u8],
        content_type: &str,
        timeout_ms: u32,
        now_ms: u64,
    ) -> bool {
        self.start_http(
            tag,
            HttpRequest::post(url, body, content_type, timeout_ms),
            now_ms,
        )
    }

    fn start_http(&mut self, tag: K, mut request: HttpRequest<'_>, now_ms: u64) -> bool {
        if !is_valid_url(request.url) {
            warn!("net: invalid url {}", request.url);
            self.fail(tag, ErrorType::InvalidResponse, "Invalid URL format");
            return false;
        }
        if self.pending.is_some() {
            warn!("net: http {} rejected, operation pending", request.method.as_str());
            self.fail(tag, ErrorType::ServerUnreachable, "Operation already pending");
            return false;
        }

        if request.timeout_ms == 0 {
            request.timeout_ms = self.http_timeout_ms;
        }
        debug!("net: http {} {}", request.method.as_str(), request.url);

        if let Err(err) = self.transport.http_start(&request) {
            let message = format!("HTTP request failed: {err:?}");
            self.fail(tag, ErrorType::ServerUnreachable, &message);
            return false;
        }

        self.stats.http_requests_sent = self.stats.http_requests_sent.saturating_add(1);
        self.pending = Some(PendingOp {
            tag,
            started_ms: now_ms,
            timeout_ms: request.timeout_ms,
            kind: PendingKind::Http { body: Vec::new() },
        });

        // Blocking transports finish here.
        self.poll_http();
        true
    }

    /// Validates the target and opens the connection. `InProgress` counts as success.
    pub fn socket_connect(
        &mut self,
        host: &str,
        port: u16,
        timeout_ms: u32,
    ) -> Result<(), SocketError> {
        if !is_valid_host(host) {
            self.set_last_error("Invalid host");
            return Err(SocketError::InvalidHost);
        }
        if port == 0 {
            self.set_last_error("Invalid port");
            return Err(SocketError::InvalidPort);
        }
        if self.pending.is_some() {
            return Err(SocketError::Busy);
        }
        if self.socket_open {
            self.socket_close();
        }

        let timeout_ms = if timeout_ms == 0 {
            self.socket_timeout_ms
        } else {
            timeout_ms
        };

        match self.transport.socket_connect(host, port, timeout_ms) {
            Ok(progress) => {
                self.socket_open = true;
                self.stats.socket_connections_made =
                    self.stats.socket_connections_made.saturating_add(1);
                info!("net: socket {host}:{port} {progress:?}");
                Ok(())
            }
            Err(err) => {
                let message = format!("Socket connect failed: {err:?}");
                self.set_last_error(&message);
                warn!("net: {message}");
                Err(SocketError::ConnectFailed)
            }
        }
    }

    /// Sends `bytes` in one call; anything short of all of them is an error.
    pub fn socket_send(&mut self, bytes: &[u8]) -> Result<(), SocketError> {
        if !self.socket_open {
            return Err(SocketError::NotConnected);
        }

        match self.transport.socket_send(bytes) {
            Ok(sent) => {
                self.stats.socket_bytes_sent =
                    self.stats.socket_bytes_sent.saturating_add(sent as u32);
                if sent == bytes.len() {
                    Ok(())
                } else {
                    self.set_last_error("Partial socket send");
                    Err(SocketError::PartialSend {
                        sent,
                        expected: bytes.len(),
                    })
                }
            }
            Err(err) => {
                let message = format!("Socket send failed: {err:?}");
                self.set_last_error(&message);
                Err(SocketError::SendFailed)
            }
        }
    }

    /// Streams socket bytes to the `update` sink until `max_bytes` arrive
    /// (`0` = unbounded), the peer closes, or the timeout fires.
    pub fn socket_receive_stream(
        &mut self,
        tag: K,
        max_bytes: usize,
        timeout_ms: u32,
        now_ms: u64,
    ) -> Result<(), SocketError> {
        if !self.socket_open {
            return Err(SocketError::NotConnected);
        }
        if self.pending.is_some() {
            return Err(SocketError::Busy);
        }

        let timeout_ms = if timeout_ms == 0 {
            self.socket_timeout_ms
        } else {
            timeout_ms
        };
        self.pending = Some(PendingOp {
            tag,
            started_ms: now_ms,
            timeout_ms,
            kind: PendingKind::Stream {
                max_bytes,
                received: 0,
            },
        });
        debug!("net: stream started, max={max_bytes} timeout={timeout_ms}ms");
        Ok(())
    }

    pub fn socket_close(&mut self) {
        if self.socket_open {
            self.transport.socket_close();
            self.socket_open = false;
            debug!("net: socket closed");
        }
    }

    /// Force-completes the pending operation as cancelled.
    pub fn cancel_all_operations(&mut self) {
        if let Some(op) = self.pending.take() {
            match op.kind {
                PendingKind::Http { .. } => self.transport.http_abort(),
                PendingKind::Stream { .. } => self.socket_close(),
            }
            info!("net: cancelled pending {:?}", op.tag);
            self.fail(op.tag, ErrorType::ServerUnreachable, "Operation cancelled");
        }
    }

    /// Drives timeouts, pending HTTP and stream reads.
    ///
    /// Stream bytes are handed to `on_chunk` as they arrive.
    pub fn update<F>(&mut self, now_ms: u64, mut on_chunk: F)
    where
        F: FnMut(K, &[u8]),
    {
        let Some(op) = self.pending.as_ref() else {
            return;
        };

        if now_ms.saturating_sub(op.started_ms) >= op.timeout_ms as u64 {
            self.time_out();
            return;
        }

        if matches!(op.kind, PendingKind::Http { .. }) {
            self.poll_http();
        } else {
            self.poll_stream(&mut on_chunk);
        }
    }

    pub fn statistics(&self) -> NetworkStatistics {
        self.stats
    }

    pub fn statistics_summary(&self) -> String {
        format!(
            "[STATS] HTTP: {} sent, {} successful; Socket: {} connections, {} sent, {} received bytes",
            self.stats.http_requests_sent,
            self.stats.http_requests_successful,
            self.stats.socket_connections_made,
            self.stats.socket_bytes_sent,
            self.stats.socket_bytes_received
        )
    }

    pub fn reset_statistics(&mut self) {
        self.stats = NetworkStatistics::default();
    }

    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    fn time_out(&mut self) {
        let Some(op) = self.pending.take() else {
            return;
        };

        let (kind, message) = match op.kind {
            PendingKind::Http { .. } => {
                self.transport.http_abort();
                (ErrorType::ServerUnreachable, "HTTP request timeout")
            }
            PendingKind::Stream { .. } => {
                self.socket_close();
                (ErrorType::SocketError, "Socket operation timeout")
            }
        };
        warn!("net: {message} after {}ms", op.timeout_ms);
        self.fail(op.tag, kind, message);
    }

    fn poll_http(&mut self) {
        let Some(PendingOp {
            kind: PendingKind::Http { body },
            ..
        }) = self.pending.as_mut()
        else {
            return;
        };

        let status = match self.transport.http_poll(body) {
            Poll::Pending => return,
            Poll::Ready(status) => status,
        };
        let Some(op) = self.pending.take() else {
            return;
        };
        let PendingKind::Http { body } = op.kind else {
            return;
        };

        match status {
            Ok(code) if (200..300).contains(&code) => {
                self.stats.http_requests_successful =
                    self.stats.http_requests_successful.saturating_add(1);
                debug!("net: http status={code} bytes={}", body.len());
                self.push(op.tag, NetworkResult::ok(Some(code), body));
            }
            Ok(code) => {
                let message = format!("HTTP request failed with status {code}");
                self.set_last_error(&message);
                warn!("net: {message}");
                self.push(
                    op.tag,
                    NetworkResult::failed(ErrorType::InvalidResponse, message).with_status(code),
                );
            }
            Err(err) => {
                let message = format!("HTTP request failed: {err:?}");
                self.fail(op.tag, ErrorType::ServerUnreachable, &message);
            }
        }
    }

    fn poll_stream<F>(&mut self, on_chunk: &mut F)
    where
        F: FnMut(K, &[u8]),
    {
        let mut buf = [0u8; READ_CHUNK_BYTES];

        for _ in 0..READS_PER_UPDATE {
            let Some(PendingOp {
                tag,
                kind: PendingKind::Stream {
                    max_bytes,
                    received,
                },
                ..
            }) = self.pending.as_mut()
            else {
                return;
            };
            let tag = *tag;

            let want = if *max_bytes == 0 {
                READ_CHUNK_BYTES
            } else {
                (*max_bytes - *received).min(READ_CHUNK_BYTES)
            };

            let read = self.transport.socket_read(&mut buf[..want]);
            match read {
                Ok(SocketRead::Data(n)) => {
                    let n = n.min(want);
                    *received += n;
                    let done = *max_bytes > 0 && *received >= *max_bytes;
                    self.stats.socket_bytes_received =
                        self.stats.socket_bytes_received.saturating_add(n as u32);
                    on_chunk(tag, &buf[..n]);
                    if done {
                        self.finish_stream("byte count reached");
                        return;
                    }
                }
                Ok(SocketRead::WouldBlock) => return,
                Ok(SocketRead::Closed) => {
                    self.finish_stream("peer closed");
                    return;
                }
                Err(err) => {
                    self.pending = None;
                    self.socket_close();
                    let message = format!("Socket read failed: {err:?}");
                    self.fail(tag, ErrorType::SocketError, &message);
                    return;
                }
            }
        }
    }

    fn finish_stream(&mut self, reason: &str) {
        let Some(op) = self.pending.take() else {
            return;
        };
        let PendingKind::Stream { received, .. } = op.kind else {
            return;
        };

        info!("net: stream complete ({reason}), {received} bytes");
        self.push(
            op.tag,
            NetworkResult::ok(None, Vec::new()).with_bytes_received(received),
        );
    }

    fn fail(&mut self, tag: K, kind: ErrorType, message: &str) {
        self.set_last_error(message);
        self.push(tag, NetworkResult::failed(kind, message));
    }

    fn push(&mut self, tag: K, result: NetworkResult) {
        if self.completions.is_full() {
            if let Some(dropped) = self.completions.pop_front() {
                warn!("net: completion queue full, dropping {:?}", dropped.tag);
            }
        }
        let _ = self.completions.push_back(Completion { tag, result });
    }

    fn set_last_error(&mut self, message: &str) {
        self.last_error = bounded(message);
    }
}
