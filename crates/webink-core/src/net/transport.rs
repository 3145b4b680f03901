use alloc::vec::Vec;
use core::{fmt, task::Poll};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// One HTTP exchange handed to a [`Transport`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HttpRequest<'a> {
    pub method: HttpMethod,
    pub url: &'a str,
    pub body: &'a [u8],
    pub content_type: &'a str,
    pub timeout_ms: u32,
}

impl<'a> HttpRequest<'a> {
    pub const fn get(url: &'a str, timeout_ms: u32) -> Self {
        Self {
            method: HttpMethod::Get,
            url,
            body: &[],
            content_type: "",
            timeout_ms,
        }
    }

    pub const fn post(url: &'a str, body: &'a [u8], content_type: &'a str, timeout_ms: u32) -> Self {
        Self {
            method: HttpMethod::Post,
            url,
            body,
            content_type,
            timeout_ms,
        }
    }
}

/// Result of starting a TCP connect.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectProgress {
    Connected,
    /// Handshake still running; sends may not be accepted yet.
    InProgress,
}

/// Result of one non-blocking socket read.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SocketRead {
    /// `n` bytes were written to the front of the buffer.
    Data(usize),
    WouldBlock,
    /// Peer closed the connection.
    Closed,
}

/// Byte mover underneath [`super::NetworkClient`].
///
/// Implementations may block inside `http_start` and report the response on
/// the first `http_poll`, or run the exchange in the background.
pub trait Transport {
    type Error: fmt::Debug;

    fn http_start(&mut self, request: &HttpRequest<'_>) -> Result<(), Self::Error>;

    /// Appends newly received body bytes to `body`.
    ///
    /// Returns the status code once the response is complete.
    fn http_poll(&mut self, body: &mut Vec<u8>) -> Poll<Result<u16, Self::Error>>;

    /// Drops the in-flight exchange, if any.
    fn http_abort(&mut self);

    fn socket_connect(
        &mut self,
        host: &str,
        port: u16,
        timeout_ms: u32,
    ) -> Result<ConnectProgress, Self::Error>;

    /// `Ready(Ok)` once the handshake of the last connect finished,
    /// `Ready(Err)` if it failed.
    fn socket_poll_connect(&mut self) -> Poll<Result<(), Self::Error>>;

    /// Returns how many bytes were accepted.
    fn socket_send(&mut self, bytes: &[u8]) -> Result<usize, Self::Error>;

    fn socket_read(&mut self, buf: &mut [u8]) -> Result<SocketRead, Self::Error>;

    fn socket_close(&mut self);
}
