//! Minimal HTTP/1.0 framing for transports that speak TCP directly.

use alloc::{format, string::String, vec::Vec};
use core::fmt;

use super::HttpMethod;

/// Upper bound for the status line plus headers.
pub const MAX_HEAD_BYTES: usize = 2048;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UrlParts<'a> {
    pub https: bool,
    pub host: &'a str,
    pub port: u16,
    /// Always starts with `/`.
    pub path: &'a str,
}

/// Splits `http(s)://host[:port][/path]`. The port defaults to 80 or 443.
pub fn split_url(url: &str) -> Option<UrlParts<'_>> {
    let (https, rest) = if let Some(rest) = url.strip_prefix("http://") {
        (false, rest)
    } else {
        (true, url.strip_prefix("https://")?)
    };

    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, "/"),
    };
    let (host, port) = match authority.split_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().ok().filter(|p| *p > 0)?),
        None => (authority, if https { 443 } else { 80 }),
    };
    if host.is_empty() {
        return None;
    }

    Some(UrlParts {
        https,
        host,
        port,
        path,
    })
}

/// Request line and headers, terminated by the blank line.
pub fn request_head(
    method: HttpMethod,
    url: &UrlParts<'_>,
    content_type: &str,
    body_len: usize,
) -> String {
    let mut head = format!(
        "{} {} HTTP/1.0\r\nHost: {}\r\nConnection: close\r\n",
        method.as_str(),
        url.path,
        url.host
    );
    if method == HttpMethod::Post {
        let content_type = if content_type.is_empty() {
            "text/plain"
        } else {
            content_type
        };
        head.push_str(&format!(
            "Content-Type: {content_type}\r\nContent-Length: {body_len}\r\n"
        ));
    }
    head.push_str("\r\n");
    head
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HttpWireError {
    HeadTooLarge,
    MalformedStatus,
    /// Connection closed before the head or the announced body was complete.
    UnexpectedEof,
}

impl fmt::Display for HttpWireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::HeadTooLarge => "response head too large",
            Self::MalformedStatus => "malformed status line",
            Self::UnexpectedEof => "connection closed mid-response",
        })
    }
}

/// Incremental response reader; body bytes go straight to the caller's buffer.
#[derive(Debug, Default)]
pub struct ResponseParser {
    head: Vec<u8>,
    status: Option<u16>,
    content_length: Option<usize>,
    body_received: usize,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    /// True when the announced body length has been reached.
    pub fn is_complete(&self) -> bool {
        self.status.is_some()
            && self
                .content_length
                .is_some_and(|len| self.body_received >= len)
    }

    /// Consumes received bytes, appending body bytes to `body`.
    pub fn feed(&mut self, mut bytes: &[u8], body: &mut Vec<u8>) -> Result<(), HttpWireError> {
        if self.status.is_none() {
            let before = self.head.len();
            self.head.extend_from_slice(bytes);

            let Some(end) = find_head_end(&self.head) else {
                if self.head.len() > MAX_HEAD_BYTES {
                    return Err(HttpWireError::HeadTooLarge);
                }
                return Ok(());
            };

            self.parse_head(end)?;
            let consumed = end.saturating_sub(before);
            bytes = &bytes[consumed.min(bytes.len())..];
            self.head.clear();
        }

        let take = match self.content_length {
            Some(len) => bytes.len().min(len.saturating_sub(self.body_received)),
            None => bytes.len(),
        };
        body.extend_from_slice(&bytes[..take]);
        self.body_received += take;
        Ok(())
    }

    /// Resolves the exchange once the peer closed the connection.
    pub fn finish(&self) -> Result<u16, HttpWireError> {
        let status = self.status.ok_or(HttpWireError::UnexpectedEof)?;
        match self.content_length {
            Some(len) if self.body_received < len => Err(HttpWireError::UnexpectedEof),
            _ => Ok(status),
        }
    }

    fn parse_head(&mut self, end: usize) -> Result<(), HttpWireError> {
        let head = core::str::from_utf8(&self.head[..end])
            .map_err(|_| HttpWireError::MalformedStatus)?;
        let mut lines = head.split("\r\n");

        let status_line = lines.next().ok_or(HttpWireError::MalformedStatus)?;
        let mut parts = status_line.split(' ');
        let version = parts.next().unwrap_or("");
        if !version.starts_with("HTTP/") {
            return Err(HttpWireError::MalformedStatus);
        }
        let status = parts
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .filter(|code| (100..600).contains(code))
            .ok_or(HttpWireError::MalformedStatus)?;

        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                if name.trim().eq_ignore_ascii_case("content-length") {
                    self.content_length = value.trim().parse::<usize>().ok();
                }
            }
        }

        self.status = Some(status);
        Ok(())
    }
}

/// Index just past the `\r\n\r\n` terminator.
fn find_head_end(bytes: &[u8]) -> Option<usize> {
    bytes.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}
