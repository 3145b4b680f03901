use alloc::{
    collections::VecDeque,
    string::{String, ToString},
    vec::Vec,
};
use core::task::Poll;

use super::{ConnectProgress, HttpMethod, HttpRequest, SocketRead, Transport};

/// Canned reply for the next HTTP exchange.
#[derive(Clone, Debug)]
pub(crate) enum HttpReply {
    Status(u16, Vec<u8>),
    Error(&'static str),
    /// Never completes.
    Hang,
}

impl HttpReply {
    pub(crate) fn ok(body: &[u8]) -> Self {
        Self::Status(200, body.to_vec())
    }
}

/// One scripted `socket_read` outcome.
#[derive(Clone, Debug)]
pub(crate) enum ReadStep {
    Data(Vec<u8>),
    WouldBlock,
    Closed,
    Error(&'static str),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct SentRequest {
    pub method: HttpMethod,
    pub url: String,
    pub body: Vec<u8>,
}

/// Transport that answers from queued scripts and records every call.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    pub http_replies: VecDeque<HttpReply>,
    pub requests: Vec<SentRequest>,
    in_flight: Option<HttpReply>,
    /// `http_start` calls made while another exchange was in flight.
    pub overlapping_starts: usize,
    pub aborts: usize,

    pub connect_error: Option<&'static str>,
    pub connect_in_progress: bool,
    pub handshake_done: bool,
    /// Fails the handshake of an in-progress connect.
    pub handshake_error: Option<&'static str>,
    pub connects: Vec<(String, u16)>,
    pub send_limit: Option<usize>,
    pub sent: Vec<u8>,
    pub reads: VecDeque<ReadStep>,
    pub closes: usize,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reply(mut self, reply: HttpReply) -> Self {
        self.http_replies.push_back(reply);
        self
    }

    pub(crate) fn read(mut self, step: ReadStep) -> Self {
        self.reads.push_back(step);
        self
    }
}

impl Transport for ScriptedTransport {
    type Error = &'static str;

    fn http_start(&mut self, request: &HttpRequest<'_>) -> Result<(), Self::Error> {
        if self.in_flight.is_some() {
            self.overlapping_starts += 1;
        }
        self.requests.push(SentRequest {
            method: request.method,
            url: request.url.to_string(),
            body: request.body.to_vec(),
        });
        self.in_flight = Some(self.http_replies.pop_front().unwrap_or(HttpReply::Hang));
        Ok(())
    }

    fn http_poll(&mut self, body: &mut Vec<u8>) -> Poll<Result<u16, Self::Error>> {
        match self.in_flight.take() {
            Some(HttpReply::Status(status, bytes)) => {
                body.extend_from_slice(&bytes);
                Poll::Ready(Ok(status))
            }
            Some(HttpReply::Error(err)) => Poll::Ready(Err(err)),
            Some(HttpReply::Hang) => {
                self.in_flight = Some(HttpReply::Hang);
                Poll::Pending
            }
            None => Poll::Ready(Err("no exchange in flight")),
        }
    }

    fn http_abort(&mut self) {
        self.in_flight = None;
        self.aborts += 1;
    }

    fn socket_connect(
        &mut self,
        host: &str,
        port: u16,
        _timeout_ms: u32,
    ) -> Result<ConnectProgress, Self::Error> {
        self.connects.push((host.to_string(), port));
        if let Some(err) = self.connect_error {
            return Err(err);
        }
        if self.connect_in_progress {
            Ok(ConnectProgress::InProgress)
        } else {
            self.handshake_done = true;
            Ok(ConnectProgress::Connected)
        }
    }

    fn socket_poll_connect(&mut self) -> Poll<Result<(), Self::Error>> {
        if let Some(err) = self.handshake_error {
            Poll::Ready(Err(err))
        } else if self.handshake_done {
            Poll::Ready(Ok(()))
        } else {
            Poll::Pending
        }
    }

    fn socket_send(&mut self, bytes: &[u8]) -> Result<usize, Self::Error> {
        let n = self.send_limit.map_or(bytes.len(), |limit| limit.min(bytes.len()));
        self.sent.extend_from_slice(&bytes[..n]);
        Ok(n)
    }

    fn socket_read(&mut self, buf: &mut [u8]) -> Result<SocketRead, Self::Error> {
        match self.reads.pop_front() {
            None | Some(ReadStep::WouldBlock) => Ok(SocketRead::WouldBlock),
            Some(ReadStep::Closed) => Ok(SocketRead::Closed),
            Some(ReadStep::Error(err)) => Err(err),
            Some(ReadStep::Data(mut bytes)) => {
                let n = buf.len().min(bytes.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    let rest = bytes.split_off(n);
                    self.reads.push_front(ReadStep::Data(rest));
                }
                Ok(SocketRead::Data(n))
            }
        }
    }

    fn socket_close(&mut self) {
        self.closes += 1;
        self.handshake_done = false;
    }
}
