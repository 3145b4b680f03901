//! Hands controller I/O to the async network worker.
//!
//! The controller runs a synchronous tick and talks to a [`ChannelTransport`].
//! The worker task owns the embassy-net sockets, takes [`NetCommand`]s off the
//! bridge and answers with [`NetReply`]s. Raw socket payload bypasses the
//! reply channel and flows through a byte pipe.

use alloc::{string::String, vec::Vec};
use core::{
    sync::atomic::{AtomicU8, AtomicU32, Ordering},
    task::Poll,
};

use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    channel::{Channel, TrySendError},
    pipe::Pipe,
};
use log::debug;
use webink_core::net::{
    ConnectProgress, HttpMethod, HttpRequest, SocketRead, Transport, http::HttpWireError,
};

pub const COMMAND_QUEUE: usize = 4;
pub const REPLY_QUEUE: usize = 8;
/// Socket bytes buffered between the worker and the controller.
pub const STREAM_PIPE_BYTES: usize = 2048;

/// Id 0 never names a live operation.
const NO_OPERATION: u32 = 0;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NetCommand {
    Http {
        id: u32,
        method: HttpMethod,
        url: String,
        content_type: String,
        body: Vec<u8>,
        timeout_ms: u32,
    },
    Connect {
        id: u32,
        host: String,
        port: u16,
        timeout_ms: u32,
    },
    Send {
        id: u32,
        bytes: Vec<u8>,
    },
    Close {
        id: u32,
    },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NetReply {
    Body { id: u32, bytes: Vec<u8> },
    Done { id: u32, result: Result<u16, NetFailure> },
}

/// Why a bridged operation failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NetFailure {
    /// Command queue full.
    Busy,
    NoOperation,
    /// The controller dropped the exchange before it finished.
    Aborted,
    BadUrl,
    TlsUnsupported,
    Dns,
    Connect,
    Write,
    Read,
    NotConnected,
    Wire(HttpWireError),
}

/// Where the worker's raw socket session stands.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum SocketLink {
    Idle = 0,
    Connecting = 1,
    Connected = 2,
    /// Peer closed; buffered bytes may still be pending in the pipe.
    Closed = 3,
    Failed = 4,
}

impl SocketLink {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Closed,
            4 => Self::Failed,
            _ => Self::Idle,
        }
    }
}

/// Shared queues between [`ChannelTransport`] and the worker.
pub struct NetBridge {
    commands: Channel<CriticalSectionRawMutex, NetCommand, COMMAND_QUEUE>,
    replies: Channel<CriticalSectionRawMutex, NetReply, REPLY_QUEUE>,
    stream: Pipe<CriticalSectionRawMutex, STREAM_PIPE_BYTES>,
    active_http: AtomicU32,
    socket_session: AtomicU32,
    socket_link: AtomicU8,
}

impl NetBridge {
    pub const fn new() -> Self {
        Self {
            commands: Channel::new(),
            replies: Channel::new(),
            stream: Pipe::new(),
            active_http: AtomicU32::new(NO_OPERATION),
            socket_session: AtomicU32::new(NO_OPERATION),
            socket_link: AtomicU8::new(SocketLink::Idle as u8),
        }
    }

    /// Worker side: waits for the next command.
    pub async fn next_command(&self) -> NetCommand {
        self.commands.receive().await
    }

    /// False once the controller aborted or replaced exchange `id`.
    pub fn is_http_active(&self, id: u32) -> bool {
        id != NO_OPERATION && self.active_http.load(Ordering::Acquire) == id
    }

    /// Queues a reply, handing it back when the queue is full.
    pub fn try_reply(&self, reply: NetReply) -> Result<(), NetReply> {
        self.replies.try_send(reply).map_err(|TrySendError::Full(reply)| reply)
    }

    pub fn is_socket_session(&self, id: u32) -> bool {
        id != NO_OPERATION && self.socket_session.load(Ordering::Acquire) == id
    }

    /// Publishes the link state of session `id`; ignored for stale sessions.
    pub fn set_socket_link(&self, id: u32, link: SocketLink) {
        if self.is_socket_session(id) {
            self.socket_link.store(link as u8, Ordering::Release);
        }
    }

    pub fn socket_link(&self) -> SocketLink {
        SocketLink::from_raw(self.socket_link.load(Ordering::Acquire))
    }

    /// Worker side: drops leftovers of an earlier session.
    pub fn reset_stream(&self) {
        self.stream.clear();
    }

    /// Worker side: pushes received socket bytes, waiting for room.
    pub async fn write_stream(&self, bytes: &[u8]) {
        self.stream.write_all(bytes).await;
    }
}

impl Default for NetBridge {
    fn default() -> Self {
        Self::new()
    }
}

/// Controller-side [`Transport`] backed by a [`NetBridge`].
pub struct ChannelTransport {
    bridge: &'static NetBridge,
    last_id: u32,
    http_id: Option<u32>,
    socket_id: Option<u32>,
}

impl ChannelTransport {
    pub fn new(bridge: &'static NetBridge) -> Self {
        Self {
            bridge,
            last_id: NO_OPERATION,
            http_id: None,
            socket_id: None,
        }
    }

    fn allocate_id(&mut self) -> u32 {
        self.last_id = self.last_id.wrapping_add(1);
        if self.last_id == NO_OPERATION {
            self.last_id = 1;
        }
        self.last_id
    }

    fn send_command(&self, command: NetCommand) -> Result<(), NetFailure> {
        self.bridge
            .commands
            .try_send(command)
            .map_err(|_| NetFailure::Busy)
    }

    fn drain_replies(&self) {
        while self.bridge.replies.try_receive().is_ok() {}
    }
}

impl Transport for ChannelTransport {
    type Error = NetFailure;

    fn http_start(&mut self, request: &HttpRequest<'_>) -> Result<(), Self::Error> {
        self.http_abort();

        let id = self.allocate_id();
        self.bridge.active_http.store(id, Ordering::Release);
        let sent = self.send_command(NetCommand::Http {
            id,
            method: request.method,
            url: String::from(request.url),
            content_type: String::from(request.content_type),
            body: request.body.to_vec(),
            timeout_ms: request.timeout_ms,
        });
        if let Err(err) = sent {
            self.bridge.active_http.store(NO_OPERATION, Ordering::Release);
            return Err(err);
        }

        self.http_id = Some(id);
        Ok(())
    }

    fn http_poll(&mut self, body: &mut Vec<u8>) -> Poll<Result<u16, Self::Error>> {
        let Some(id) = self.http_id else {
            return Poll::Ready(Err(NetFailure::NoOperation));
        };

        while let Ok(reply) = self.bridge.replies.try_receive() {
            match reply {
                NetReply::Body { id: reply_id, bytes } if reply_id == id => {
                    body.extend_from_slice(&bytes);
                }
                NetReply::Done {
                    id: reply_id,
                    result,
                } if reply_id == id => {
                    self.http_id = None;
                    self.bridge.active_http.store(NO_OPERATION, Ordering::Release);
                    return Poll::Ready(result);
                }
                NetReply::Body { id: stale, .. } | NetReply::Done { id: stale, .. } => {
                    debug!("net: dropping reply for stale exchange {stale}");
                }
            }
        }

        Poll::Pending
    }

    fn http_abort(&mut self) {
        if self.http_id.take().is_some() {
            self.bridge.active_http.store(NO_OPERATION, Ordering::Release);
            self.drain_replies();
        }
    }

    fn socket_connect(
        &mut self,
        host: &str,
        port: u16,
        timeout_ms: u32,
    ) -> Result<ConnectProgress, Self::Error> {
        self.socket_close();

        let id = self.allocate_id();
        self.bridge.socket_session.store(id, Ordering::Release);
        self.bridge.set_socket_link(id, SocketLink::Connecting);
        self.bridge.stream.clear();
        let sent = self.send_command(NetCommand::Connect {
            id,
            host: String::from(host),
            port,
            timeout_ms,
        });
        if let Err(err) = sent {
            self.bridge.set_socket_link(id, SocketLink::Idle);
            self.bridge
                .socket_session
                .store(NO_OPERATION, Ordering::Release);
            return Err(err);
        }

        self.socket_id = Some(id);
        Ok(ConnectProgress::InProgress)
    }

    fn socket_poll_connect(&mut self) -> Poll<Result<(), Self::Error>> {
        if self.socket_id.is_none() {
            return Poll::Ready(Err(NetFailure::NotConnected));
        }

        match self.bridge.socket_link() {
            SocketLink::Connected => Poll::Ready(Ok(())),
            SocketLink::Failed => Poll::Ready(Err(NetFailure::Connect)),
            // Peer hung up before the request went out.
            SocketLink::Closed => Poll::Ready(Err(NetFailure::NotConnected)),
            SocketLink::Idle | SocketLink::Connecting => Poll::Pending,
        }
    }

    fn socket_send(&mut self, bytes: &[u8]) -> Result<usize, Self::Error> {
        let Some(id) = self.socket_id else {
            return Err(NetFailure::NotConnected);
        };
        if self.bridge.socket_link() != SocketLink::Connected {
            return Err(NetFailure::NotConnected);
        }

        self.send_command(NetCommand::Send {
            id,
            bytes: bytes.to_vec(),
        })?;
        Ok(bytes.len())
    }

    fn socket_read(&mut self, buf: &mut [u8]) -> Result<SocketRead, Self::Error> {
        if self.socket_id.is_none() {
            return Err(NetFailure::NotConnected);
        }

        // The worker drains the socket into the pipe before flagging the end,
        // so the link is sampled first.
        let link = self.bridge.socket_link();
        match self.bridge.stream.try_read(buf) {
            Ok(n) => Ok(SocketRead::Data(n)),
            Err(_) => match link {
                SocketLink::Failed => Err(NetFailure::Read),
                SocketLink::Closed => Ok(SocketRead::Closed),
                SocketLink::Idle | SocketLink::Connecting | SocketLink::Connected => {
                    Ok(SocketRead::WouldBlock)
                }
            },
        }
    }

    fn socket_close(&mut self) {
        let Some(id) = self.socket_id.take() else {
            return;
        };

        self.bridge.set_socket_link(id, SocketLink::Idle);
        self.bridge
            .socket_session
            .store(NO_OPERATION, Ordering::Release);
        self.bridge.stream.clear();
        // The worker also notices the retired session id on its own.
        let _ = self.send_command(NetCommand::Close { id });
    }
}
