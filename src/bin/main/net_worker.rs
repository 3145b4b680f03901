//! Runs bridged network commands on the embassy-net stack.

use alloc::vec::Vec;
use core::net::Ipv4Addr;

use embassy_futures::select::{Either, select};
use embassy_net::{IpAddress, Stack, dns::DnsQueryType, tcp::TcpSocket};
use embassy_time::{Duration as EmbassyDuration, Timer, WithTimeout};
use log::{debug, info, warn};
use webink_core::net::{
    HttpMethod,
    http::{self, ResponseParser},
};
use webink_hal_esp32s3::network::bridge::{
    NetBridge, NetCommand, NetFailure, NetReply, SocketLink,
};

const RX_BUFFER_BYTES: usize = 2048;
const TX_BUFFER_BYTES: usize = 1024;
const READ_CHUNK_BYTES: usize = 512;
const CONNECT_TIMEOUT_MS: u32 = 10_000;
const SOCKET_IDLE_TIMEOUT_SECS: u64 = 30;
const REPLY_RETRY_MS: u64 = 5;

/// Serves one command at a time, forever.
pub(super) async fn run(stack: Stack<'_>, bridge: &'static NetBridge) -> ! {
    let mut rx_buf = [0u8; RX_BUFFER_BYTES];
    let mut tx_buf = [0u8; TX_BUFFER_BYTES];
    let mut deferred = None;

    loop {
        let command = match deferred.take() {
            Some(command) => command,
            None => bridge.next_command().await,
        };

        match command {
            NetCommand::Http {
                id,
                method,
                url,
                content_type,
                body,
                timeout_ms,
            } => {
                let mut socket = TcpSocket::new(stack, &mut rx_buf, &mut tx_buf);
                let request = HttpJob {
                    id,
                    method,
                    url: &url,
                    content_type: &content_type,
                    body: &body,
                    timeout_ms,
                };
                let result = http_exchange(stack, &mut socket, bridge, &request).await;
                socket.abort();

                match result {
                    Ok(status) => debug!("net: http {} {} status={}", method.as_str(), url, status),
                    Err(NetFailure::Aborted) => debug!("net: http {} {} aborted", method.as_str(), url),
                    Err(err) => warn!("net: http {} {} failed: {:?}", method.as_str(), url, err),
                }
                if result != Err(NetFailure::Aborted) {
                    let _ = forward(bridge, id, NetReply::Done { id, result }).await;
                }
            }
            NetCommand::Connect {
                id,
                host,
                port,
                timeout_ms,
            } => {
                let mut socket = TcpSocket::new(stack, &mut rx_buf, &mut tx_buf);
                deferred = socket_session(stack, &mut socket, bridge, id, &host, port, timeout_ms).await;
                socket.abort();
            }
            NetCommand::Send { id, .. } | NetCommand::Close { id } => {
                debug!("net: no live socket session for command {}", id);
            }
        }
    }
}

struct HttpJob<'a> {
    id: u32,
    method: HttpMethod,
    url: &'a str,
    content_type: &'a str,
    body: &'a [u8],
    timeout_ms: u32,
}

async fn resolve(stack: Stack<'_>, host: &str) -> Result<IpAddress, NetFailure> {
    if let Ok(addr) = host.parse::<Ipv4Addr>() {
        return Ok(IpAddress::Ipv4(addr));
    }

    let addrs = stack
        .dns_query(host, DnsQueryType::A)
        .await
        .map_err(|err| {
            warn!("net: dns lookup for {} failed: {:?}", host, err);
            NetFailure::Dns
        })?;
    addrs.first().copied().ok_or(NetFailure::Dns)
}

async fn connect(
    socket: &mut TcpSocket<'_>,
    addr: IpAddress,
    port: u16,
    timeout_ms: u32,
) -> Result<(), NetFailure> {
    let timeout_ms = if timeout_ms == 0 { CONNECT_TIMEOUT_MS } else { timeout_ms };
    match socket
        .connect((addr, port))
        .with_timeout(EmbassyDuration::from_millis(timeout_ms as u64))
        .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            warn!("net: connect {}:{} failed: {:?}", addr, port, err);
            Err(NetFailure::Connect)
        }
        Err(_) => {
            warn!("net: connect {}:{} timed out", addr, port);
            Err(NetFailure::Connect)
        }
    }
}

async fn write_all(socket: &mut TcpSocket<'_>, mut bytes: &[u8]) -> Result<(), NetFailure> {
    while !bytes.is_empty() {
        let written = socket.write(bytes).await.map_err(|_| NetFailure::Write)?;
        if written == 0 {
            return Err(NetFailure::Write);
        }
        bytes = &bytes[written..];
    }
    socket.flush().await.map_err(|_| NetFailure::Write)
}

/// Queues a reply for exchange `id`, waiting while the controller drains.
async fn forward(bridge: &NetBridge, id: u32, mut reply: NetReply) -> Result<(), NetFailure> {
    loop {
        if !bridge.is_http_active(id) {
            return Err(NetFailure::Aborted);
        }
        match bridge.try_reply(reply) {
            Ok(()) => return Ok(()),
            Err(back) => {
                reply = back;
                Timer::after_millis(REPLY_RETRY_MS).await;
            }
        }
    }
}

async fn http_exchange(
    stack: Stack<'_>,
    socket: &mut TcpSocket<'_>,
    bridge: &NetBridge,
    job: &HttpJob<'_>,
) -> Result<u16, NetFailure> {
    let url = http::split_url(job.url).ok_or(NetFailure::BadUrl)?;
    if url.https {
        return Err(NetFailure::TlsUnsupported);
    }

    let addr = resolve(stack, url.host).await?;
    if !bridge.is_http_active(job.id) {
        return Err(NetFailure::Aborted);
    }

    socket.set_timeout(Some(EmbassyDuration::from_millis(job.timeout_ms.max(1) as u64)));
    connect(socket, addr, url.port, job.timeout_ms).await?;

    let head = http::request_head(job.method, &url, job.content_type, job.body.len());
    write_all(socket, head.as_bytes()).await?;
    if !job.body.is_empty() {
        write_all(socket, job.body).await?;
    }

    let mut parser = ResponseParser::new();
    let mut chunk = [0u8; READ_CHUNK_BYTES];
    let mut body = Vec::new();
    loop {
        if !bridge.is_http_active(job.id) {
            return Err(NetFailure::Aborted);
        }

        let n = socket.read(&mut chunk).await.map_err(|_| NetFailure::Read)?;
        if n == 0 {
            break;
        }

        parser.feed(&chunk[..n], &mut body).map_err(NetFailure::Wire)?;
        if !body.is_empty() {
            let bytes = core::mem::take(&mut body);
            forward(bridge, job.id, NetReply::Body { id: job.id, bytes }).await?;
        }
        if parser.is_complete() {
            break;
        }
    }

    parser.finish().map_err(NetFailure::Wire)
}

/// Holds one raw TCP session open until the peer or the controller ends it.
///
/// Returns a command meant for after the session, if one arrived during it.
async fn socket_session(
    stack: Stack<'_>,
    socket: &mut TcpSocket<'_>,
    bridge: &NetBridge,
    id: u32,
    host: &str,
    port: u16,
    timeout_ms: u32,
) -> Option<NetCommand> {
    let opened = match resolve(stack, host).await {
        Ok(addr) => {
            socket.set_timeout(Some(EmbassyDuration::from_secs(SOCKET_IDLE_TIMEOUT_SECS)));
            connect(socket, addr, port, timeout_ms).await
        }
        Err(err) => Err(err),
    };
    if opened.is_err() {
        bridge.set_socket_link(id, SocketLink::Failed);
        return None;
    }

    bridge.reset_stream();
    bridge.set_socket_link(id, SocketLink::Connected);
    info!("net: socket {}:{} connected", host, port);

    let mut chunk = [0u8; READ_CHUNK_BYTES];
    let mut received = 0usize;
    let next = loop {
        if !bridge.is_socket_session(id) {
            break None;
        }

        match select(bridge.next_command(), socket.read(&mut chunk)).await {
            Either::First(NetCommand::Send { id: target, bytes }) if target == id => {
                if let Err(err) = write_all(socket, &bytes).await {
                    warn!("net: socket send failed: {:?}", err);
                    bridge.set_socket_link(id, SocketLink::Failed);
                    break None;
                }
            }
            Either::First(NetCommand::Close { id: target }) if target == id => break None,
            Either::First(NetCommand::Send { .. } | NetCommand::Close { .. }) => {}
            Either::First(other) => break Some(other),
            Either::Second(Ok(0)) => {
                bridge.set_socket_link(id, SocketLink::Closed);
                break None;
            }
            Either::Second(Ok(n)) => {
                received += n;
                bridge.write_stream(&chunk[..n]).await;
            }
            Either::Second(Err(err)) => {
                warn!("net: socket read failed: {:?}", err);
                bridge.set_socket_link(id, SocketLink::Failed);
                break None;
            }
        }
    };

    info!("net: socket session {} ended after {} bytes", id, received);
    next
}
