// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Minimal SOCKS5 (RFC 1928) codec.
//!
//! Only the subset kubetunnel needs is supported: the "no authentication" method and
//! the `CONNECT` command with IPv4, IPv6 or domain-name targets. The server side is
//! used by the SOCKS5 proxy; the client side lets the local DNS resolver reach
//! in-cluster addresses through that same proxy.

use crate::errors::TransportError;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_NONE_ACCEPTABLE: u8 = 0xFF;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Destination requested by a SOCKS5 client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetAddr {
    /// Literal IP address and port
    Ip(SocketAddr),
    /// Domain name resolved by the far side
    Domain(String, u16),
}

impl TargetAddr {
    /// Host part as a string suitable for a remote connect request.
    #[must_use]
    pub fn host(&self) -> String {
        match self {
            TargetAddr::Ip(addr) => addr.ip().to_string(),
            TargetAddr::Domain(host, _) => host.clone(),
        }
    }

    /// Destination port.
    #[must_use]
    pub fn port(&self) -> u16 {
        match self {
            TargetAddr::Ip(addr) => addr.port(),
            TargetAddr::Domain(_, port) => *port,
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ip(addr) => write!(f, "{addr}"),
            TargetAddr::Domain(host, port) => write!(f, "{host}:{port}"),
        }
    }
}

/// Reply codes sent after the request is processed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Reply {
    Succeeded = 0x00,
    GeneralFailure = 0x01,
    HostUnreachable = 0x04,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

/// Run the server side of the handshake and return the requested destination.
///
/// On protocol errors the appropriate rejection is written before returning.
///
/// # Errors
///
/// Returns [`TransportError::Socks`] for unsupported versions, methods, commands or
/// address types, and [`TransportError::Io`] when the stream fails.
pub async fn accept<S>(stream: &mut S) -> Result<TargetAddr, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut greeting = [0u8; 2];
    stream.read_exact(&mut greeting).await?;
    if greeting[0] != VERSION {
        return Err(TransportError::Socks(format!(
            "unsupported version {}",
            greeting[0]
        )));
    }

    let mut methods = vec![0u8; usize::from(greeting[1])];
    stream.read_exact(&mut methods).await?;
    if !methods.contains(&METHOD_NO_AUTH) {
        stream.write_all(&[VERSION, METHOD_NONE_ACCEPTABLE]).await?;
        return Err(TransportError::Socks(
            "client offered no acceptable authentication method".to_string(),
        ));
    }
    stream.write_all(&[VERSION, METHOD_NO_AUTH]).await?;

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    if header[0] != VERSION {
        return Err(TransportError::Socks(format!(
            "unsupported request version {}",
            header[0]
        )));
    }
    if header[1] != CMD_CONNECT {
        send_reply(stream, Reply::CommandNotSupported).await?;
        return Err(TransportError::Socks(format!(
            "unsupported command {}",
            header[1]
        )));
    }

    let target = match header[3] {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            let port = stream.read_u16().await?;
            TargetAddr::Ip(SocketAddr::new(Ipv4Addr::from(octets).into(), port))
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            let port = stream.read_u16().await?;
            TargetAddr::Ip(SocketAddr::new(Ipv6Addr::from(octets).into(), port))
        }
        ATYP_DOMAIN => {
            let len = stream.read_u8().await?;
            let mut name = vec![0u8; usize::from(len)];
            stream.read_exact(&mut name).await?;
            let port = stream.read_u16().await?;
            let host = String::from_utf8(name)
                .map_err(|_| TransportError::Socks("domain name is not utf-8".to_string()))?;
            TargetAddr::Domain(host, port)
        }
        other => {
            send_reply(stream, Reply::AddressTypeNotSupported).await?;
            return Err(TransportError::Socks(format!(
                "unsupported address type {other}"
            )));
        }
    };

    Ok(target)
}

/// Write a reply with an unspecified bound address.
///
/// # Errors
///
/// Returns an error when the stream cannot be written.
pub async fn send_reply<S>(stream: &mut S, reply: Reply) -> Result<(), TransportError>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(&[VERSION, reply as u8, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
        .await?;
    Ok(())
}

/// Run the client side of the handshake over an established stream.
///
/// # Errors
///
/// Returns [`TransportError::Socks`] when the proxy refuses the method or request.
pub async fn request<S>(stream: &mut S, target: &TargetAddr) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&[VERSION, 1, METHOD_NO_AUTH]).await?;
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice != [VERSION, METHOD_NO_AUTH] {
        return Err(TransportError::Socks(
            "proxy rejected the no-auth method".to_string(),
        ));
    }

    let mut message = vec![VERSION, CMD_CONNECT, 0x00];
    match target {
        TargetAddr::Ip(SocketAddr::V4(addr)) => {
            message.push(ATYP_IPV4);
            message.extend_from_slice(&addr.ip().octets());
        }
        TargetAddr::Ip(SocketAddr::V6(addr)) => {
            message.push(ATYP_IPV6);
            message.extend_from_slice(&addr.ip().octets());
        }
        TargetAddr::Domain(host, _) => {
            let len = u8::try_from(host.len())
                .map_err(|_| TransportError::Socks(format!("domain name too long: {host}")))?;
            message.push(ATYP_DOMAIN);
            message.push(len);
            message.extend_from_slice(host.as_bytes());
        }
    }
    message.extend_from_slice(&target.port().to_be_bytes());
    stream.write_all(&message).await?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await?;
    if reply[1] != Reply::Succeeded as u8 {
        return Err(TransportError::Socks(format!(
            "proxy refused connection to {target} with code {}",
            reply[1]
        )));
    }

    let remaining = match reply[3] {
        ATYP_IPV4 => 4 + 2,
        ATYP_IPV6 => 16 + 2,
        ATYP_DOMAIN => usize::from(stream.read_u8().await?) + 2,
        other => {
            return Err(TransportError::Socks(format!(
                "proxy replied with address type {other}"
            )))
        }
    };
    let mut bound = vec![0u8; remaining];
    stream.read_exact(&mut bound).await?;
    Ok(())
}

/// Open a TCP connection to `target` through the SOCKS5 proxy at `proxy`.
///
/// # Errors
///
/// Returns an error when the proxy is unreachable or refuses the request.
pub async fn connect(proxy: SocketAddr, target: &TargetAddr) -> Result<TcpStream, TransportError> {
    let mut stream = TcpStream::connect(proxy).await?;
    request(&mut stream, target).await?;
    Ok(stream)
}

#[cfg(test)]
#[path = "socks5_tests.rs"]
mod socks5_tests;
