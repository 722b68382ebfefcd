// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Local DNS resolver for `local-dns` mode.
//!
//! Queries are answered in this order:
//!
//! 1. names present in the live host table get an A record
//! 2. other names under the cluster domain are forwarded over TCP to the shadow's
//!    resolver, through the session's SOCKS5 proxy when one is configured
//! 3. everything else goes to the upstream resolver recorded before the override
//!
//! A forward that fails or times out is answered with SERVFAIL.

use super::hosts::HostTable;
use super::DnsState;
use crate::constants::{DNS_FORWARD_TIMEOUT_SECS, DNS_UDP_BUFFER_SIZE, LOCAL_DNS_TTL_SECS};
use crate::tunnel::shutdown_requested;
use crate::tunnel::socks5::{self, TargetAddr};
use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{RData, Record, RecordType};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Where queries that cannot be answered locally are sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Upstreams {
    /// Cluster DNS domain, e.g. `cluster.local`
    pub cluster_domain: String,
    /// Resolver inside the shadow pod
    pub cluster_resolver: SocketAddr,
    /// SOCKS5 proxy used to reach `cluster_resolver`
    pub socks_proxy: Option<SocketAddr>,
    /// Resolver in use before the override
    pub system: Option<SocketAddr>,
}

/// UDP resolver bound on the loopback interface.
pub struct LocalDnsServer {
    socket: Arc<UdpSocket>,
    state: Arc<RwLock<DnsState>>,
    upstreams: Arc<Upstreams>,
}

impl LocalDnsServer {
    /// Bind the resolver socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is in use or not permitted.
    pub async fn bind(
        address: SocketAddr,
        state: Arc<RwLock<DnsState>>,
        upstreams: Upstreams,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(address).await?;
        Ok(Self {
            socket: Arc::new(socket),
            state,
            upstreams: Arc::new(upstreams),
        })
    }

    /// Address the resolver is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serve queries until `shutdown` is raised.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if let Ok(address) = self.local_addr() {
            info!(address = %address, "Local DNS resolver serving");
        }

        let mut buf = vec![0u8; DNS_UDP_BUFFER_SIZE];
        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => {
                        let packet = buf[..len].to_vec();
                        let socket = self.socket.clone();
                        let state = self.state.clone();
                        let upstreams = self.upstreams.clone();
                        tokio::spawn(async move {
                            if let Some(reply) = resolve(&packet, &state, &upstreams).await {
                                if let Err(e) = socket.send_to(&reply, peer).await {
                                    debug!(peer = %peer, error = %e, "Failed to send DNS reply");
                                }
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "DNS socket receive failed"),
                },
                () = shutdown_requested(&mut shutdown) => break,
            }
        }
        debug!("Local DNS resolver stopped");
    }
}

/// Lowercased query name without the trailing dot.
fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// Whether `name` lies under `cluster_domain`.
#[must_use]
pub fn is_cluster_name(name: &str, cluster_domain: &str) -> bool {
    let name = normalize(name);
    let domain = normalize(cluster_domain);
    name == domain || name.ends_with(&format!(".{domain}"))
}

fn response_to(request: &Message, code: ResponseCode) -> Message {
    let mut response = Message::new();
    response
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(request.op_code())
        .set_recursion_desired(request.recursion_desired())
        .set_recursion_available(true)
        .set_response_code(code);
    for query in request.queries() {
        response.add_query(query.clone());
    }
    response
}

/// Answer `request` from `hosts` when its single question names a known host.
///
/// Known names get their A record; other record types for a known name get an empty
/// answer so they are not leaked upstream.
#[must_use]
pub fn answer_locally(request: &Message, hosts: &HostTable) -> Option<Message> {
    let [query] = request.queries() else {
        return None;
    };
    let ip = hosts.get(&normalize(&query.name().to_utf8()))?;
    let ip = ip.parse::<Ipv4Addr>().ok()?;

    let mut response = response_to(request, ResponseCode::NoError);
    response.set_authoritative(true);
    if query.query_type() == RecordType::A {
        response.add_answer(Record::from_rdata(
            query.name().clone(),
            LOCAL_DNS_TTL_SECS,
            RData::A(A(ip)),
        ));
    }
    Some(response)
}

/// Build a SERVFAIL reply for `request`.
#[must_use]
pub fn servfail(request: &Message) -> Message {
    response_to(request, ResponseCode::ServFail)
}

/// Resolve one raw query into a raw reply. Unparseable packets are dropped.
async fn resolve(
    packet: &[u8],
    state: &RwLock<DnsState>,
    upstreams: &Upstreams,
) -> Option<Vec<u8>> {
    let request = Message::from_vec(packet).ok()?;

    let local = {
        let state = state.read().unwrap_or_else(PoisonError::into_inner);
        answer_locally(&request, &state.hosts)
    };
    if let Some(response) = local {
        return response.to_vec().ok();
    }

    let name = request
        .queries()
        .first()
        .map(|q| q.name().to_utf8())
        .unwrap_or_default();
    let forwarded = if is_cluster_name(&name, &upstreams.cluster_domain) {
        forward_to_cluster(packet, upstreams).await
    } else if let Some(system) = upstreams.system {
        forward_udp(packet, system).await
    } else {
        Err(io::Error::new(io::ErrorKind::NotFound, "no upstream resolver"))
    };

    match forwarded {
        Ok(reply) => Some(reply),
        Err(e) => {
            debug!(name = %name, error = %e, "DNS forward failed, answering SERVFAIL");
            servfail(&request).to_vec().ok()
        }
    }
}

fn forward_timeout() -> Duration {
    Duration::from_secs(DNS_FORWARD_TIMEOUT_SECS)
}

async fn forward_to_cluster(packet: &[u8], upstreams: &Upstreams) -> io::Result<Vec<u8>> {
    let exchange = async {
        let mut stream = match upstreams.socks_proxy {
            Some(proxy) => socks5::connect(proxy, &TargetAddr::Ip(upstreams.cluster_resolver))
                .await
                .map_err(io::Error::other)?,
            None => TcpStream::connect(upstreams.cluster_resolver).await?,
        };
        exchange_tcp(&mut stream, packet).await
    };
    tokio::time::timeout(forward_timeout(), exchange)
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "cluster resolver timed out"))?
}

/// Send one length-prefixed DNS message and read the reply.
async fn exchange_tcp<S>(stream: &mut S, packet: &[u8]) -> io::Result<Vec<u8>>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let len = u16::try_from(packet.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "DNS message too large"))?;
    let mut framed = Vec::with_capacity(packet.len() + 2);
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(packet);
    stream.write_all(&framed).await?;

    let reply_len = stream.read_u16().await?;
    let mut reply = vec![0u8; usize::from(reply_len)];
    stream.read_exact(&mut reply).await?;
    Ok(reply)
}

async fn forward_udp(packet: &[u8], upstream: SocketAddr) -> io::Result<Vec<u8>> {
    let bind: SocketAddr = if upstream.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(upstream).await?;
    socket.send(packet).await?;

    let mut buf = vec![0u8; DNS_UDP_BUFFER_SIZE];
    let len = tokio::time::timeout(forward_timeout(), socket.recv(&mut buf))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "upstream resolver timed out"))??;
    buf.truncate(len);
    Ok(buf)
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod server_tests;
