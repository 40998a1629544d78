//! Upstream forwarding over UDP.
//!
//! Each exchange uses a fresh ephemeral socket connected to the upstream, so
//! replies from anyone else are filtered by the kernel.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::net::UdpSocket;
use tracing::debug;

use crate::error::{Error, Result};
use crate::query::Query;
use crate::wire::HEADER_LEN;

/// Maximum size of a DNS packet (with some headroom).
pub const MAX_DNS_PACKET_SIZE: usize = 4096;

/// Sends a canonical query somewhere and returns the raw reply.
pub trait Upstream: Send + Sync {
    fn forward<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, Result<Vec<u8>>>;
}

impl<U: Upstream + ?Sized> Upstream for Arc<U> {
    fn forward<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, Result<Vec<u8>>> {
        (**self).forward(query)
    }
}

/// The fixed upstream resolver.
#[derive(Debug, Clone)]
pub struct UdpUpstream {
    addr: SocketAddr,
    timeout: Duration,
}

impl UdpUpstream {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn exchange(&self, query: &Query) -> Result<Vec<u8>> {
        match tokio::time::timeout(self.timeout, self.send_and_receive(query)).await {
            Ok(result) => result.map_err(|source| self.unavailable(source)),
            Err(_) => Err(self.unavailable(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no reply within {:?}", self.timeout),
            ))),
        }
    }

    async fn send_and_receive(&self, query: &Query) -> io::Result<Vec<u8>> {
        let local: SocketAddr = match self.addr {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(self.addr).await?;
        socket.send(query.canonical()).await?;

        let mut buf = vec![0u8; MAX_DNS_PACKET_SIZE];
        loop {
            let len = socket.recv(&mut buf).await?;
            if len < HEADER_LEN || buf[..2] != query.id() {
                debug!(upstream = %self.addr, len, "Discarding unmatched upstream datagram");
                continue;
            }
            buf.truncate(len);
            return Ok(buf);
        }
    }

    fn unavailable(&self, source: io::Error) -> Error {
        Error::UpstreamUnavailable {
            addr: self.addr,
            source,
        }
    }
}

impl Upstream for UdpUpstream {
    fn forward<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, Result<Vec<u8>>> {
        self.exchange(query).boxed()
    }
}
