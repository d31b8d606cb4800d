//! Low-level async rtnetlink socket.

use std::os::unix::io::{AsRawFd, RawFd};
use std::task::{Context, Poll};

use bytes::BytesMut;
use netlink_sys::{Socket, SocketAddr, protocols};
use tokio::io::unix::AsyncFd;

use super::error::Result;

/// Receive chunk size for one datagram.
const RECV_CHUNK: usize = 32768;

/// Byte transport under [`RtnlHandler`](super::RtnlHandler).
///
/// Sends are synchronous and never wait for buffer space: a full socket is
/// an error, not backpressure. Receives are polled from the event loop.
pub trait Transport {
    /// Write one encoded request.
    fn send(&self, data: &[u8]) -> Result<()>;

    /// Poll for the next datagram. May hold several netlink frames.
    fn poll_recv(&self, cx: &mut Context<'_>) -> Poll<Result<Vec<u8>>>;
}

/// Non-blocking NETLINK_ROUTE socket registered with the tokio reactor.
pub struct RtnlSocket {
    fd: AsyncFd<Socket>,
    pid: u32,
}

impl RtnlSocket {
    /// Open a routing socket, size its receive buffer and bind it to the
    /// multicast `groups` bitmask.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(groups: u32, rx_buf_size: usize) -> Result<Self> {
        let mut socket = Socket::new(protocols::NETLINK_ROUTE)?;
        socket.set_non_blocking(true)?;
        socket.set_rx_buf_sz(rx_buf_size)?;

        let mut addr = SocketAddr::new(0, groups);
        socket.bind(&addr)?;
        socket.get_address(&mut addr)?;
        let pid = addr.port_number();

        let fd = AsyncFd::new(socket)?;
        Ok(Self { fd, pid })
    }

    /// Port ID the kernel assigned on bind.
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Transport for RtnlSocket {
    fn send(&self, data: &[u8]) -> Result<()> {
        self.fd.get_ref().send(data, 0)?;
        Ok(())
    }

    fn poll_recv(&self, cx: &mut Context<'_>) -> Poll<Result<Vec<u8>>> {
        let mut buf = BytesMut::with_capacity(RECV_CHUNK);

        loop {
            let mut guard = match self.fd.poll_read_ready(cx) {
                Poll::Ready(Ok(guard)) => guard,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e.into())),
                Poll::Pending => return Poll::Pending,
            };

            match guard.try_io(|inner| inner.get_ref().recv(&mut buf, 0)) {
                Ok(result) => match result {
                    Ok(_n) => return Poll::Ready(Ok(buf.to_vec())),
                    Err(e) => return Poll::Ready(Err(e.into())),
                },
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsRawFd for RtnlSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.get_ref().as_raw_fd()
    }
}

/// Multicast groups for NETLINK_ROUTE.
pub mod rtnetlink_groups {
    pub const RTNLGRP_LINK: u32 = 1;
    pub const RTNLGRP_NOTIFY: u32 = 2;
    pub const RTNLGRP_NEIGH: u32 = 3;
    pub const RTNLGRP_TC: u32 = 4;
    pub const RTNLGRP_IPV4_IFADDR: u32 = 5;
    pub const RTNLGRP_IPV4_MROUTE: u32 = 6;
    pub const RTNLGRP_IPV4_ROUTE: u32 = 7;
    pub const RTNLGRP_IPV4_RULE: u32 = 8;
    pub const RTNLGRP_IPV6_IFADDR: u32 = 9;
    pub const RTNLGRP_IPV6_MROUTE: u32 = 10;
    pub const RTNLGRP_IPV6_ROUTE: u32 = 11;
    pub const RTNLGRP_IPV6_IFINFO: u32 = 12;
    pub const RTNLGRP_IPV6_PREFIX: u32 = 18;
    pub const RTNLGRP_IPV6_RULE: u32 = 19;
    pub const RTNLGRP_ND_USEROPT: u32 = 20;

    /// Bind mask for a set of groups (group `n` is bit `n - 1`).
    ///
    /// Groups above 32 cannot be joined through the bind mask and are
    /// skipped.
    pub fn mask(groups: &[u32]) -> u32 {
        groups
            .iter()
            .filter(|g| (1..=32).contains(*g))
            .fold(0, |acc, g| acc | (1 << (g - 1)))
    }
}
