// src/net.rs
use anyhow::Context;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

/// Builds a multicast receive socket: bound to wildcard:port, joined to
/// `group` on `iface`, non-blocking (readiness comes from the poll loop).
pub fn build_rx_socket(
    group: Ipv4Addr,
    port: u16,
    iface: Ipv4Addr,
    recv_buffer_bytes: usize,
) -> anyhow::Result<UdpSocket> {
    let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket")?;
    sock.set_reuse_address(true).ok();

    // Bind to wildcard:port for multicast RX
    let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    sock.bind(&bind_addr.into()).context("bind")?;

    // Increase receive buffer to tolerate bursts
    if recv_buffer_bytes > 0 {
        let _ = sock.set_recv_buffer_size(recv_buffer_bytes);
    }

    sock.join_multicast_v4(&group, &iface)
        .context("join_multicast_v4")?;

    let s: UdpSocket = sock.into();
    s.set_nonblocking(true).context("set_nonblocking")?;
    Ok(s)
}

/// Builds a multicast transmit socket on `iface` with TTL 1 (link-local by
/// default; loopback stays enabled so a local subscriber sees the feed).
pub fn build_tx_socket(iface: Ipv4Addr) -> anyhow::Result<UdpSocket> {
    let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket")?;
    sock.bind(&SocketAddr::new(IpAddr::V4(iface), 0).into())
        .context("bind")?;
    sock.set_multicast_ttl_v4(1).context("set ttl")?;
    if iface != Ipv4Addr::UNSPECIFIED {
        sock.set_multicast_if_v4(&iface).context("set mcast iface")?;
    }
    Ok(sock.into())
}
