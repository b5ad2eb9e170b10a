//! Discovery socket setup.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket as StdUdpSocket};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};

/// Create a broadcast-capable UDP socket bound to `bind`.
///
/// Address reuse lets several peers share the discovery port on one host.
pub fn make_discovery_socket(bind: SocketAddr) -> Result<StdUdpSocket> {
    let domain = if bind.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    // BSD only delivers broadcasts to every bound socket with SO_REUSEPORT.
    #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd"
    ))]
    socket.set_reuse_port(true).context("SO_REUSEPORT")?;
    if bind.is_ipv4() {
        socket.set_broadcast(true).context("SO_BROADCAST")?;
    }
    socket.set_nonblocking(true).context("set_nonblocking")?;
    socket
        .bind(&bind.into())
        .with_context(|| format!("bind({bind})"))?;

    Ok(socket.into())
}

/// Best guess at the address other hosts on the LAN reach us on.
///
/// Connecting a UDP socket sends nothing; it only asks the kernel which
/// interface would route to a TEST-NET address.
pub fn probe_local_ip() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = StdUdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9))?;
        Ok(socket.local_addr()?.ip())
    };
    match probe() {
        Ok(ip) if !ip.is_unspecified() => ip,
        Ok(_) | Err(_) => {
            tracing::debug!("no routable interface, advertising loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}
