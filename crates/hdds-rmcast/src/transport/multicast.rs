// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multicast socket setup.
//!
//! The socket binds the wildcard address on the configured port; the
//! configured local IP (if any) only selects the interface used to join the
//! group and to send. Binding a unicast IP would stop the kernel from
//! delivering group traffic to the socket.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

use crate::config::RmcastConfig;

/// Create a non-blocking UDP socket joined to `config.multicast_group_address`.
pub fn bind_multicast(config: &RmcastConfig) -> io::Result<UdpSocket> {
    let group = config.multicast_group_address;
    let local = config.local_address;

    let domain = match group {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;

    let bind_addr = match group {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), local.port()),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), local.port()),
    };
    socket.bind(&bind_addr.into())?;

    match (group.ip(), local.ip()) {
        (IpAddr::V4(group_ip), local_ip) => {
            let iface = match local_ip {
                IpAddr::V4(ip) => ip,
                IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
            };
            socket.join_multicast_v4(&group_ip, &iface)?;
            if !iface.is_unspecified() {
                socket.set_multicast_if_v4(&iface)?;
            }
            socket.set_multicast_loop_v4(config.multicast_loop)?;
            socket.set_multicast_ttl_v4(config.multicast_ttl)?;
            debug!(group = %group_ip, %iface, port = local.port(), "joined multicast group");
        }
        (IpAddr::V6(group_ip), _) => {
            socket.join_multicast_v6(&group_ip, 0)?;
            socket.set_multicast_loop_v6(config.multicast_loop)?;
            socket.set_multicast_hops_v6(config.multicast_ttl)?;
            debug!(group = %group_ip, port = local.port(), "joined multicast group");
        }
    }

    socket.set_nonblocking(true)?;
    Ok(socket.into())
}
