//! Network link seam and the host implementation.
//!
//! On a host the operating system owns the actual join (DHCP, Wi-Fi
//! association); the agent only waits until a usable interface appears and
//! resolves the broker through the system resolver.

use async_trait::async_trait;
use log::{debug, info, warn};
use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;
use nix::sys::socket::{AddressFamily, SockaddrLike};
use std::io;
use std::net::IpAddr;

#[async_trait]
pub trait NetworkLink: Send {
    /// Start joining the network. Called once per join sequence.
    async fn begin_join(&mut self);

    /// Whether the link is currently up with a usable address.
    async fn is_joined(&mut self) -> bool;

    /// Resolve a host name to an address.
    async fn resolve(&mut self, host: &str) -> io::Result<IpAddr>;
}

/// Link backed by the host's network interfaces.
#[derive(Debug, Clone, Default)]
pub struct HostLink {
    /// Only consider this interface (e.g. "wlan0"). Any interface otherwise.
    interface: Option<String>,
}

impl HostLink {
    pub fn new(interface: Option<String>) -> Self {
        Self { interface }
    }

    /// Addresses of interfaces that are up, running and not loopback.
    ///
    /// IPv6 link-local addresses are skipped; they cannot reach a broker.
    pub fn usable_addresses(&self) -> Vec<(String, IpAddr)> {
        let addrs = match getifaddrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                warn!("[Link] Failed to list interfaces: {}", e);
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        for ifaddr in addrs {
            if let Some(wanted) = &self.interface
                && &ifaddr.interface_name != wanted
            {
                continue;
            }
            let flags = ifaddr.flags;
            if flags.contains(InterfaceFlags::IFF_LOOPBACK)
                || !flags.contains(InterfaceFlags::IFF_UP)
                || !flags.contains(InterfaceFlags::IFF_RUNNING)
            {
                continue;
            }

            let Some(addr) = ifaddr.address else {
                continue;
            };
            match addr.family() {
                Some(AddressFamily::Inet) => {
                    if let Some(sockaddr) = addr.as_sockaddr_in() {
                        out.push((ifaddr.interface_name.clone(), IpAddr::V4(sockaddr.ip())));
                    }
                }
                Some(AddressFamily::Inet6) => {
                    if let Some(sockaddr) = addr.as_sockaddr_in6() {
                        let ip = sockaddr.ip();
                        let octets = ip.octets();
                        // fe80::/10
                        if octets[0] != 0xfe || (octets[1] & 0xc0) != 0x80 {
                            out.push((ifaddr.interface_name.clone(), IpAddr::V6(ip)));
                        }
                    }
                }
                _ => {}
            }
        }
        out
    }
}

#[async_trait]
impl NetworkLink for HostLink {
    async fn begin_join(&mut self) {
        match &self.interface {
            Some(name) => info!("[Link] Waiting for network on {}", name),
            None => info!("[Link] Waiting for network on any interface"),
        }
    }

    async fn is_joined(&mut self) -> bool {
        let addrs = self.usable_addresses();
        for (name, ip) in &addrs {
            debug!("[Link] {}: {}", name, ip);
        }
        !addrs.is_empty()
    }

    async fn resolve(&mut self, host: &str) -> io::Result<IpAddr> {
        tokio::net::lookup_host((host, 0))
            .await?
            .next()
            .map(|addr| addr.ip())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("no address for {host}"))
            })
    }
}
