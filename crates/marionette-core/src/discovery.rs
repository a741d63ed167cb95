//! Candidate endpoints for reaching the Marionette listener.
//!
//! For `localhost` every loopback address bound to a local interface is
//! tried, since machines with several loopback adapters may have the
//! listener on any of them. Literal IP addresses are used as given. Other
//! host names are resolved and the first IPv4 address wins, with
//! `127.0.0.1` as the fallback when resolution finds none.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use thiserror::Error;
use tracing::{debug, warn};

/// Host name treated as the local machine.
pub const LOCALHOST: &str = "localhost";

/// Address used when nothing better is found.
pub const FALLBACK_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Errors from endpoint discovery.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Listing local network interfaces failed.
    #[error("failed to enumerate network interfaces: {0}")]
    Interfaces(#[source] std::io::Error),

    /// DNS resolution of a remote host failed.
    #[error("failed to resolve host {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },
}

/// Whether `host` names the local machine.
pub fn is_local_host(host: &str) -> bool {
    host.eq_ignore_ascii_case(LOCALHOST)
}

/// Ordered, duplicate-free list of endpoints to try for `host:port`.
pub async fn discover_endpoints(host: &str, port: u16) -> Result<Vec<SocketAddr>, DiscoveryError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    let endpoints = if is_local_host(host) {
        let endpoints = loopback_endpoints(local_interface_addrs()?, port);
        if endpoints.is_empty() {
            warn!("no loopback interface found, falling back to {FALLBACK_ADDR}");
            vec![SocketAddr::new(FALLBACK_ADDR, port)]
        } else {
            endpoints
        }
    } else {
        let resolved = tokio::net::lookup_host((host, port))
            .await
            .map_err(|source| DiscoveryError::Resolve {
                host: host.to_string(),
                source,
            })?;
        vec![select_preferred(resolved, port)]
    };

    debug!(host, ?endpoints, "discovered endpoints");
    Ok(endpoints)
}

/// Every address bound to a local network interface.
pub fn local_interface_addrs() -> Result<Vec<IpAddr>, DiscoveryError> {
    let interfaces = if_addrs::get_if_addrs().map_err(DiscoveryError::Interfaces)?;
    Ok(interfaces.iter().map(|iface| iface.ip()).collect())
}

/// Pair each loopback address in `addrs` with `port`, keeping the first
/// occurrence of each.
pub fn loopback_endpoints(addrs: impl IntoIterator<Item = IpAddr>, port: u16) -> Vec<SocketAddr> {
    let mut endpoints: Vec<SocketAddr> = Vec::new();
    for ip in addrs.into_iter().filter(IpAddr::is_loopback) {
        let endpoint = SocketAddr::new(ip, port);
        if !endpoints.contains(&endpoint) {
            endpoints.push(endpoint);
        }
    }
    endpoints
}

/// First IPv4 address among `resolved`, or the fallback address.
pub fn select_preferred(resolved: impl IntoIterator<Item = SocketAddr>, port: u16) -> SocketAddr {
    resolved
        .into_iter()
        .find(SocketAddr::is_ipv4)
        .map(|addr| SocketAddr::new(addr.ip(), port))
        .unwrap_or_else(|| SocketAddr::new(FALLBACK_ADDR, port))
}
