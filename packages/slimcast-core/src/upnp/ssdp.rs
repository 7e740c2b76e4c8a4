//! SSDP multicast discovery of media renderers.
//!
//! Sends M-SEARCH queries for the MediaRenderer device class (plus any
//! configured extra device types) on every usable IPv4 interface and
//! collects description-document locations from the unicast replies.
//!
//! The same socket is used for send AND receive since devices reply
//! unicast back to the sending socket/port.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use local_ip_address::list_afinet_netifas;
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::protocol_constants::MEDIA_RENDERER;

/// Standard SSDP multicast address and port (protocol specification).
const MULTICAST_ADDR: &str = "239.255.255.250:1900";

/// Errors that can occur during SSDP discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Could not create or bind a discovery socket.
    #[error("Failed to bind discovery socket: {0}")]
    SocketBind(std::io::Error),

    /// Could not send the M-SEARCH datagram.
    #[error("Failed to send M-SEARCH: {0}")]
    SendSearch(std::io::Error),

    /// No usable network interface was found.
    #[error("No usable network interfaces")]
    NoInterfaces,
}

/// Convenient Result alias for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// One search hit: a renderer answering an M-SEARCH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    /// IP the reply came from.
    pub ip: String,
    /// Description document URL from the LOCATION header.
    pub location: String,
    /// USN header value, when present.
    pub usn: String,
}

/// Configuration for one SSDP search.
#[derive(Debug, Clone)]
pub struct SsdpConfig {
    /// Number of M-SEARCH packets to send per interface.
    pub send_count: u32,
    /// Delay between M-SEARCH retries.
    pub retry_delay: Duration,
    /// Total search window; replies arriving after this are lost until the
    /// next scan.
    pub search_timeout: Duration,
    /// MX value (max response delay in seconds).
    pub mx_value: u64,
    /// Extra device-type tokens searched in addition to MediaRenderer
    /// (`custom_discovery` config key).
    pub extra_targets: Vec<String>,
    /// Interface address to restrict discovery to, when bound explicitly.
    pub bind_ip: Option<Ipv4Addr>,
}

impl Default for SsdpConfig {
    fn default() -> Self {
        Self {
            send_count: 3,
            retry_delay: Duration::from_millis(800),
            search_timeout: Duration::from_secs(
                crate::protocol_constants::SCAN_TIMEOUT_SECS as u64,
            ),
            mx_value: 2,
            extra_targets: Vec::new(),
            bind_ip: None,
        }
    }
}

/// Build the M-SEARCH message for a target.
///
/// Note: HOST header always uses the multicast address per SSDP spec.
fn build_msearch_message(mx: u64, target: &str) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: 239.255.255.250:1900\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\r\n",
        mx, target
    )
}

/// Checks if `s` starts with `prefix` (ASCII case-insensitive, no allocation).
#[inline]
fn starts_with_ignore_ascii_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len() && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// Extracts an SSDP header value by name (case-insensitive).
fn header_value(response: &str, name: &str) -> Option<String> {
    let prefix = format!("{}:", name);
    response
        .lines()
        .find(|l| starts_with_ignore_ascii_case(l, &prefix))
        .and_then(|l| l.find(':').map(|idx| l[idx + 1..].trim().to_string()))
        .filter(|v| !v.is_empty())
}

/// Parses an M-SEARCH reply into a [`SearchHit`].
///
/// Replies without a LOCATION header are useless (no description to fetch)
/// and dropped.
fn parse_search_response(response: &str, src_ip: &str) -> Option<SearchHit> {
    let location = header_value(response, "location")?;
    let usn = header_value(response, "usn").unwrap_or_default();
    Some(SearchHit { ip: src_ip.to_string(), location, usn })
}

/// Interfaces usable for discovery: IPv4, not loopback, not an obvious
/// container/VPN interface.
fn is_virtual_interface(name: &str) -> bool {
    const VIRTUAL_PREFIXES: [&str; 6] = ["docker", "veth", "br-", "virbr", "tun", "tap"];
    VIRTUAL_PREFIXES.iter().any(|p| name.starts_with(p))
}

fn discovery_interfaces(bind_ip: Option<Ipv4Addr>) -> Vec<Ipv4Addr> {
    if let Some(ip) = bind_ip {
        return vec![ip];
    }
    list_afinet_netifas()
        .unwrap_or_else(|e| {
            log::warn!("[SSDP] Failed to list network interfaces: {}", e);
            Vec::new()
        })
        .into_iter()
        .filter_map(|(name, addr)| {
            if is_virtual_interface(&name) {
                return None;
            }
            match addr {
                IpAddr::V4(ipv4) if !ipv4.is_loopback() => Some(ipv4),
                _ => None,
            }
        })
        .collect()
}

/// Creates a UDP socket bound to a specific interface.
///
/// SO_REUSEADDR allows bind on rapid restarts; TTL 4 per the UPnP 1.0 spec.
fn create_socket(iface_ip: Ipv4Addr) -> DiscoveryResult<UdpSocket> {
    let bind_addr = SocketAddr::new(IpAddr::V4(iface_ip), 0);

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(DiscoveryError::SocketBind)?;

    if let Err(e) = socket.set_reuse_address(true) {
        log::warn!("[SSDP] Failed to set SO_REUSEADDR on {}: {}", iface_ip, e);
    }
    if let Err(e) = socket.set_multicast_ttl_v4(4) {
        log::warn!("[SSDP] Failed to set multicast TTL on {}: {}", iface_ip, e);
    }

    socket.set_nonblocking(true).map_err(DiscoveryError::SocketBind)?;
    socket.bind(&bind_addr.into()).map_err(DiscoveryError::SocketBind)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(DiscoveryError::SocketBind)
}

/// Runs one multicast search and returns the deduplicated hits.
///
/// The call blocks for the full `search_timeout` window; the discovery loop
/// sizes its scan interval so searches never overlap.
pub async fn search(config: &SsdpConfig) -> DiscoveryResult<Vec<SearchHit>> {
    let interfaces = discovery_interfaces(config.bind_ip);
    if interfaces.is_empty() {
        return Err(DiscoveryError::NoInterfaces);
    }

    let mut targets: Vec<&str> = vec![MEDIA_RENDERER];
    targets.extend(config.extra_targets.iter().map(String::as_str));

    let mut sockets: Vec<(Ipv4Addr, Arc<UdpSocket>)> = Vec::new();
    for iface in &interfaces {
        match create_socket(*iface) {
            Ok(socket) => sockets.push((*iface, Arc::new(socket))),
            Err(e) => log::warn!("[SSDP] Failed to create socket for {}: {}", iface, e),
        }
    }
    if sockets.is_empty() {
        return Err(DiscoveryError::NoInterfaces);
    }

    log::debug!(
        "[SSDP] Searching {} target(s) on {} interface(s) for {:?}",
        targets.len(),
        sockets.len(),
        config.search_timeout
    );

    let messages: Vec<Vec<u8>> = targets
        .iter()
        .map(|t| build_msearch_message(config.mx_value, t).into_bytes())
        .collect();

    let hits: Arc<Mutex<Vec<SearchHit>>> = Arc::new(Mutex::new(Vec::new()));

    let send_futures: Vec<_> = sockets
        .iter()
        .map(|(iface, socket)| {
            let socket = Arc::clone(socket);
            let iface = *iface;
            let messages = messages.clone();
            let send_count = config.send_count;
            let retry_delay = config.retry_delay;

            async move {
                for i in 0..send_count {
                    if i > 0 {
                        tokio::time::sleep(retry_delay).await;
                    }
                    for msg in &messages {
                        if let Err(e) = socket.send_to(msg, MULTICAST_ADDR).await {
                            log::warn!(
                                "[SSDP] Failed to send M-SEARCH on {} (attempt {}): {}",
                                iface,
                                i + 1,
                                e
                            );
                        }
                    }
                }
            }
        })
        .collect();

    let recv_futures: Vec<_> = sockets
        .iter()
        .map(|(iface, socket)| {
            let socket = Arc::clone(socket);
            let iface = *iface;
            let hits = Arc::clone(&hits);
            let window = config.search_timeout;

            async move {
                let mut buf = [0u8; 2048];
                let start = std::time::Instant::now();

                while start.elapsed() < window {
                    let remaining = window.saturating_sub(start.elapsed());
                    match timeout(remaining, socket.recv_from(&mut buf)).await {
                        Ok(Ok((amt, src))) => {
                            let response = String::from_utf8_lossy(&buf[..amt]);
                            if let Some(hit) =
                                parse_search_response(&response, &src.ip().to_string())
                            {
                                log::debug!(
                                    "[SSDP] Hit: ip={}, location={}",
                                    hit.ip,
                                    hit.location
                                );
                                hits.lock().await.push(hit);
                            }
                        }
                        Ok(Err(e)) => {
                            log::warn!("[SSDP] Socket recv error on {}: {}", iface, e);
                        }
                        Err(_) => break, // window elapsed
                    }
                }
            }
        })
        .collect();

    let (_, _) = tokio::join!(
        futures::future::join_all(send_futures),
        futures::future::join_all(recv_futures)
    );

    let mut hits = std::mem::take(&mut *hits.lock().await);

    // Deduplicate by description location: renderers answer every M-SEARCH
    // retransmission and every matching target.
    let mut seen = HashSet::new();
    hits.retain(|h| seen.insert(h.location.clone()));
    hits.sort_by(|a, b| a.location.cmp(&b.location));

    log::debug!("[SSDP] Search complete: {} unique location(s)", hits.len());

    Ok(hits)
}
