//! LAN peer discovery over UDP broadcast.
//!
//! Every node broadcasts the shared passcode on the discovery port at a
//! short interval and listens for the same from others. A datagram whose
//! payload matches the passcode nominates its source address as a
//! candidate; once per discovery window the candidates are probed with
//! `HEAD /` and the ones that answer replace the node's peer list.
//!
//! There is no central registry: stop a node and it simply stops being
//! heard, so it ages out of everyone's peer list after the next window.

use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use lansync_core::SyncState;

pub const DEFAULT_DISCOVERY_PORT: u16 = 9999;
pub const BROADCAST_INTERVAL: Duration = Duration::from_millis(400);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Knobs for the discovery loop.
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    /// Shared secret; only nodes broadcasting the same passcode group up.
    pub passcode: String,
    /// Port peers serve their sync endpoint on.
    pub http_port: u16,
    /// UDP port this node listens on for announcements.
    pub discovery_port: u16,
    /// Where announcements are sent. The default is the IPv4 broadcast
    /// address; tests point it at a specific peer instead.
    pub broadcast_target: SocketAddr,
    /// Delay between our own announcements.
    pub interval: Duration,
    /// How long candidates accumulate before a probe round.
    pub window: Duration,
    /// Per-peer timeout of the `HEAD /` liveness probe.
    pub probe_timeout: Duration,
    /// Our own address, used to ignore our own broadcasts. Detected from
    /// the routing table when unset.
    pub local_ip: Option<IpAddr>,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            passcode: "123".to_string(),
            http_port: 8045,
            discovery_port: DEFAULT_DISCOVERY_PORT,
            broadcast_target: SocketAddr::new(
                IpAddr::V4(Ipv4Addr::BROADCAST),
                DEFAULT_DISCOVERY_PORT,
            ),
            interval: BROADCAST_INTERVAL,
            window: Duration::from_secs(2),
            probe_timeout: PROBE_TIMEOUT,
            local_ip: None,
        }
    }
}

/// UDP socket used both to announce and to listen.
pub struct DiscoverySocket {
    socket: UdpSocket,
    target: SocketAddr,
    payload: Vec<u8>,
}

impl DiscoverySocket {
    /// Bind the discovery port with broadcast and address reuse enabled.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(settings: &DiscoverySettings) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_broadcast(true)?;
        let bind_addr = SocketAddr::new(
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            settings.discovery_port,
        );
        socket.bind(&bind_addr.into())?;
        socket.set_nonblocking(true)?;

        Ok(Self {
            socket: UdpSocket::from_std(socket.into())?,
            target: settings.broadcast_target,
            payload: settings.passcode.clone().into_bytes(),
        })
    }

    /// Address the socket actually bound, port included.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Broadcast one announcement.
    pub async fn announce(&self) -> io::Result<()> {
        self.socket.send_to(&self.payload, self.target).await?;
        Ok(())
    }

    /// Wait for the next datagram.
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }
}

/// Candidate peer nominated by a datagram, if it qualifies.
///
/// A datagram qualifies when its payload is exactly the passcode and it did
/// not originate from this node.
pub fn candidate_from(
    payload: &[u8],
    source: SocketAddr,
    passcode: &str,
    local_ip: IpAddr,
) -> Option<IpAddr> {
    if payload != passcode.as_bytes() {
        return None;
    }
    if source.ip() == local_ip {
        return None;
    }
    Some(source.ip())
}

/// Run discovery until shutdown, keeping `state`'s peer list current.
///
/// The caller binds the socket, so a taken discovery port fails the daemon
/// at startup instead of inside a task. A read failure ends the loop with
/// an error; a failed announcement is only logged, since the socket itself
/// is still usable.
pub async fn run_discovery(
    socket: DiscoverySocket,
    state: Arc<SyncState>,
    settings: DiscoverySettings,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let local_ip = settings
        .local_ip
        .or_else(detect_local_ip)
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
    let client = reqwest::Client::builder()
        .timeout(settings.probe_timeout)
        .build()
        .context("failed to build probe client")?;

    info!(
        "discovery running on udp port {} (announcing to {})",
        settings.discovery_port, settings.broadcast_target
    );

    let mut announce = tokio::time::interval(settings.interval);
    let mut round = tokio::time::interval(settings.window);
    let mut candidates: HashSet<IpAddr> = HashSet::new();
    let mut buf = [0u8; 256];

    loop {
        tokio::select! {
            _ = announce.tick() => {
                if let Err(e) = socket.announce().await {
                    warn!("announcement failed: {}", e);
                }
            }

            received = socket.recv(&mut buf) => {
                let (len, source) = received.context("discovery socket read failed")?;
                if let Some(ip) = candidate_from(&buf[..len], source, &settings.passcode, local_ip) {
                    candidates.insert(ip);
                }
            }

            _ = round.tick() => {
                let round_candidates: Vec<IpAddr> = candidates.drain().collect();
                let peers = probe_candidates(&client, round_candidates, settings.http_port).await;
                if peers != state.peers() {
                    info!("peer set changed: {:?}", peers);
                }
                state.set_peers(peers);
            }

            _ = shutdown.changed() => break,
        }
    }

    Ok(())
}

/// Probe each candidate's sync endpoint; the live ones become peers.
async fn probe_candidates(
    client: &reqwest::Client,
    candidates: Vec<IpAddr>,
    http_port: u16,
) -> Vec<SocketAddr> {
    let mut peers = Vec::new();
    for ip in candidates {
        let addr = SocketAddr::new(ip, http_port);
        match client.head(format!("http://{}/", addr)).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("peer {} is alive", addr);
                peers.push(addr);
            }
            Ok(response) => {
                debug!("peer {} answered {}", addr, response.status());
            }
            Err(e) => {
                debug!("peer {} probe failed: {}", addr, e);
            }
        }
    }
    peers.sort();
    peers
}

/// Best-effort guess of the address peers will see our broadcasts from.
///
/// Connecting a UDP socket sends nothing; it only asks the routing table
/// which local address would be used.
fn detect_local_ip() -> Option<IpAddr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}
