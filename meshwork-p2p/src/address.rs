//! Peer addresses and the transport identities derived from them.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use libp2p::{identity::Keypair, multiaddr::Protocol, Multiaddr, PeerId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{OverlayError, Result};

/// Domain separator mixed into the identity seed.
const IDENTITY_DOMAIN: &[u8] = b"meshwork/identity/v1";

/// A reachable node, in `host:port` form.
///
/// Addresses are opaque keys: `localhost:9488` and `127.0.0.1:9488` are
/// different peers as far as the overlay is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerAddress {
    host: String,
    port: u16,
}

impl PeerAddress {
    /// Create an address from its parts.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        let input = format!("{}:{}", host, port);
        if host.is_empty() {
            return Err(invalid(&input, "empty host"));
        }
        if port == 0 {
            return Err(invalid(&input, "port must be non-zero"));
        }
        Ok(Self { host, port })
    }

    /// Host part (name or IP literal, without brackets).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port part.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Dialable multiaddr for this address.
    ///
    /// IP literals map to `/ip4` or `/ip6`, anything else to `/dns`.
    pub fn to_multiaddr(&self) -> Multiaddr {
        let mut addr = Multiaddr::empty();
        match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V4(ip)) => addr.push(Protocol::Ip4(ip)),
            Ok(IpAddr::V6(ip)) => addr.push(Protocol::Ip6(ip)),
            Err(_) => addr.push(Protocol::Dns(self.host.as_str().into())),
        }
        addr.push(Protocol::Tcp(self.port));
        addr
    }

    /// Multiaddr to bind a listener on. Hostnames are resolved first,
    /// since listeners cannot bind `/dns` addresses.
    pub async fn listen_multiaddr(&self) -> Result<Multiaddr> {
        if self.host.parse::<IpAddr>().is_ok() {
            return Ok(self.to_multiaddr());
        }

        // Prefer IPv4 when a name resolves to both families.
        let candidates: Vec<SocketAddr> = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .collect();
        let socket = candidates
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| candidates.first())
            .copied()
            .ok_or_else(|| OverlayError::NetworkError(format!("could not resolve {}", self)))?;

        let mut addr = Multiaddr::empty();
        match socket.ip() {
            IpAddr::V4(ip) => addr.push(Protocol::Ip4(ip)),
            IpAddr::V6(ip) => addr.push(Protocol::Ip6(ip)),
        }
        addr.push(Protocol::Tcp(socket.port()));
        Ok(addr)
    }

    /// Transport keypair of the node listening at this address.
    ///
    /// Derived deterministically so that any node can compute the peer id
    /// of any address without a handshake.
    pub fn keypair(&self) -> Result<Keypair> {
        let mut hasher = Sha256::new();
        hasher.update(IDENTITY_DOMAIN);
        hasher.update(self.to_string().as_bytes());
        let mut seed: [u8; 32] = hasher.finalize().into();
        Keypair::ed25519_from_bytes(&mut seed).map_err(|e| OverlayError::Identity(e.to_string()))
    }

    /// Peer id of the node listening at this address.
    pub fn peer_id(&self) -> Result<PeerId> {
        Ok(PeerId::from(self.keypair()?.public()))
    }
}

fn invalid(input: &str, reason: &str) -> OverlayError {
    OverlayError::InvalidAddress {
        input: input.to_string(),
        reason: reason.to_string(),
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for PeerAddress {
    type Err = OverlayError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();

        let (host, port) = if let Some(rest) = trimmed.strip_prefix('[') {
            let (host, port) = rest
                .split_once("]:")
                .ok_or_else(|| invalid(s, "expected [host]:port"))?;
            (host, port)
        } else {
            let (host, port) = trimmed
                .rsplit_once(':')
                .ok_or_else(|| invalid(s, "expected host:port"))?;
            if host.contains(':') {
                return Err(invalid(s, "IPv6 hosts must be bracketed"));
            }
            (host, port)
        };

        let port: u16 = port.parse().map_err(|_| invalid(s, "invalid port"))?;
        PeerAddress::new(host, port).map_err(|_| invalid(s, "empty host or zero port"))
    }
}

impl TryFrom<String> for PeerAddress {
    type Error = OverlayError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PeerAddress> for String {
    fn from(addr: PeerAddress) -> Self {
        addr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port() {
        let addr: PeerAddress = "localhost:9488".parse().unwrap();
        assert_eq!(addr.host(), "localhost");
        assert_eq!(addr.port(), 9488);
        assert_eq!(addr.to_string(), "localhost:9488");
    }

    #[test]
    fn test_parse_ipv6() {
        let addr: PeerAddress = "[::1]:7000".parse().unwrap();
        assert_eq!(addr.host(), "::1");
        assert_eq!(addr.to_string(), "[::1]:7000");
        assert_eq!(addr.to_multiaddr().to_string(), "/ip6/::1/tcp/7000");
    }

    #[test]
    fn test_rejects_malformed() {
        assert!("localhost".parse::<PeerAddress>().is_err());
        assert!(":9000".parse::<PeerAddress>().is_err());
        assert!("host:notaport".parse::<PeerAddress>().is_err());
        assert!("host:0".parse::<PeerAddress>().is_err());
        assert!("::1:9000".parse::<PeerAddress>().is_err());
    }

    #[test]
    fn test_multiaddr_mapping() {
        let ip: PeerAddress = "127.0.0.1:9488".parse().unwrap();
        assert_eq!(ip.to_multiaddr().to_string(), "/ip4/127.0.0.1/tcp/9488");

        let name: PeerAddress = "node.example:9488".parse().unwrap();
        assert_eq!(name.to_multiaddr().to_string(), "/dns/node.example/tcp/9488");
    }

    #[test]
    fn test_identity_is_deterministic() {
        let a: PeerAddress = "127.0.0.1:9488".parse().unwrap();
        let b: PeerAddress = "127.0.0.1:9489".parse().unwrap();

        assert_eq!(a.peer_id().unwrap(), a.clone().peer_id().unwrap());
        assert_ne!(a.peer_id().unwrap(), b.peer_id().unwrap());
    }

    #[test]
    fn test_serde_as_string() {
        let addr: PeerAddress = "127.0.0.1:9488".parse().unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"127.0.0.1:9488\"");

        let decoded: PeerAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, addr);
        assert!(serde_json::from_str::<PeerAddress>("\"nope\"").is_err());
    }

    #[tokio::test]
    async fn test_listen_multiaddr_for_ip_literal() {
        let addr: PeerAddress = "127.0.0.1:9488".parse().unwrap();
        let listen = addr.listen_multiaddr().await.unwrap();
        assert_eq!(listen, addr.to_multiaddr());
    }
}
