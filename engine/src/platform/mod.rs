//! Host identity
//!
//! Journal entries carry the host name and address of the machine a stage
//! ran on, so runs spread over a cluster can be told apart.

use std::net::IpAddr;
use sysinfo::System;
use tracing::debug;

const FALLBACK_HOSTNAME: &str = "localhost";
const FALLBACK_IP: &str = "127.0.0.1";

/// Name and address of the current host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub hostname: String,
    pub ip: String,
}

impl HostInfo {
    pub fn new(hostname: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ip: ip.into(),
        }
    }

    /// Detects the host name and resolves it to its first IPv4 address.
    ///
    /// Never fails: an unknown name or an unresolvable host fall back to
    /// `localhost` and `127.0.0.1`.
    pub async fn detect() -> Self {
        let hostname = System::host_name()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_HOSTNAME.to_string());

        let ip = match tokio::net::lookup_host((hostname.as_str(), 0)).await {
            Ok(addresses) => first_ipv4(addresses.map(|address| address.ip())),
            Err(e) => {
                debug!("Could not resolve {}: {}", hostname, e);
                None
            }
        }
        .unwrap_or_else(|| FALLBACK_IP.to_string());

        Self { hostname, ip }
    }
}

fn first_ipv4(addresses: impl Iterator<Item = IpAddr>) -> Option<String> {
    addresses
        .filter(IpAddr::is_ipv4)
        .map(|ip| ip.to_string())
        .next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_first_ipv4_skips_ipv6() {
        let addresses = vec![
            IpAddr::V6(Ipv6Addr::LOCALHOST),
            IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)),
            IpAddr::V4(Ipv4Addr::new(10, 1, 2, 4)),
        ];
        assert_eq!(
            first_ipv4(addresses.into_iter()),
            Some("10.1.2.3".to_string())
        );
        assert_eq!(first_ipv4(std::iter::empty()), None);
    }

    #[tokio::test]
    async fn test_detect_always_yields_identity() {
        let host = HostInfo::detect().await;
        assert!(!host.hostname.is_empty());
        assert!(host.ip.parse::<Ipv4Addr>().is_ok());
    }
}
