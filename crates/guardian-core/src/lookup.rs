//! Reverse hostname lookup through the system resolver

use std::net::IpAddr;

use async_trait::async_trait;
use tracing::debug;

use crate::traits::HostnameLookup;

/// `HostnameLookup` backed by the host's resolver (`getnameinfo`)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHostnameLookup;

impl SystemHostnameLookup {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HostnameLookup for SystemHostnameLookup {
    async fn reverse(&self, ip: IpAddr) -> Option<String> {
        let resolved = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip)).await;
        match resolved {
            Ok(Ok(name)) => usable_name(&name),
            Ok(Err(e)) => {
                debug!("Reverse lookup for {} failed: {}", ip, e);
                None
            }
            Err(e) => {
                debug!("Reverse lookup task for {} failed: {}", ip, e);
                None
            }
        }
    }
}

/// Strip the root dot; a numeric answer means the address has no name
fn usable_name(name: &str) -> Option<String> {
    let name = name.trim().trim_end_matches('.');
    if name.is_empty() || name.parse::<IpAddr>().is_ok() {
        return None;
    }
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usable_name() {
        assert_eq!(usable_name("tv.lan."), Some("tv.lan".to_string()));
        assert_eq!(usable_name("laptop"), Some("laptop".to_string()));
        assert_eq!(usable_name("10.0.0.5"), None);
        assert_eq!(usable_name("fe80::1"), None);
        assert_eq!(usable_name(""), None);
    }

    #[tokio::test]
    async fn test_loopback_never_yields_a_numeric_name() {
        let name = SystemHostnameLookup::new().reverse("127.0.0.1".parse().unwrap()).await;
        assert!(name.is_none_or(|n| n.parse::<IpAddr>().is_err()));
    }
}
