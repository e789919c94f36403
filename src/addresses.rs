//! Selection of the IPv4 address the proxy is announced on.

use std::io;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use thiserror::Error;
use tracing::{debug, trace};

/// Prefix of self-assigned addresses, matched on the dotted string
const SELF_ASSIGNED_PREFIX: &str = "169";

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("Could not determine local hostname: {0}")]
    Hostname(#[source] io::Error),

    #[error("Could not resolve hostname {host}: {source}")]
    Lookup {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("No usable local IPv4 address found")]
    AddressResolutionFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rank {
    Preferred,
    /// Self-assigned link-local address, used only when nothing else exists
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressCandidate {
    pub address: Ipv4Addr,
    pub rank: Rank,
}

impl AddressCandidate {
    fn classify(address: Ipv4Addr) -> Self {
        let rank = if address.to_string().starts_with(SELF_ASSIGNED_PREFIX) {
            Rank::Fallback
        } else {
            Rank::Preferred
        };
        Self { address, rank }
    }
}

/// Where local IPv4 addresses come from
pub trait AddressSource {
    /// IPv4 addresses in discovery order
    fn ipv4_addresses(&self) -> Result<Vec<Ipv4Addr>, AddressError>;
}

/// Resolves the local hostname through the system resolver
#[derive(Debug, Default)]
pub struct HostnameResolver;

impl AddressSource for HostnameResolver {
    fn ipv4_addresses(&self) -> Result<Vec<Ipv4Addr>, AddressError> {
        let host = local_hostname()?;
        debug!("Resolving addresses for host {}", host);

        let addrs = (host.as_str(), 0)
            .to_socket_addrs()
            .map_err(|source| AddressError::Lookup {
                host: host.clone(),
                source,
            })?;

        Ok(addrs
            .filter_map(|addr| match addr.ip() {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .collect())
    }
}

#[cfg(unix)]
fn local_hostname() -> Result<String, AddressError> {
    let name = nix::unistd::gethostname()
        .map_err(|errno| AddressError::Hostname(io::Error::from(errno)))?;
    Ok(name.to_string_lossy().into_owned())
}

#[cfg(not(unix))]
fn local_hostname() -> Result<String, AddressError> {
    std::env::var("COMPUTERNAME").map_err(|e| {
        AddressError::Hostname(io::Error::new(io::ErrorKind::NotFound, e.to_string()))
    })
}

/// Enumerate and rank the host's IPv4 addresses.
///
/// Loopback is dropped. Ordinary addresses are returned in discovery order;
/// self-assigned (169.x) addresses are dropped unless there is no ordinary
/// address, in which case the first one discovered is returned alone.
pub fn select_addresses<S: AddressSource + ?Sized>(
    source: &S,
) -> Result<Vec<AddressCandidate>, AddressError> {
    let mut preferred: Vec<AddressCandidate> = Vec::new();
    let mut fallback: Option<AddressCandidate> = None;

    for address in source.ipv4_addresses()? {
        if address == Ipv4Addr::LOCALHOST {
            continue;
        }

        let candidate = AddressCandidate::classify(address);
        match candidate.rank {
            Rank::Preferred => {
                if !preferred.contains(&candidate) {
                    preferred.push(candidate);
                }
            }
            Rank::Fallback => {
                trace!("Self-assigned address {} kept as fallback", address);
                fallback.get_or_insert(candidate);
            }
        }
    }

    if preferred.is_empty() {
        preferred.extend(fallback);
    }

    if preferred.is_empty() {
        return Err(AddressError::AddressResolutionFailed);
    }

    Ok(preferred)
}

/// The address shown to the operator: smallest in string order, so
/// "10.0.0.2" wins over "9.0.0.1"
pub fn display_address(candidates: &[AddressCandidate]) -> Option<Ipv4Addr> {
    candidates
        .iter()
        .map(|c| c.address)
        .min_by_key(|address| address.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedAddresses(Vec<&'static str>);

    impl AddressSource for FixedAddresses {
        fn ipv4_addresses(&self) -> Result<Vec<Ipv4Addr>, AddressError> {
            Ok(self.0.iter().map(|a| a.parse().unwrap()).collect())
        }
    }

    fn selected(addresses: Vec<&'static str>) -> Vec<String> {
        select_addresses(&FixedAddresses(addresses))
            .unwrap()
            .iter()
            .map(|c| c.address.to_string())
            .collect()
    }

    #[test]
    fn test_loopback_is_never_selected() {
        assert_eq!(selected(vec!["127.0.0.1", "192.168.1.4"]), ["192.168.1.4"]);
    }

    #[test]
    fn test_only_loopback_fails() {
        let result = select_addresses(&FixedAddresses(vec!["127.0.0.1"]));
        assert!(matches!(result, Err(AddressError::AddressResolutionFailed)));
    }

    #[test]
    fn test_self_assigned_only() {
        assert_eq!(selected(vec!["169.254.1.5"]), ["169.254.1.5"]);
    }

    #[test]
    fn test_first_self_assigned_wins() {
        assert_eq!(
            selected(vec!["169.254.1.5", "169.254.9.9", "127.0.0.1"]),
            ["169.254.1.5"]
        );
    }

    #[test]
    fn test_ordinary_address_drops_self_assigned() {
        assert_eq!(selected(vec!["169.254.1.5", "10.0.0.9"]), ["10.0.0.9"]);
    }

    #[test]
    fn test_discovery_order_is_kept() {
        let result = select_addresses(&FixedAddresses(vec!["192.168.0.2", "10.0.0.9", "10.0.0.9"]))
            .unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].address, Ipv4Addr::new(192, 168, 0, 2));
        assert!(result.iter().all(|c| c.rank == Rank::Preferred));
    }

    #[test]
    fn test_prefix_match_is_textual() {
        // 169.x is matched by string prefix, not by the 169.254/16 network
        let result = select_addresses(&FixedAddresses(vec!["169.1.2.3"])).unwrap();
        assert_eq!(result[0].rank, Rank::Fallback);
    }

    #[test]
    fn test_display_address_uses_string_order() {
        let candidates = select_addresses(&FixedAddresses(vec!["9.0.0.1", "10.0.0.2"])).unwrap();
        assert_eq!(display_address(&candidates), Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(display_address(&[]), None);
    }
}
