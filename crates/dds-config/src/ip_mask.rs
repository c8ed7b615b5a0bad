//! CIDR-style IPv4 masks for the `hostname.local_ip_mask` setting.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use thiserror::Error;

/// An IPv4 network written `a.b.c.d/len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpMask {
    network: Ipv4Addr,
    prefix: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid IP mask '{0}', expected a.b.c.d/len")]
pub struct IpMaskError(String);

impl FromStr for IpMask {
    type Err = IpMaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || IpMaskError(s.to_string());
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(err)?;
        let network: Ipv4Addr = addr.parse().map_err(|_| err())?;
        let prefix: u8 = prefix.parse().map_err(|_| err())?;
        if prefix > 32 {
            return Err(err());
        }
        Ok(Self { network, prefix })
    }
}

impl fmt::Display for IpMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl IpMask {
    fn bits(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix))
        }
    }

    /// True if `ip` is an IPv4 (or v4-mapped) address inside the network.
    pub fn contains(&self, ip: IpAddr) -> bool {
        let Some(v4) = as_ipv4(ip) else {
            return false;
        };
        let mask = self.bits();
        u32::from(v4) & mask == u32::from(self.network) & mask
    }

    /// Synthesizes `local.<host part>` for an address inside the network.
    ///
    /// The host part is the octets not wholly covered by the prefix.
    pub fn local_name(&self, ip: IpAddr) -> Option<String> {
        if !self.contains(ip) {
            return None;
        }
        let octets = as_ipv4(ip)?.octets();
        let first = usize::from(self.prefix / 8).min(3);
        let host: Vec<String> = octets[first..].iter().map(u8::to_string).collect();
        Some(format!("local.{}", host.join(".")))
    }
}

fn as_ipv4(ip: IpAddr) -> Option<Ipv4Addr> {
    match ip {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("192.168.0.0/16", "192.168.4.7", Some("local.4.7"))]
    #[test_case("10.0.0.0/8", "10.1.2.3", Some("local.1.2.3"))]
    #[test_case("10.1.2.0/24", "10.1.2.3", Some("local.3"))]
    #[test_case("10.1.2.3/32", "10.1.2.3", Some("local.3"))]
    #[test_case("0.0.0.0/0", "8.8.8.8", Some("local.8.8.8.8"))]
    #[test_case("192.168.0.0/16", "192.169.0.1", None)]
    #[test_case("10.0.0.0/8", "::1", None)]
    #[test_case("10.0.0.0/8", "::ffff:10.0.0.9", Some("local.0.0.9"))]
    fn local_names(mask: &str, ip: &str, expected: Option<&str>) {
        let mask: IpMask = mask.parse().unwrap();
        assert_eq!(mask.local_name(ip.parse().unwrap()).as_deref(), expected);
    }

    #[test_case("10.0.0.0" ; "no prefix")]
    #[test_case("10.0.0.0/33" ; "prefix too long")]
    #[test_case("10.0.0/8" ; "short address")]
    #[test_case("ten/8" ; "not an address")]
    fn bad_masks(text: &str) {
        assert!(text.parse::<IpMask>().is_err());
    }

    #[test]
    fn mask_display() {
        let mask: IpMask = "10.0.0.0/8".parse().unwrap();
        assert_eq!(mask.to_string(), "10.0.0.0/8");
    }
}
