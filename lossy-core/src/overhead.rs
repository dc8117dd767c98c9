//! Per-packet header sizes of common network stacks.
//!
//! Pass one of these as the header overhead of an [`ImpairmentProfile`] so the
//! simulated bandwidth accounts for the bytes the real stack puts on the wire
//! around each payload.
//!
//! [`ImpairmentProfile`]: crate::profile::ImpairmentProfile

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// IPv4 header without options.
pub const IPV4_MIN_HEADER_OVERHEAD: usize = 20;

/// IPv4 header carrying the maximum 40 bytes of options.
pub const IPV4_MAX_HEADER_OVERHEAD: usize = 60;

/// Fixed IPv6 header.
pub const IPV6_HEADER_OVERHEAD: usize = 40;

/// Size of a UDP header.
const UDP_HEADER: usize = 8;

/// UDP over an option-less IPv4 header.
pub const UDPV4_MIN_HEADER_OVERHEAD: usize = IPV4_MIN_HEADER_OVERHEAD + UDP_HEADER;

/// UDP over an IPv4 header with maximum options.
pub const UDPV4_MAX_HEADER_OVERHEAD: usize = IPV4_MAX_HEADER_OVERHEAD + UDP_HEADER;

/// UDP over IPv6.
pub const UDPV6_HEADER_OVERHEAD: usize = IPV6_HEADER_OVERHEAD + UDP_HEADER;

/// Named header overhead presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HeaderOverhead {
    Ipv4Min,
    Ipv4Max,
    Ipv6,
    Udpv4Min,
    Udpv4Max,
    Udpv6,
}

impl HeaderOverhead {
    /// Every preset, in table order.
    pub const ALL: [HeaderOverhead; 6] = [
        HeaderOverhead::Ipv4Min,
        HeaderOverhead::Ipv4Max,
        HeaderOverhead::Ipv6,
        HeaderOverhead::Udpv4Min,
        HeaderOverhead::Udpv4Max,
        HeaderOverhead::Udpv6,
    ];

    /// Returns the overhead in bytes.
    pub fn bytes(self) -> usize {
        match self {
            HeaderOverhead::Ipv4Min => IPV4_MIN_HEADER_OVERHEAD,
            HeaderOverhead::Ipv4Max => IPV4_MAX_HEADER_OVERHEAD,
            HeaderOverhead::Ipv6 => IPV6_HEADER_OVERHEAD,
            HeaderOverhead::Udpv4Min => UDPV4_MIN_HEADER_OVERHEAD,
            HeaderOverhead::Udpv4Max => UDPV4_MAX_HEADER_OVERHEAD,
            HeaderOverhead::Udpv6 => UDPV6_HEADER_OVERHEAD,
        }
    }

    /// Short human readable description of the header stack.
    pub fn composition(self) -> &'static str {
        match self {
            HeaderOverhead::Ipv4Min => "IPv4 header, no options",
            HeaderOverhead::Ipv4Max => "IPv4 header with max options",
            HeaderOverhead::Ipv6 => "fixed IPv6 header",
            HeaderOverhead::Udpv4Min => "IPv4 min + 8 (UDP header)",
            HeaderOverhead::Udpv4Max => "IPv4 max + 8 (UDP header)",
            HeaderOverhead::Udpv6 => "IPv6 + 8 (UDP header)",
        }
    }
}

impl fmt::Display for HeaderOverhead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HeaderOverhead::Ipv4Min => "ipv4-min",
            HeaderOverhead::Ipv4Max => "ipv4-max",
            HeaderOverhead::Ipv6 => "ipv6",
            HeaderOverhead::Udpv4Min => "udpv4-min",
            HeaderOverhead::Udpv4Max => "udpv4-max",
            HeaderOverhead::Udpv6 => "udpv6",
        };
        f.write_str(name)
    }
}

impl FromStr for HeaderOverhead {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HeaderOverhead::ALL
            .into_iter()
            .find(|preset| preset.to_string() == s.to_lowercase())
            .ok_or_else(|| format!("Unknown header overhead preset: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udp_overheads_add_udp_header() {
        assert_eq!(UDPV4_MIN_HEADER_OVERHEAD, 28);
        assert_eq!(UDPV4_MAX_HEADER_OVERHEAD, 68);
        assert_eq!(UDPV6_HEADER_OVERHEAD, 48);
    }

    #[test]
    fn test_preset_bytes_match_constants() {
        let bytes: Vec<usize> = HeaderOverhead::ALL.iter().map(|p| p.bytes()).collect();
        assert_eq!(bytes, vec![20, 60, 40, 28, 68, 48]);
    }

    #[test]
    fn test_preset_name_round_trip() {
        for preset in HeaderOverhead::ALL {
            assert_eq!(preset.to_string().parse::<HeaderOverhead>(), Ok(preset));
        }
        assert_eq!("UDPv4-Min".parse::<HeaderOverhead>(), Ok(HeaderOverhead::Udpv4Min));
        assert!("ethernet".parse::<HeaderOverhead>().is_err());
    }

    #[test]
    fn test_preset_serializes_kebab_case() {
        let json = serde_json::to_string(&HeaderOverhead::Udpv4Max).unwrap();
        assert_eq!(json, "\"udpv4-max\"");
    }
}
