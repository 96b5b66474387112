//! Packet metadata: classification and offload flags

use bitflags::bitflags;

bitflags! {
    /// Receive-side offload flags carried with a packet
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OffloadFlags: u64 {
        /// Packet went through (inline or lookaside) security processing
        const SEC_OFFLOAD = 1 << 0;
        /// Security processing failed: bad ICV or engine error
        const SEC_OFFLOAD_FAILED = 1 << 1;
    }
}

/// Link-layer classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum L2Type {
    /// Not classified
    #[default]
    Unknown,
    /// Ethernet II
    Ether,
}

/// Network-layer classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum L3Type {
    /// Not classified
    #[default]
    Unknown,
    /// IPv4
    Ipv4,
    /// IPv6
    Ipv6,
}

/// Tunnel classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TunnelType {
    /// No tunnel recognised
    #[default]
    Unknown,
    /// IPsec ESP
    Esp,
}

/// Layered packet classification as produced by a parser or the NIC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PacketType {
    /// Link layer
    pub l2: L2Type,
    /// Network layer
    pub l3: L3Type,
    /// Tunnel
    pub tunnel: TunnelType,
}

impl PacketType {
    /// Fully unclassified packet
    pub const UNKNOWN: PacketType = PacketType {
        l2: L2Type::Unknown,
        l3: L3Type::Unknown,
        tunnel: TunnelType::Unknown,
    };

    /// Classification of an ESP packet over IPv4/Ethernet
    pub const ETHER_IPV4_ESP: PacketType = PacketType {
        l2: L2Type::Ether,
        l3: L3Type::Ipv4,
        tunnel: TunnelType::Esp,
    };

    /// Classification of an ESP packet over IPv6/Ethernet
    pub const ETHER_IPV6_ESP: PacketType = PacketType {
        l2: L2Type::Ether,
        l3: L3Type::Ipv6,
        tunnel: TunnelType::Esp,
    };

    /// Keep the L2/L3 classification, forget everything above it
    pub fn l2_l3_only(self) -> PacketType {
        PacketType {
            l2: self.l2,
            l3: self.l3,
            ..PacketType::UNKNOWN
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_l3_only() {
        let ptype = PacketType::ETHER_IPV4_ESP.l2_l3_only();
        assert_eq!(ptype.l2, L2Type::Ether);
        assert_eq!(ptype.l3, L3Type::Ipv4);
        assert_eq!(ptype.tunnel, TunnelType::Unknown);
    }

    #[test]
    fn test_flags_clear() {
        let mut flags = OffloadFlags::SEC_OFFLOAD | OffloadFlags::SEC_OFFLOAD_FAILED;
        flags.remove(OffloadFlags::SEC_OFFLOAD);
        assert_eq!(flags, OffloadFlags::SEC_OFFLOAD_FAILED);
    }
}
