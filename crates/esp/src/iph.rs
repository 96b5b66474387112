//! Outer IP header rewrite for transport mode
//!
//! After the ESP header is cut out of a transport-mode packet the outer
//! L3 header still names ESP as its payload protocol and still counts the
//! removed bytes in its length field. This module locates the next-protocol
//! field before the packet is touched, and patches protocol and length
//! afterwards.

use crate::packet::Packet;
use crate::wire::IPPROTO_ESP;
use crate::{Error, Result};

/// Minimum IPv4 header length
pub const IPV4_HDR_LEN: usize = 20;

/// Fixed IPv6 header length
pub const IPV6_HDR_LEN: usize = 40;

/// Maximum IPv4 header length (IHL = 15)
const IPV4_MAX_HDR_LEN: usize = 60;

const IPV6_EXT_HOP_BY_HOP: u8 = 0;
const IPV6_EXT_ROUTING: u8 = 43;
const IPV6_EXT_FRAGMENT: u8 = 44;
const IPV6_EXT_DEST_OPTS: u8 = 60;

/// IP version of an outer or inner header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum IpVersion {
    /// IPv4
    V4,
    /// IPv6
    V6,
}

impl IpVersion {
    /// Protocol number used when this version is carried inside IP
    pub fn proto(self) -> u8 {
        match self {
            IpVersion::V4 => crate::wire::IPPROTO_IPIP,
            IpVersion::V6 => crate::wire::IPPROTO_IPV6,
        }
    }
}

/// Find the packet offset of the next-protocol byte that points at ESP.
///
/// The IPv4 protocol field must announce ESP. IPv6 extension headers
/// (Hop-by-Hop, Routing, Fragment, Destination Options) inside `l3_len` are
/// walked; the header chain must end exactly at `l2_len + l3_len` with ESP as
/// the announced protocol.
pub(crate) fn next_proto_offset(
    packet: &Packet,
    version: IpVersion,
    l2_len: usize,
    l3_len: usize,
) -> Result<usize> {
    match version {
        IpVersion::V4 => {
            if !(IPV4_HDR_LEN..=IPV4_MAX_HDR_LEN).contains(&l3_len) {
                return Err(Error::UnsupportedHeader(format!(
                    "IPv4 header length {}",
                    l3_len
                )));
            }
            let proto_off = l2_len + 9;
            let proto = packet.read_array::<1>(proto_off)?[0];
            if proto != IPPROTO_ESP {
                return Err(Error::UnsupportedHeader(format!(
                    "IPv4 protocol {} is not ESP",
                    proto
                )));
            }
            Ok(proto_off)
        }
        IpVersion::V6 => {
            if l3_len < IPV6_HDR_LEN {
                return Err(Error::UnsupportedHeader(format!(
                    "IPv6 header length {}",
                    l3_len
                )));
            }
            let end = l2_len + l3_len;
            let mut proto_off = l2_len + 6;
            let mut proto = packet.read_array::<1>(proto_off)?[0];
            let mut off = l2_len + IPV6_HDR_LEN;

            while off < end {
                let ext_len = match proto {
                    IPV6_EXT_HOP_BY_HOP | IPV6_EXT_ROUTING | IPV6_EXT_DEST_OPTS => {
                        let hdr = packet.read_array::<2>(off)?;
                        (usize::from(hdr[1]) + 1) << 3
                    }
                    IPV6_EXT_FRAGMENT => 8,
                    other => {
                        return Err(Error::UnsupportedHeader(format!(
                            "IPv6 extension header {}",
                            other
                        )))
                    }
                };
                proto_off = off;
                proto = packet.read_array::<1>(off)?[0];
                off += ext_len;
            }

            if off != end || proto != IPPROTO_ESP {
                return Err(Error::UnsupportedHeader(
                    "IPv6 header chain does not end at ESP".into(),
                ));
            }
            Ok(proto_off)
        }
    }
}

/// Patch the outer L3 header after the ESP header was removed.
///
/// Sets the next-protocol byte at `proto_off` and rewrites the length field
/// for the packet's current length; IPv4 also gets a fresh header checksum.
pub(crate) fn update_trs_l3hdr(
    packet: &mut Packet,
    version: IpVersion,
    l2_len: usize,
    l3_len: usize,
    proto_off: usize,
    next_proto: u8,
) -> Result<()> {
    packet.write_at(proto_off, &[next_proto])?;

    let l3_total = packet.len() - l2_len;
    match version {
        IpVersion::V4 => {
            let total = u16::try_from(l3_total)
                .map_err(|_| Error::UnsupportedHeader("IPv4 total length overflow".into()))?;
            let mut hdr = [0u8; IPV4_MAX_HDR_LEN];
            let hdr = &mut hdr[..l3_len];
            packet.read_at(l2_len, hdr)?;
            hdr[2..4].copy_from_slice(&total.to_be_bytes());
            hdr[10..12].copy_from_slice(&[0, 0]);
            let csum = ipv4_checksum(hdr);
            hdr[10..12].copy_from_slice(&csum.to_be_bytes());
            packet.write_at(l2_len, hdr)
        }
        IpVersion::V6 => {
            let payload = u16::try_from(l3_total - IPV6_HDR_LEN)
                .map_err(|_| Error::UnsupportedHeader("IPv6 payload length overflow".into()))?;
            packet.write_at(l2_len + 4, &payload.to_be_bytes())
        }
    }
}

/// Internet checksum (RFC 1071) over an IPv4 header
pub fn ipv4_checksum(hdr: &[u8]) -> u16 {
    let mut sum: u32 = hdr
        .chunks(2)
        .map(|c| u32::from(u16::from_be_bytes([c[0], *c.get(1).unwrap_or(&0)])))
        .sum();
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_header(proto: u8, total_len: u16) -> Vec<u8> {
        let mut hdr = vec![
            0x45, 0x00, 0x00, 0x00, 0x12, 0x34, 0x40, 0x00, 0x40, proto, 0x00, 0x00, 10, 0, 0, 1,
            10, 0, 0, 2,
        ];
        hdr[2..4].copy_from_slice(&total_len.to_be_bytes());
        let csum = ipv4_checksum(&hdr);
        hdr[10..12].copy_from_slice(&csum.to_be_bytes());
        hdr
    }

    #[test]
    fn test_ipv4_checksum_known_vector() {
        // Example header from RFC 1071 discussions (checksum field zeroed)
        let hdr = [
            0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        assert_eq!(ipv4_checksum(&hdr), 0xb861);
    }

    #[test]
    fn test_ipv4_rewrite() {
        let mut data = ipv4_header(IPPROTO_ESP, 60);
        data.extend_from_slice(&[0xAB; 20]);
        let mut pkt = Packet::from_bytes(&data);

        let off = next_proto_offset(&pkt, IpVersion::V4, 0, 20).unwrap();
        assert_eq!(off, 9);
        update_trs_l3hdr(&mut pkt, IpVersion::V4, 0, 20, off, 6).unwrap();

        let out = pkt.to_vec();
        assert_eq!(out[9], 6);
        assert_eq!(u16::from_be_bytes([out[2], out[3]]), 40);
        assert_eq!(ipv4_checksum(&out[..20]), 0);
    }

    #[test]
    fn test_ipv4_bad_header_len() {
        let pkt = Packet::from_bytes(&[0u8; 64]);
        assert!(next_proto_offset(&pkt, IpVersion::V4, 0, 12).is_err());
    }

    #[test]
    fn test_ipv4_protocol_not_esp() {
        let mut data = ipv4_header(17, 40);
        data.extend_from_slice(&[0u8; 20]);
        let pkt = Packet::from_bytes(&data);
        assert!(matches!(
            next_proto_offset(&pkt, IpVersion::V4, 0, 20),
            Err(Error::UnsupportedHeader(_))
        ));

        // Protocol byte sits after the L2 header
        let mut framed = vec![0u8; 14];
        framed.extend_from_slice(&ipv4_header(IPPROTO_ESP, 40));
        framed.extend_from_slice(&[0u8; 20]);
        let pkt = Packet::from_bytes(&framed);
        assert_eq!(next_proto_offset(&pkt, IpVersion::V4, 14, 20).unwrap(), 23);
    }

    #[test]
    fn test_ipv6_plain() {
        let mut data = vec![0u8; 40];
        data[0] = 0x60;
        data[6] = IPPROTO_ESP;
        data.extend_from_slice(&[0u8; 24]);
        let mut pkt = Packet::from_bytes(&data);

        let off = next_proto_offset(&pkt, IpVersion::V6, 0, 40).unwrap();
        assert_eq!(off, 6);
        update_trs_l3hdr(&mut pkt, IpVersion::V6, 0, 40, off, 17).unwrap();
        let out = pkt.to_vec();
        assert_eq!(out[6], 17);
        assert_eq!(u16::from_be_bytes([out[4], out[5]]), 24);
    }

    #[test]
    fn test_ipv6_extension_chain() {
        let mut data = vec![0u8; 40];
        data[0] = 0x60;
        data[6] = IPV6_EXT_HOP_BY_HOP;
        // Hop-by-Hop, 8 bytes, next = Destination Options
        data.extend_from_slice(&[IPV6_EXT_DEST_OPTS, 0, 0, 0, 0, 0, 0, 0]);
        // Destination Options, 16 bytes, next = ESP
        data.extend_from_slice(&[IPPROTO_ESP, 1]);
        data.extend_from_slice(&[0u8; 14]);
        data.extend_from_slice(&[0u8; 8]);
        let pkt = Packet::from_bytes(&data);

        let off = next_proto_offset(&pkt, IpVersion::V6, 0, 64).unwrap();
        assert_eq!(off, 48);

        // l3_len that does not end on a header boundary is refused
        assert!(next_proto_offset(&pkt, IpVersion::V6, 0, 60).is_err());
    }

    #[test]
    fn test_ipv6_chain_not_esp() {
        let mut data = vec![0u8; 48];
        data[6] = 17;
        let pkt = Packet::from_bytes(&data);
        assert!(next_proto_offset(&pkt, IpVersion::V6, 0, 40).is_err());
    }
}
