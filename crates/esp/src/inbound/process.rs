//! Inbound post-processing after the crypto engine
//!
//! Verifies the decrypted trailer, strips ESP framing and commits the
//! sequence numbers of the survivors to the replay window. Tunnel mode
//! keeps only the inner IP packet; transport mode splices the ESP header
//! out and patches the outer L3 header.

use super::{ProcessBatch, Rejected};
use crate::iph::{next_proto_offset, update_trs_l3hdr, IpVersion};
use crate::packet::{OffloadFlags, Packet, PacketType};
use crate::sa::{Mode, SecurityAssociation};
use crate::wire::{padding_valid, EspTrailer, ESP_TRAILER_LEN};
use crate::{Error, Result};

/// Framing found by [`check_common`]
#[derive(Debug, Clone, Copy)]
struct Framing {
    trailer: EspTrailer,
    /// Padding + trailer + ICV at the packet end
    tail_len: usize,
    /// Outer headers + ESP header + IV at the packet start
    head_len: usize,
}

/// Checks shared by both modes; nothing is modified
fn check_common(sa: &SecurityAssociation, packet: &Packet, hlen: usize) -> Result<Framing> {
    if packet.ol_flags.contains(OffloadFlags::SEC_OFFLOAD_FAILED) {
        return Err(Error::IntegrityCheckFailed);
    }

    let last = packet.last_segment();
    let last_len = last.data_len();
    let tlen = sa.icv_len() + ESP_TRAILER_LEN;
    let tofs = last_len.checked_sub(tlen).ok_or(Error::BufferTooShort {
        required: tlen,
        available: last_len,
    })?;
    let raw = last.room(tofs, ESP_TRAILER_LEN)?;
    let trailer = EspTrailer::from_bytes([raw[0], raw[1]]);

    let pad_len = usize::from(trailer.pad_len);
    let tail_len = tlen + pad_len;
    let head_len = hlen + sa.crypto_params().cipher.offset;
    let pkt_len = packet.len();

    if last_len < tail_len
        || tail_len + head_len > pkt_len
        || head_len > packet.segments()[0].data_len()
    {
        return Err(Error::BufferTooShort {
            required: tail_len + head_len,
            available: pkt_len,
        });
    }

    if !padding_valid(last.room(last_len - tail_len, pad_len)?) {
        return Err(Error::InvalidPadding {
            pad_len: trailer.pad_len,
        });
    }

    Ok(Framing {
        trailer,
        tail_len,
        head_len,
    })
}

/// Strip outer headers and ESP framing, keep the inner packet
///
/// Returns the low 32 bits of the sequence number.
fn tunnel_packet(sa: &SecurityAssociation, inner: IpVersion, packet: &mut Packet) -> Result<u32> {
    let hlen = packet.header_len();
    let framing = check_common(sa, packet, hlen)?;

    if framing.trailer.next_header != inner.proto() {
        return Err(Error::InvalidNextHeader {
            expected: inner.proto(),
            actual: framing.trailer.next_header,
        });
    }

    let seq = packet.read_u32_be(hlen + 4)?;
    packet.trim_tail(framing.tail_len)?;
    packet.trim_head(framing.head_len)?;

    packet.packet_type = PacketType::UNKNOWN;
    packet.tx_offload = sa.tx_offload().apply(packet.tx_offload);
    packet.ol_flags.remove(OffloadFlags::SEC_OFFLOAD);
    packet.l2_len = 0;
    packet.l3_len = 0;
    Ok(seq)
}

/// Splice the ESP header out and patch the outer L3 header
///
/// Returns the low 32 bits of the sequence number.
fn transport_packet(sa: &SecurityAssociation, outer: IpVersion, packet: &mut Packet) -> Result<u32> {
    let (l2_len, l3_len) = (packet.l2_len, packet.l3_len);
    let hlen = l2_len + l3_len;
    let framing = check_common(sa, packet, hlen)?;
    let proto_off = next_proto_offset(packet, outer, l2_len, l3_len)?;

    let cofs = sa.crypto_params().cipher.offset;
    let new_len = packet.len() - framing.tail_len - cofs;
    if u16::try_from(new_len - l2_len).is_err() {
        return Err(Error::UnsupportedHeader(format!(
            "L3 length {} after decapsulation",
            new_len - l2_len
        )));
    }

    let seq = packet.read_u32_be(hlen + 4)?;
    packet.trim_tail(framing.tail_len)?;
    packet.remove_gap(hlen, cofs)?;
    update_trs_l3hdr(
        packet,
        outer,
        l2_len,
        l3_len,
        proto_off,
        framing.trailer.next_header,
    )?;

    packet.packet_type = packet.packet_type.l2_l3_only();
    packet.ol_flags.remove(OffloadFlags::SEC_OFFLOAD);
    Ok(seq)
}

/// Run `decap` over the batch, then commit survivors to the replay window
fn run_batch<F>(sa: &SecurityAssociation, packets: Vec<Packet>, mut decap: F) -> ProcessBatch
where
    F: FnMut(&mut Packet) -> Result<u32>,
{
    let total = packets.len();
    let mut survivors = Vec::with_capacity(total);
    let mut rejected = Vec::new();

    for (index, mut packet) in packets.into_iter().enumerate() {
        match decap(&mut packet) {
            Ok(seq) => survivors.push((index, packet, seq)),
            Err(error) => rejected.push(Rejected {
                index,
                packet,
                error,
            }),
        }
    }

    let packets = commit(sa, survivors, &mut rejected);
    rejected.sort_by_key(|r| r.index);

    ProcessBatch {
        packets,
        rejected,
        total,
    }
}

/// Update the replay window under one write guard
///
/// A sequence number that lost a race against a concurrent batch is
/// rejected here, after decapsulation.
fn commit(
    sa: &SecurityAssociation,
    survivors: Vec<(usize, Packet, u32)>,
    rejected: &mut Vec<Rejected>,
) -> Vec<Packet> {
    if sa.replay_window_size() == 0 {
        return survivors.into_iter().map(|(_, packet, _)| packet).collect();
    }

    let mut window = sa.replay().update_start();
    let mut packets = Vec::with_capacity(survivors.len());
    for (index, packet, wire) in survivors {
        let seq = sa.sequence_number(&window, wire);
        match window.update(seq) {
            Ok(()) => packets.push(packet),
            Err(error) => rejected.push(Rejected {
                index,
                packet,
                error,
            }),
        }
    }
    packets
}

fn reject_all(packets: Vec<Packet>, mode: Mode, stage: &str) -> ProcessBatch {
    let total = packets.len();
    let rejected = packets
        .into_iter()
        .enumerate()
        .map(|(index, packet)| Rejected {
            index,
            packet,
            error: Error::InvalidConfig(format!("{} SA in {} post-processing", mode, stage)),
        })
        .collect();

    ProcessBatch {
        packets: Vec::new(),
        rejected,
        total,
    }
}

/// Post-process a batch of tunnel-mode packets
///
/// Packets must have gone through [`prepare`](super::prepare), the crypto
/// engine and [`complete`](crate::crypto::complete). Survivors are the inner
/// IP packets, in their original relative order.
pub fn process_tunnel(sa: &SecurityAssociation, packets: Vec<Packet>) -> ProcessBatch {
    match sa.mode() {
        Mode::Tunnel { inner } => run_batch(sa, packets, |packet| tunnel_packet(sa, inner, packet)),
        mode => reject_all(packets, mode, "tunnel"),
    }
}

/// Post-process a batch of transport-mode packets
///
/// Survivors keep their outer L2/L3 headers, now carrying the upper-layer
/// payload directly.
pub fn process_transport(sa: &SecurityAssociation, packets: Vec<Packet>) -> ProcessBatch {
    match sa.mode() {
        Mode::Transport { outer } => {
            run_batch(sa, packets, |packet| transport_packet(sa, outer, packet))
        }
        mode => reject_all(packets, mode, "transport"),
    }
}
