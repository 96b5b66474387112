//! Inbound prepare: framing checks, sequence validation, job layout
//!
//! For each packet the ESP header is found behind the outer L2/L3 headers,
//! the full sequence number is reconstructed and checked against the replay
//! window (without updating it), the payload length is validated and the
//! crypto job is filled. ESN and AAD material is staged in the last
//! segment right behind the ICV:
//!
//! ```text
//!  non-AEAD, ESN:  ... | trailer | SQN.hi | ICV ............|
//!                                  ^ old ICV position        ^ tailroom
//!  AEAD:           ... | trailer | ICV | AAD (SPI, SQN) ....|
//! ```

use super::{PrepareBatch, Rejected};
use crate::crypto::{CryptoJob, IvBlock, JobOp, JobStatus, Region, TailRef};
use crate::packet::Packet;
use crate::replay::ReplayWindow;
use crate::sa::{AeadCipher, Algorithm, SecurityAssociation};
use crate::wire::{EspHeader, ESP_HDR_LEN};
use crate::{Error, Result};

/// Initial block counter of GCM and CTR counter blocks
const COUNTER_ONE: [u8; 4] = 1u32.to_be_bytes();

/// Prepare one packet against an acquired replay window
pub(crate) fn prepare_packet(
    sa: &SecurityAssociation,
    window: &ReplayWindow,
    packet: &mut Packet,
) -> Result<CryptoJob> {
    let hlen = packet.header_len();
    let esph = EspHeader::read(packet, hlen)?;

    let seq = sa.sequence_number(window, esph.seq);
    window.check(seq)?;

    let pkt_len = packet.len();
    let plen = pkt_len - hlen;
    let ctp = sa.crypto_params();

    let clen = plen
        .checked_sub(ctp.cipher.length)
        .ok_or(Error::BufferTooShort {
            required: hlen + ctp.cipher.length,
            available: pkt_len,
        })?;
    if clen % sa.pad_align() != 0 {
        return Err(Error::InvalidPayloadLength {
            length: clen,
            align: sa.pad_align(),
        });
    }

    let icv_len = sa.icv_len();
    let sqh_len = sa.sqh_len();
    let aad_len = sa.aad_len();

    let last = packet.last_segment();
    let tailroom = last.tailroom();
    if aad_len + sqh_len > tailroom {
        return Err(Error::NoTailroom {
            required: aad_len + sqh_len,
            available: tailroom,
        });
    }
    let icv_ofs = last
        .data_len()
        .checked_sub(icv_len)
        .ok_or(Error::BufferTooShort {
            required: icv_len,
            available: last.data_len(),
        })?
        + sqh_len;

    let mut iv_buf = [0u8; IvBlock::MAX_LEN];
    packet.read_at(hlen + ESP_HDR_LEN, &mut iv_buf[..sa.iv_len()])?;
    let wire_iv = &iv_buf[..sa.iv_len()];

    let payload = Region::new(hlen + ctp.cipher.offset, clen);
    let auth = Region::new(hlen + ctp.auth.offset, plen - ctp.auth.length);

    let (op, iv) = match sa.algorithm() {
        Algorithm::Aead { cipher, salt } => {
            let aad = TailRef {
                offset: icv_ofs + icv_len,
                len: aad_len,
            };
            let iv = match cipher {
                AeadCipher::ChaCha20Poly1305 => IvBlock::from_parts(&[salt.as_slice(), wire_iv]),
                AeadCipher::AesGcm128 | AeadCipher::AesGcm256 => {
                    IvBlock::from_parts(&[salt.as_slice(), wire_iv, &COUNTER_ONE])
                }
            };
            (JobOp::Aead { data: payload, aad }, iv)
        }
        Algorithm::CipherHmac { .. } => (
            JobOp::CipherAuth {
                cipher: payload,
                auth,
            },
            IvBlock::from_parts(&[wire_iv]),
        ),
        Algorithm::CtrHmac { salt, .. } => (
            JobOp::CipherAuth {
                cipher: payload,
                auth,
            },
            IvBlock::from_parts(&[salt.as_slice(), wire_iv, &COUNTER_ONE]),
        ),
        Algorithm::Null { .. } => (JobOp::AuthOnly { auth }, IvBlock::default()),
    };

    stage_tail(sa, packet, seq, icv_ofs)?;

    Ok(CryptoJob {
        op,
        iv,
        digest: TailRef {
            offset: icv_ofs,
            len: icv_len,
        },
        status: JobStatus::NotProcessed,
    })
}

/// Write SQN.hi and AAD next to the ICV in the last segment
fn stage_tail(sa: &SecurityAssociation, packet: &mut Packet, seq: u64, icv_ofs: usize) -> Result<()> {
    let icv_len = sa.icv_len();
    let sqh_len = sa.sqh_len();
    let aad_len = sa.aad_len();
    let last = packet.last_segment_mut();

    if sqh_len != 0 {
        let area = last.room_mut(icv_ofs - sqh_len, sqh_len + icv_len)?;
        area.copy_within(..icv_len, sqh_len);
        area[..sqh_len].copy_from_slice(&((seq >> 32) as u32).to_be_bytes());
    }

    if aad_len != 0 {
        let aad = last.room_mut(icv_ofs + icv_len, aad_len)?;
        aad[..4].copy_from_slice(&sa.spi().to_be_bytes());
        if sa.esn() {
            aad[4..12].copy_from_slice(&seq.to_be_bytes());
        } else {
            aad[4..8].copy_from_slice(&(seq as u32).to_be_bytes());
        }
    }

    Ok(())
}

/// Prepare a batch of inbound packets for the crypto engine
///
/// The replay window is acquired once for the whole batch and released
/// before returning. Survivors keep their relative order; each reject keeps
/// its index in `packets`.
pub fn prepare(sa: &SecurityAssociation, packets: Vec<Packet>) -> PrepareBatch {
    let mut batch = PrepareBatch::with_capacity(packets.len());
    let window = sa.replay().acquire();

    for (index, mut packet) in packets.into_iter().enumerate() {
        match prepare_packet(sa, &window, &mut packet) {
            Ok(job) => {
                batch.packets.push(packet);
                batch.jobs.push(job);
            }
            Err(error) => batch.rejected.push(Rejected {
                index,
                packet,
                error,
            }),
        }
    }

    drop(window);
    batch
}
