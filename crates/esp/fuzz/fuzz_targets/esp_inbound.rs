//! Fuzz target for inbound ESP processing.
//!
//! Feeds arbitrary bytes through prepare and tunnel/transport
//! post-processing, as if the crypto engine had succeeded, to find:
//! - Panics on attacker-controlled lengths
//! - Out-of-range offsets in multi-segment packets
//! - Survivors that grew instead of shrinking
//!
//! Run with:
//! ```bash
//! cd crates/esp
//! cargo +nightly fuzz run esp_inbound -- -max_total_time=300
//! ```

#![no_main]
use esp_dataplane::{
    complete, AeadCipher, Algorithm, AuthAlgorithm, BlockCipher, CryptoJob, IpVersion, JobStatus,
    Mode, Packet, SaConfig, SecurityAssociation, Segment,
};
use libfuzzer_sys::fuzz_target;

fn sa(selector: u8) -> SecurityAssociation {
    let algorithm = if selector & 1 == 0 {
        Algorithm::Aead {
            cipher: AeadCipher::AesGcm128,
            salt: [0; 4],
        }
    } else {
        Algorithm::CipherHmac {
            cipher: BlockCipher::AesCbc128,
            auth: AuthAlgorithm::HmacSha256,
        }
    };
    let mode = match (selector >> 1) & 3 {
        0 => Mode::Tunnel {
            inner: IpVersion::V4,
        },
        1 => Mode::Tunnel {
            inner: IpVersion::V6,
        },
        2 => Mode::Transport {
            outer: IpVersion::V4,
        },
        _ => Mode::Transport {
            outer: IpVersion::V6,
        },
    };
    let config = SaConfig::builder()
        .with_spi(0x100)
        .with_algorithm(algorithm)
        .with_mode(mode)
        .with_esn(selector & 8 != 0)
        .build()
        .expect("static config is valid");
    SecurityAssociation::new(&config).expect("static SA is valid")
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }
    let (ctl, bytes) = data.split_at(4);
    let sa = sa(ctl[0]);
    let l3_len = usize::from(ctl[1] & 0x3F) + 20;
    let split = usize::from(ctl[2]).min(bytes.len());

    let packet = if split == 0 || split == bytes.len() {
        Packet::from_bytes(bytes)
    } else {
        Packet::from_segments(vec![Segment::new(&bytes[..split]), Segment::new(&bytes[split..])])
            .expect("two segments")
    };
    let packet = packet.with_header_lens(usize::from(ctl[3] & 0x0F), l3_len);
    let len = packet.len();

    let mut prepared = esp_dataplane::prepare(&sa, vec![packet]);
    let jobs: Vec<CryptoJob> = prepared
        .jobs
        .iter()
        .map(|job| CryptoJob {
            status: JobStatus::Success,
            ..*job
        })
        .collect();
    complete(&mut prepared.packets, &jobs);

    let processed = match sa.mode() {
        Mode::Tunnel { .. } => esp_dataplane::process_tunnel(&sa, prepared.packets),
        Mode::Transport { .. } => esp_dataplane::process_transport(&sa, prepared.packets),
    };
    for packet in &processed.packets {
        assert!(packet.len() < len);
    }
});
