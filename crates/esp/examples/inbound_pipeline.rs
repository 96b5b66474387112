//! Inbound ESP Pipeline Example
//!
//! This example builds an AES-GCM tunnel-mode SA, seals a few packets the
//! way a peer would, and runs them through prepare, the software crypto
//! engine and tunnel post-processing. One packet is replayed and one is
//! tampered with, so the drop accounting shows up in the logs and metrics.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=esp_dataplane=debug cargo run --example inbound_pipeline
//! ```

use std::sync::Arc;

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};
use esp_dataplane::iph::ipv4_checksum;
use esp_dataplane::wire::{calculate_padding, EspHeader, IPPROTO_ESP, IPPROTO_IPIP};
use esp_dataplane::{
    complete, AeadCipher, Algorithm, CryptoEngine, InboundSession, IpVersion, Packet, PacketType,
    SaConfig, SecurityAssociation, SoftEngine,
};

const SPI: u32 = 0xC0FF_EE01;
const KEY: [u8; 16] = [
    0x4C, 0x80, 0xCD, 0xEF, 0xBB, 0x5D, 0x10, 0xDA, 0x90, 0x6A, 0xC7, 0x3C, 0x36, 0x13, 0xA6, 0x34,
];
const SALT: [u8; 4] = [0x2E, 0x44, 0x3B, 0x68];

fn ipv4_header(proto: u8, total_len: usize) -> Vec<u8> {
    let mut hdr = vec![
        0x45, 0, 0, 0, 0, 0, 0x40, 0, 64, proto, 0, 0, 198, 51, 100, 1, 203, 0, 113, 1,
    ];
    hdr[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
    let csum = ipv4_checksum(&hdr);
    hdr[10..12].copy_from_slice(&csum.to_be_bytes());
    hdr
}

/// Peer side: encapsulate `inner` in ESP with AES-128-GCM
fn seal(seq: u32, inner: &[u8]) -> Packet {
    let iv = u64::from(seq).to_be_bytes();
    let pad_len = calculate_padding(inner.len(), 4);

    let mut body = inner.to_vec();
    body.extend(1..=pad_len as u8);
    body.extend_from_slice(&[pad_len as u8, IPPROTO_IPIP]);

    let mut nonce = SALT.to_vec();
    nonce.extend_from_slice(&iv);
    let mut aad = SPI.to_be_bytes().to_vec();
    aad.extend_from_slice(&seq.to_be_bytes());

    let cipher = Aes128Gcm::new_from_slice(&KEY).expect("16-byte key");
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&nonce), &aad, &mut body)
        .expect("seal");

    let esp_len = 8 + iv.len() + body.len() + tag.len();
    let mut data = ipv4_header(IPPROTO_ESP, 20 + esp_len);
    data.extend_from_slice(&EspHeader { spi: SPI, seq }.to_bytes());
    data.extend_from_slice(&iv);
    data.extend_from_slice(&body);
    data.extend_from_slice(&tag);

    Packet::from_bytes(&data)
        .with_header_lens(0, 20)
        .with_packet_type(PacketType::ETHER_IPV4_ESP)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("esp_dataplane=debug")),
        )
        .init();

    let config = SaConfig::builder()
        .with_spi(SPI)
        .with_algorithm(Algorithm::Aead {
            cipher: AeadCipher::AesGcm128,
            salt: SALT,
        })
        .with_tunnel(IpVersion::V4)
        .with_replay_window(128)
        .build()?;
    let sa = Arc::new(SecurityAssociation::new(&config)?);
    let engine = SoftEngine::new(&sa, &KEY, &[])?;
    let session = InboundSession::new(Arc::clone(&sa));

    let inner = {
        let mut pkt = ipv4_header(17, 20 + 32);
        pkt.extend_from_slice(b"hello from the other side of ESP");
        pkt
    };

    let mut packets: Vec<Packet> = (1..=6).map(|seq| seal(seq, &inner)).collect();
    // Replay of seq 2
    packets.push(seal(2, &inner));
    // Flip a ciphertext bit in seq 4
    let mut bytes = packets[3].to_vec();
    bytes[40] ^= 0x80;
    packets[3] = Packet::from_bytes(&bytes).with_header_lens(0, 20);

    let mut prepared = session.prepare(packets);
    println!(
        "prepare: {}/{} packets got crypto jobs",
        prepared.accepted(),
        prepared.total()
    );

    engine.process_batch(&mut prepared.packets, &mut prepared.jobs);
    complete(&mut prepared.packets, &prepared.jobs);

    let processed = session.process(std::mem::take(&mut prepared.packets));
    println!(
        "process: {}/{} packets decapsulated",
        processed.accepted(),
        processed.total()
    );
    for reject in &processed.rejected {
        println!("  dropped #{}: {}", reject.index, reject.error);
    }
    for packet in &processed.packets {
        assert_eq!(packet.to_vec(), inner);
    }

    let snapshot = session.metrics().snapshot();
    println!("\nMetrics:");
    println!("  Processed: {} packets, {} bytes", snapshot.packets_processed, snapshot.bytes_processed);
    println!("  Replay drops: {}", snapshot.dropped_replay);
    println!("  Integrity drops: {}", snapshot.dropped_integrity);
    println!("  Accept rate: {:.2}", snapshot.accept_rate());
    println!("  Window top: {}", sa.replay().snapshot().last_seen());

    Ok(())
}
