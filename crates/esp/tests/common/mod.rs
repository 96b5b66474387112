//! Shared helpers for the integration tests
//!
//! [`Sealer`] builds ESP packets the way a peer's outbound path would, so the
//! inbound pipeline can be exercised end to end with the software engine.

#![allow(dead_code)]

use aes::{Aes128, Aes256};
use aes_gcm::aead::AeadInPlace;
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use chacha20poly1305::ChaCha20Poly1305;
use cipher::generic_array::GenericArray;
use cipher::{BlockEncryptMut, KeyInit, KeyIvInit, StreamCipher};
use ctr::Ctr32BE;
use hmac::{Hmac, Mac};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Sha256, Sha384, Sha512};

use esp_dataplane::iph::ipv4_checksum;
use esp_dataplane::wire::{calculate_padding, EspHeader, IPPROTO_ESP};
use esp_dataplane::{
    complete, AeadCipher, Algorithm, AuthAlgorithm, BlockCipher, CryptoEngine, CtrCipher,
    IpVersion, Mode, Packet, PacketType, SaConfig, SecurityAssociation, Segment, SoftEngine,
};

pub const ETH_LEN: usize = 14;
pub const SPI: u32 = 0x0000_1234;

/// Every algorithm family the software engine supports
pub fn all_algorithms() -> Vec<Algorithm> {
    vec![
        Algorithm::Aead {
            cipher: AeadCipher::AesGcm128,
            salt: [0x0A, 0x0B, 0x0C, 0x0D],
        },
        Algorithm::Aead {
            cipher: AeadCipher::AesGcm256,
            salt: [0x1A, 0x1B, 0x1C, 0x1D],
        },
        Algorithm::Aead {
            cipher: AeadCipher::ChaCha20Poly1305,
            salt: [0x2A, 0x2B, 0x2C, 0x2D],
        },
        Algorithm::CipherHmac {
            cipher: BlockCipher::AesCbc128,
            auth: AuthAlgorithm::HmacSha256,
        },
        Algorithm::CipherHmac {
            cipher: BlockCipher::AesCbc256,
            auth: AuthAlgorithm::HmacSha512,
        },
        Algorithm::CtrHmac {
            cipher: CtrCipher::AesCtr128,
            salt: [0x3A, 0x3B, 0x3C, 0x3D],
            auth: AuthAlgorithm::HmacSha256,
        },
        Algorithm::CtrHmac {
            cipher: CtrCipher::AesCtr256,
            salt: [0x4A, 0x4B, 0x4C, 0x4D],
            auth: AuthAlgorithm::HmacSha384,
        },
        Algorithm::Null {
            auth: AuthAlgorithm::HmacSha256,
        },
    ]
}

pub fn gcm128() -> Algorithm {
    Algorithm::Aead {
        cipher: AeadCipher::AesGcm128,
        salt: [0xCA, 0xFE, 0xBA, 0xBE],
    }
}

pub fn cbc_sha256() -> Algorithm {
    Algorithm::CipherHmac {
        cipher: BlockCipher::AesCbc128,
        auth: AuthAlgorithm::HmacSha256,
    }
}

/// Fake IPv4 packet carrying `payload_len` bytes of UDP-ish data
pub fn inner_ipv4(payload_len: usize, fill: u8) -> Vec<u8> {
    let mut pkt = ipv4_header(17, 20 + payload_len);
    pkt.extend(std::iter::repeat(fill).take(payload_len));
    pkt
}

/// Fake IPv6 packet carrying `payload_len` bytes
pub fn inner_ipv6(payload_len: usize, fill: u8) -> Vec<u8> {
    let mut pkt = ipv6_header(17, payload_len);
    pkt.extend(std::iter::repeat(fill).take(payload_len));
    pkt
}

pub fn ipv4_header(proto: u8, total_len: usize) -> Vec<u8> {
    let mut hdr = vec![
        0x45, 0x00, 0x00, 0x00, 0xBE, 0xEF, 0x40, 0x00, 0x40, proto, 0x00, 0x00, 10, 0, 0, 1, 10,
        0, 0, 2,
    ];
    hdr[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
    let csum = ipv4_checksum(&hdr);
    hdr[10..12].copy_from_slice(&csum.to_be_bytes());
    hdr
}

pub fn ipv6_header(next_header: u8, payload_len: usize) -> Vec<u8> {
    let mut hdr = vec![0u8; 40];
    hdr[0] = 0x60;
    hdr[4..6].copy_from_slice(&(payload_len as u16).to_be_bytes());
    hdr[6] = next_header;
    hdr[7] = 64;
    hdr[8..24].copy_from_slice(&[0x20, 0x01, 0x0D, 0xB8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
    hdr[24..40].copy_from_slice(&[0x20, 0x01, 0x0D, 0xB8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]);
    hdr
}

fn ethernet(version: IpVersion) -> Vec<u8> {
    let mut eth = vec![0x02, 0, 0, 0, 0, 1, 0x02, 0, 0, 0, 0, 2];
    eth.extend_from_slice(match version {
        IpVersion::V4 => &[0x08, 0x00],
        IpVersion::V6 => &[0x86, 0xDD],
    });
    eth
}

/// Outbound side of an SA, sharing keys with the inbound side under test
pub struct Sealer {
    pub config: SaConfig,
    cipher_key: Vec<u8>,
    auth_key: Vec<u8>,
    rng: StdRng,
}

impl Sealer {
    pub fn new(algorithm: Algorithm, mode: Mode, esn: bool) -> Self {
        let config = SaConfig::builder()
            .with_spi(SPI)
            .with_algorithm(algorithm)
            .with_mode(mode)
            .with_esn(esn)
            .build()
            .expect("valid SA config");
        Self::with_config(config)
    }

    pub fn tunnel(algorithm: Algorithm) -> Self {
        Self::new(
            algorithm,
            Mode::Tunnel {
                inner: IpVersion::V4,
            },
            false,
        )
    }

    pub fn with_config(config: SaConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(u64::from(config.spi));
        let (cipher_len, auth_len) = match config.algorithm {
            Algorithm::Aead { cipher, .. } => (cipher.key_len(), 0),
            Algorithm::CipherHmac { cipher, auth } => (cipher.key_len(), auth.key_len()),
            Algorithm::CtrHmac { cipher, auth, .. } => (cipher.key_len(), auth.key_len()),
            Algorithm::Null { auth } => (0, auth.key_len()),
        };
        let mut cipher_key = vec![0u8; cipher_len];
        let mut auth_key = vec![0u8; auth_len];
        rng.fill(&mut cipher_key[..]);
        rng.fill(&mut auth_key[..]);

        Sealer {
            config,
            cipher_key,
            auth_key,
            rng,
        }
    }

    pub fn sa(&self) -> SecurityAssociation {
        SecurityAssociation::new(&self.config).expect("valid SA")
    }

    pub fn engine(&self, sa: &SecurityAssociation) -> SoftEngine {
        SoftEngine::new(sa, &self.cipher_key, &self.auth_key).expect("matching keys")
    }

    /// Tunnel-mode packet: Ethernet + outer IPv4 + ESP(inner)
    pub fn seal_tunnel(&mut self, seq: u64, inner: &[u8]) -> Packet {
        let Mode::Tunnel { inner: version } = self.config.mode else {
            panic!("tunnel packet for a transport SA");
        };
        let esp = self.esp(seq, inner, version.proto());
        let mut data = ethernet(IpVersion::V4);
        data.extend(ipv4_header(IPPROTO_ESP, 20 + esp.len()));
        data.extend(esp);
        Packet::from_bytes(&data)
            .with_header_lens(ETH_LEN, 20)
            .with_packet_type(PacketType::ETHER_IPV4_ESP)
    }

    /// Transport-mode packet: Ethernet + outer IP + ESP(payload)
    pub fn seal_transport(&mut self, seq: u64, payload: &[u8], next_header: u8) -> Packet {
        let Mode::Transport { outer } = self.config.mode else {
            panic!("transport packet for a tunnel SA");
        };
        let esp = self.esp(seq, payload, next_header);
        let mut data = ethernet(outer);
        let (l3_len, ptype) = match outer {
            IpVersion::V4 => {
                data.extend(ipv4_header(IPPROTO_ESP, 20 + esp.len()));
                (20, PacketType::ETHER_IPV4_ESP)
            }
            IpVersion::V6 => {
                data.extend(ipv6_header(IPPROTO_ESP, esp.len()));
                (40, PacketType::ETHER_IPV6_ESP)
            }
        };
        data.extend(esp);
        Packet::from_bytes(&data)
            .with_header_lens(ETH_LEN, l3_len)
            .with_packet_type(ptype)
    }

    /// ESP header, IV, ciphertext and ICV for one payload
    pub fn esp(&mut self, seq: u64, payload: &[u8], next_header: u8) -> Vec<u8> {
        let algorithm = self.config.algorithm;
        let icv_len = self.config.icv_len();

        let mut iv = vec![0u8; algorithm.iv_len()];
        self.rng.fill(&mut iv[..]);

        let pad_len = calculate_padding(payload.len(), algorithm.pad_align());
        let mut body = payload.to_vec();
        body.extend(1..=pad_len as u8);
        body.extend_from_slice(&[pad_len as u8, next_header]);

        let header = EspHeader {
            spi: self.config.spi,
            seq: seq as u32,
        };
        let mut out = header.to_bytes().to_vec();
        out.extend_from_slice(&iv);

        match algorithm {
            Algorithm::Aead { cipher, salt } => {
                let mut nonce = salt.to_vec();
                nonce.extend_from_slice(&iv);
                let mut aad = self.config.spi.to_be_bytes().to_vec();
                if self.config.esn {
                    aad.extend_from_slice(&seq.to_be_bytes());
                } else {
                    aad.extend_from_slice(&(seq as u32).to_be_bytes());
                }
                let tag = aead_seal(cipher, &self.cipher_key, &nonce, &aad, &mut body);
                out.extend_from_slice(&body);
                out.extend_from_slice(&tag[..icv_len]);
            }
            Algorithm::CipherHmac { cipher, auth } => {
                match cipher {
                    BlockCipher::AesCbc128 => {
                        cbc_encrypt::<cbc::Encryptor<Aes128>>(&self.cipher_key, &iv, &mut body)
                    }
                    BlockCipher::AesCbc256 => {
                        cbc_encrypt::<cbc::Encryptor<Aes256>>(&self.cipher_key, &iv, &mut body)
                    }
                    BlockCipher::TripleDesCbc => panic!("3DES is not sealed in tests"),
                }
                out.extend_from_slice(&body);
                self.append_icv(auth, seq, &mut out, icv_len);
            }
            Algorithm::CtrHmac { cipher, salt, auth } => {
                let mut block = [0u8; 16];
                block[..4].copy_from_slice(&salt);
                block[4..12].copy_from_slice(&iv);
                block[15] = 1;
                match cipher {
                    CtrCipher::AesCtr128 => {
                        ctr_xor::<Ctr32BE<Aes128>>(&self.cipher_key, &block, &mut body)
                    }
                    CtrCipher::AesCtr256 => {
                        ctr_xor::<Ctr32BE<Aes256>>(&self.cipher_key, &block, &mut body)
                    }
                }
                out.extend_from_slice(&body);
                self.append_icv(auth, seq, &mut out, icv_len);
            }
            Algorithm::Null { auth } => {
                out.extend_from_slice(&body);
                self.append_icv(auth, seq, &mut out, icv_len);
            }
        }
        out
    }

    fn append_icv(&self, auth: AuthAlgorithm, seq: u64, out: &mut Vec<u8>, icv_len: usize) {
        let mut covered = out.clone();
        if self.config.esn {
            covered.extend_from_slice(&((seq >> 32) as u32).to_be_bytes());
        }
        let mac = hmac(auth, &self.auth_key, &covered);
        out.extend_from_slice(&mac[..icv_len]);
    }
}

fn aead_seal(cipher: AeadCipher, key: &[u8], nonce: &[u8], aad: &[u8], buf: &mut [u8]) -> Vec<u8> {
    let nonce = GenericArray::from_slice(nonce);
    let tag = match cipher {
        AeadCipher::AesGcm128 => Aes128Gcm::new_from_slice(key)
            .unwrap()
            .encrypt_in_place_detached(nonce, aad, buf),
        AeadCipher::AesGcm256 => Aes256Gcm::new_from_slice(key)
            .unwrap()
            .encrypt_in_place_detached(nonce, aad, buf),
        AeadCipher::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(key)
            .unwrap()
            .encrypt_in_place_detached(nonce, aad, buf),
    };
    tag.expect("AEAD seal").to_vec()
}

fn cbc_encrypt<E: KeyIvInit + BlockEncryptMut>(key: &[u8], iv: &[u8], buf: &mut [u8]) {
    let mut enc = E::new_from_slices(key, iv).unwrap();
    for block in buf.chunks_exact_mut(16) {
        enc.encrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

fn ctr_xor<C: KeyIvInit + StreamCipher>(key: &[u8], block: &[u8], buf: &mut [u8]) {
    C::new_from_slices(key, block).unwrap().apply_keystream(buf);
}

fn hmac(auth: AuthAlgorithm, key: &[u8], data: &[u8]) -> Vec<u8> {
    match auth {
        AuthAlgorithm::HmacSha256 => {
            let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key).unwrap();
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        AuthAlgorithm::HmacSha384 => {
            let mut mac = <Hmac<Sha384> as Mac>::new_from_slice(key).unwrap();
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        AuthAlgorithm::HmacSha512 => {
            let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(key).unwrap();
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
    }
}

/// Re-chain a packet into two segments split at `at`
pub fn split(packet: &Packet, at: usize) -> Packet {
    let data = packet.to_vec();
    let mut split = Packet::from_segments(vec![Segment::new(&data[..at]), Segment::new(&data[at..])])
        .expect("non-empty chain")
        .with_header_lens(packet.l2_len, packet.l3_len)
        .with_packet_type(packet.packet_type);
    split.ol_flags = packet.ol_flags;
    split.tx_offload = packet.tx_offload;
    split
}

/// Run prepare, the software engine, completion and post-processing
pub fn run_inbound(
    sa: &SecurityAssociation,
    engine: &SoftEngine,
    packets: Vec<Packet>,
) -> (esp_dataplane::PrepareBatch, esp_dataplane::ProcessBatch) {
    let mut prepared = esp_dataplane::prepare(sa, packets);
    engine.process_batch(&mut prepared.packets, &mut prepared.jobs);
    complete(&mut prepared.packets, &prepared.jobs);
    let survivors = prepared.packets.clone();
    let processed = match sa.mode() {
        Mode::Tunnel { .. } => esp_dataplane::process_tunnel(sa, survivors),
        Mode::Transport { .. } => esp_dataplane::process_transport(sa, survivors),
    };
    (prepared, processed)
}
