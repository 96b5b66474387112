//! Inbound Security Association descriptor
//!
//! A [`SecurityAssociation`] is the immutable per-flow state the inbound
//! pipeline needs: algorithm family, ICV/IV/AAD lengths, padding alignment,
//! mode, tx-offload template and the derived offset/length coefficients used
//! to lay out crypto jobs. The only mutable part is the replay window, which
//! lives behind its own lock in [`ReplayTracker`].
//!
//! # Crypto parameter derivation
//!
//! ```text
//! cipher.offset = ESP header (8) + iv_len
//! cipher.length = icv_len + cipher.offset
//! auth.offset   = 0
//! auth.length   = icv_len - sqh_len
//!
//! For an ESP payload of plen bytes starting at hlen:
//!   ciphertext = [hlen + cipher.offset, plen - cipher.length)
//!   auth data  = [hlen + auth.offset,   plen - auth.length)
//! ```

use std::fmt;

use crate::config::SaConfig;
use crate::iph::IpVersion;
use crate::replay::{ReplayTracker, ReplayWindow};
use crate::wire::{ESP_HDR_LEN, SQN_HI_LEN};
use crate::Result;

/// AEAD cipher suites
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum AeadCipher {
    /// AES-GCM with 128-bit key (RFC 4106)
    AesGcm128,
    /// AES-GCM with 256-bit key (RFC 4106)
    AesGcm256,
    /// ChaCha20-Poly1305 (RFC 7634)
    #[cfg_attr(feature = "serde", serde(rename = "chacha20-poly1305"))]
    ChaCha20Poly1305,
}

impl AeadCipher {
    /// Get key length in bytes (without salt)
    pub fn key_len(self) -> usize {
        match self {
            AeadCipher::AesGcm128 => 16,
            AeadCipher::AesGcm256 | AeadCipher::ChaCha20Poly1305 => 32,
        }
    }
}

/// CBC block ciphers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum BlockCipher {
    /// AES-CBC with 128-bit key (RFC 3602)
    AesCbc128,
    /// AES-CBC with 256-bit key (RFC 3602)
    AesCbc256,
    /// Triple-DES CBC (RFC 2451)
    TripleDesCbc,
}

impl BlockCipher {
    /// Get key length in bytes
    pub fn key_len(self) -> usize {
        match self {
            BlockCipher::AesCbc128 => 16,
            BlockCipher::AesCbc256 => 32,
            BlockCipher::TripleDesCbc => 24,
        }
    }

    /// Cipher block size, which is also the IV length
    pub fn block_size(self) -> usize {
        match self {
            BlockCipher::AesCbc128 | BlockCipher::AesCbc256 => 16,
            BlockCipher::TripleDesCbc => 8,
        }
    }
}

/// Counter-mode ciphers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum CtrCipher {
    /// AES-CTR with 128-bit key (RFC 3686)
    AesCtr128,
    /// AES-CTR with 256-bit key (RFC 3686)
    AesCtr256,
}

impl CtrCipher {
    /// Get key length in bytes (without nonce)
    pub fn key_len(self) -> usize {
        match self {
            CtrCipher::AesCtr128 => 16,
            CtrCipher::AesCtr256 => 32,
        }
    }
}

/// Integrity algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum AuthAlgorithm {
    /// HMAC-SHA-256-128 (RFC 4868)
    HmacSha256,
    /// HMAC-SHA-384-192 (RFC 4868)
    HmacSha384,
    /// HMAC-SHA-512-256 (RFC 4868)
    HmacSha512,
}

impl AuthAlgorithm {
    /// Get key length in bytes
    pub fn key_len(self) -> usize {
        match self {
            AuthAlgorithm::HmacSha256 => 32,
            AuthAlgorithm::HmacSha384 => 48,
            AuthAlgorithm::HmacSha512 => 64,
        }
    }

    /// Truncated ICV length used on the wire
    pub fn icv_len(self) -> usize {
        match self {
            AuthAlgorithm::HmacSha256 => 16,
            AuthAlgorithm::HmacSha384 => 24,
            AuthAlgorithm::HmacSha512 => 32,
        }
    }
}

/// Algorithm family of an SA
///
/// Each variant carries only the fields its family needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "family", rename_all = "kebab-case")
)]
pub enum Algorithm {
    /// Combined-mode cipher
    Aead {
        /// Cipher suite
        cipher: AeadCipher,
        /// Implicit nonce part (last 4 bytes of the keying material)
        salt: [u8; 4],
    },
    /// CBC cipher plus HMAC
    CipherHmac {
        /// Cipher
        cipher: BlockCipher,
        /// Integrity algorithm
        auth: AuthAlgorithm,
    },
    /// Counter-mode cipher plus HMAC
    CtrHmac {
        /// Cipher
        cipher: CtrCipher,
        /// Nonce prefix of the counter block
        salt: [u8; 4],
        /// Integrity algorithm
        auth: AuthAlgorithm,
    },
    /// Integrity only (NULL encryption, RFC 2410)
    Null {
        /// Integrity algorithm
        auth: AuthAlgorithm,
    },
}

impl Algorithm {
    /// Check if this is an AEAD family
    pub fn is_aead(&self) -> bool {
        matches!(self, Algorithm::Aead { .. })
    }

    /// IV length carried on the wire after the ESP header
    pub fn iv_len(&self) -> usize {
        match self {
            Algorithm::Aead { .. } | Algorithm::CtrHmac { .. } => 8,
            Algorithm::CipherHmac { cipher, .. } => cipher.block_size(),
            Algorithm::Null { .. } => 0,
        }
    }

    /// ICV length used when the configuration does not override it
    pub fn default_icv_len(&self) -> usize {
        match self {
            Algorithm::Aead { .. } => 16,
            Algorithm::CipherHmac { auth, .. }
            | Algorithm::CtrHmac { auth, .. }
            | Algorithm::Null { auth } => auth.icv_len(),
        }
    }

    /// Alignment the ciphertext length must satisfy
    pub fn pad_align(&self) -> usize {
        match self {
            Algorithm::CipherHmac { cipher, .. } => cipher.block_size(),
            Algorithm::Aead { .. } | Algorithm::CtrHmac { .. } | Algorithm::Null { .. } => 4,
        }
    }

    /// Integrity algorithm, for non-AEAD families
    pub fn auth(&self) -> Option<AuthAlgorithm> {
        match self {
            Algorithm::Aead { .. } => None,
            Algorithm::CipherHmac { auth, .. }
            | Algorithm::CtrHmac { auth, .. }
            | Algorithm::Null { auth } => Some(*auth),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let auth_name = |auth: &AuthAlgorithm| match auth {
            AuthAlgorithm::HmacSha256 => "hmac-sha256",
            AuthAlgorithm::HmacSha384 => "hmac-sha384",
            AuthAlgorithm::HmacSha512 => "hmac-sha512",
        };
        match self {
            Algorithm::Aead { cipher, .. } => f.write_str(match cipher {
                AeadCipher::AesGcm128 => "aes128-gcm",
                AeadCipher::AesGcm256 => "aes256-gcm",
                AeadCipher::ChaCha20Poly1305 => "chacha20-poly1305",
            }),
            Algorithm::CipherHmac { cipher, auth } => {
                let name = match cipher {
                    BlockCipher::AesCbc128 => "aes128-cbc",
                    BlockCipher::AesCbc256 => "aes256-cbc",
                    BlockCipher::TripleDesCbc => "3des-cbc",
                };
                write!(f, "{}/{}", name, auth_name(auth))
            }
            Algorithm::CtrHmac { cipher, auth, .. } => {
                let name = match cipher {
                    CtrCipher::AesCtr128 => "aes128-ctr",
                    CtrCipher::AesCtr256 => "aes256-ctr",
                };
                write!(f, "{}/{}", name, auth_name(auth))
            }
            Algorithm::Null { auth } => write!(f, "null/{}", auth_name(auth)),
        }
    }
}

/// IPsec mode of an SA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum Mode {
    /// Whole inner IP packet is protected
    Tunnel {
        /// IP version of the inner packet
        inner: IpVersion,
    },
    /// Only the upper-layer payload is protected
    Transport {
        /// IP version of the outer header that gets patched
        outer: IpVersion,
    },
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Tunnel { inner } => write!(f, "tunnel/{:?}", inner),
            Mode::Transport { outer } => write!(f, "transport/{:?}", outer),
        }
    }
}

/// Offset and length adjustment pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OffsetLength {
    /// Added to the ESP header position
    pub offset: usize,
    /// Subtracted from the ESP payload length
    pub length: usize,
}

/// Derived layout coefficients for crypto jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CryptoParams {
    /// Cipher region coefficients
    pub cipher: OffsetLength,
    /// Auth region coefficients
    pub auth: OffsetLength,
}

impl CryptoParams {
    fn derive(iv_len: usize, icv_len: usize, sqh_len: usize) -> Self {
        let cipher_offset = ESP_HDR_LEN + iv_len;
        CryptoParams {
            cipher: OffsetLength {
                offset: cipher_offset,
                length: icv_len + cipher_offset,
            },
            auth: OffsetLength {
                offset: 0,
                length: icv_len - sqh_len,
            },
        }
    }
}

/// Template applied to the tx-offload word of tunnel-mode packets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TxOffloadTemplate {
    /// Bits kept from the packet's current word
    pub mask: u64,
    /// Bits or-ed in afterwards
    pub value: u64,
}

impl TxOffloadTemplate {
    /// Apply the template
    pub fn apply(&self, tx_offload: u64) -> u64 {
        (tx_offload & self.mask) | self.value
    }
}

impl Default for TxOffloadTemplate {
    fn default() -> Self {
        TxOffloadTemplate {
            mask: u64::MAX,
            value: 0,
        }
    }
}

/// Inbound Security Association
///
/// Read-only during packet processing and shared between threads through
/// `Arc`; only the embedded replay window changes, under its own lock.
#[derive(Debug)]
pub struct SecurityAssociation {
    spi: u32,
    algorithm: Algorithm,
    mode: Mode,
    esn: bool,
    icv_len: usize,
    iv_len: usize,
    pad_align: usize,
    aad_len: usize,
    sqh_len: usize,
    ctp: CryptoParams,
    tx_offload: TxOffloadTemplate,
    replay_window: u32,
    replay: ReplayTracker,
}

impl SecurityAssociation {
    /// Build an SA from a validated configuration
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if the configuration does not validate
    pub fn new(config: &SaConfig) -> Result<Self> {
        config.validate()?;

        let algorithm = config.algorithm;
        let icv_len = config.icv_len();
        let iv_len = algorithm.iv_len();

        // AEAD carries the high sequence bits in the AAD instead
        let (aad_len, sqh_len) = match (algorithm.is_aead(), config.esn) {
            (true, false) => (8, 0),
            (true, true) => (8 + SQN_HI_LEN, 0),
            (false, false) => (0, 0),
            (false, true) => (0, SQN_HI_LEN),
        };

        Ok(SecurityAssociation {
            spi: config.spi,
            algorithm,
            mode: config.mode,
            esn: config.esn,
            icv_len,
            iv_len,
            pad_align: algorithm.pad_align(),
            aad_len,
            sqh_len,
            ctp: CryptoParams::derive(iv_len, icv_len, sqh_len),
            tx_offload: config.tx_offload,
            replay_window: config.replay_window,
            replay: ReplayTracker::new(ReplayWindow::new(config.replay_window)?),
        })
    }

    /// Security Parameters Index
    pub fn spi(&self) -> u32 {
        self.spi
    }

    /// Algorithm family
    pub fn algorithm(&self) -> &Algorithm {
        &self.algorithm
    }

    /// Tunnel or transport
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Protocol number expected in the trailer's next-header (tunnel mode)
    pub fn inner_proto(&self) -> Option<u8> {
        match self.mode {
            Mode::Tunnel { inner } => Some(inner.proto()),
            Mode::Transport { .. } => None,
        }
    }

    /// Extended sequence numbers enabled
    pub fn esn(&self) -> bool {
        self.esn
    }

    /// ICV length in bytes
    pub fn icv_len(&self) -> usize {
        self.icv_len
    }

    /// IV length in bytes
    pub fn iv_len(&self) -> usize {
        self.iv_len
    }

    /// Required ciphertext alignment
    pub fn pad_align(&self) -> usize {
        self.pad_align
    }

    /// AAD length staged for AEAD jobs (0 for other families)
    pub fn aad_len(&self) -> usize {
        self.aad_len
    }

    /// Bytes of high sequence number inserted before the ICV
    pub fn sqh_len(&self) -> usize {
        self.sqh_len
    }

    /// Layout coefficients for crypto jobs
    pub fn crypto_params(&self) -> &CryptoParams {
        &self.ctp
    }

    /// Tunnel-mode tx-offload template
    pub fn tx_offload(&self) -> &TxOffloadTemplate {
        &self.tx_offload
    }

    /// Replay window of this SA
    pub fn replay(&self) -> &ReplayTracker {
        &self.replay
    }

    /// Configured replay window size (0 when disabled)
    pub fn replay_window_size(&self) -> u32 {
        self.replay_window
    }

    /// Full sequence number for a wire value, given the current window
    pub(crate) fn sequence_number(&self, window: &ReplayWindow, wire: u32) -> u64 {
        if self.esn {
            crate::replay::reconstruct_esn(window.last_seen(), wire, window.window_size())
        } else {
            u64::from(wire)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn config(algorithm: Algorithm, esn: bool) -> SaConfig {
        SaConfig::builder()
            .with_spi(0x1000)
            .with_algorithm(algorithm)
            .with_mode(Mode::Tunnel {
                inner: IpVersion::V4,
            })
            .with_esn(esn)
            .build()
            .unwrap()
    }

    #[test]
    fn test_gcm_params() {
        let alg = Algorithm::Aead {
            cipher: AeadCipher::AesGcm128,
            salt: [1, 2, 3, 4],
        };
        let sa = SecurityAssociation::new(&config(alg, false)).unwrap();
        assert_eq!(sa.iv_len(), 8);
        assert_eq!(sa.icv_len(), 16);
        assert_eq!(sa.aad_len(), 8);
        assert_eq!(sa.sqh_len(), 0);
        assert_eq!(sa.pad_align(), 4);
        assert_eq!(sa.crypto_params().cipher, OffsetLength { offset: 16, length: 32 });
        assert_eq!(sa.crypto_params().auth, OffsetLength { offset: 0, length: 16 });
        assert_eq!(sa.inner_proto(), Some(4));
    }

    #[test]
    fn test_gcm_esn_widens_aad() {
        let alg = Algorithm::Aead {
            cipher: AeadCipher::AesGcm256,
            salt: [0; 4],
        };
        let sa = SecurityAssociation::new(&config(alg, true)).unwrap();
        assert_eq!(sa.aad_len(), 12);
        assert_eq!(sa.sqh_len(), 0);
    }

    #[test]
    fn test_cbc_esn_params() {
        let alg = Algorithm::CipherHmac {
            cipher: BlockCipher::AesCbc128,
            auth: AuthAlgorithm::HmacSha256,
        };
        let sa = SecurityAssociation::new(&config(alg, true)).unwrap();
        assert_eq!(sa.iv_len(), 16);
        assert_eq!(sa.pad_align(), 16);
        assert_eq!(sa.aad_len(), 0);
        assert_eq!(sa.sqh_len(), 4);
        assert_eq!(sa.crypto_params().cipher, OffsetLength { offset: 24, length: 40 });
        assert_eq!(sa.crypto_params().auth.length, 12);
    }

    #[test]
    fn test_3des_and_null_params() {
        let alg = Algorithm::CipherHmac {
            cipher: BlockCipher::TripleDesCbc,
            auth: AuthAlgorithm::HmacSha512,
        };
        let sa = SecurityAssociation::new(&config(alg, false)).unwrap();
        assert_eq!(sa.iv_len(), 8);
        assert_eq!(sa.pad_align(), 8);
        assert_eq!(sa.icv_len(), 32);

        let alg = Algorithm::Null {
            auth: AuthAlgorithm::HmacSha384,
        };
        let sa = SecurityAssociation::new(&config(alg, false)).unwrap();
        assert_eq!(sa.iv_len(), 0);
        assert_eq!(sa.crypto_params().cipher, OffsetLength { offset: 8, length: 32 });
    }

    #[test]
    fn test_sequence_number_esn() {
        let alg = Algorithm::Null {
            auth: AuthAlgorithm::HmacSha256,
        };
        let sa = SecurityAssociation::new(&config(alg, true)).unwrap();
        sa.replay().update_start().update((1 << 32) + 5).unwrap();
        let window = sa.replay().acquire();
        assert_eq!(sa.sequence_number(&window, 3), (1 << 32) + 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut cfg = config(
            Algorithm::Null {
                auth: AuthAlgorithm::HmacSha256,
            },
            false,
        );
        cfg.spi = 0;
        assert!(matches!(
            SecurityAssociation::new(&cfg),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_algorithm_display() {
        let alg = Algorithm::CtrHmac {
            cipher: CtrCipher::AesCtr256,
            salt: [0; 4],
            auth: AuthAlgorithm::HmacSha256,
        };
        assert_eq!(alg.to_string(), "aes256-ctr/hmac-sha256");
        let alg = Algorithm::Aead {
            cipher: AeadCipher::ChaCha20Poly1305,
            salt: [0; 4],
        };
        assert_eq!(alg.to_string(), "chacha20-poly1305");
    }

    #[test]
    fn test_tx_offload_template() {
        let tpl = TxOffloadTemplate {
            mask: 0xFFFF_0000,
            value: 0x12,
        };
        assert_eq!(tpl.apply(0xABCD_EF01), 0xABCD_0012);
        assert_eq!(TxOffloadTemplate::default().apply(77), 77);
    }
}
