//! Crypto engines
//!
//! [`CryptoEngine`] is the seam to whatever runs the jobs: a lookaside
//! accelerator, an inline NIC or a software library. [`SoftEngine`] runs
//! them on the CPU with the RustCrypto crates, reading and writing the
//! packet through its bounds-checked views.

use aes::{Aes128, Aes256};
use aes_gcm::aead::AeadInPlace;
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use chacha20poly1305::ChaCha20Poly1305;
use cipher::generic_array::GenericArray;
use cipher::{BlockDecryptMut, KeyInit, KeyIvInit, StreamCipher};
use ctr::Ctr32BE;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::job::{CryptoJob, JobOp, JobStatus, Region};
use crate::packet::Packet;
use crate::sa::{AeadCipher, Algorithm, AuthAlgorithm, BlockCipher, CtrCipher, SecurityAssociation};
use crate::{Error, Result};

/// Executes crypto jobs prepared by the inbound pipeline
///
/// Implementations decrypt in place and record the outcome in
/// [`CryptoJob::status`]; they never fail the call itself.
pub trait CryptoEngine: Send + Sync {
    /// Run one job against its packet
    fn process(&self, packet: &mut Packet, job: &mut CryptoJob);

    /// Run a batch of jobs; packets and jobs are matched by position
    fn process_batch(&self, packets: &mut [Packet], jobs: &mut [CryptoJob]) {
        for (packet, job) in packets.iter_mut().zip(jobs.iter_mut()) {
            self.process(packet, job);
        }
    }
}

/// Software crypto engine for one SA
///
/// # Example
///
/// ```rust,no_run
/// # use esp_dataplane::{complete, prepare, AeadCipher, Algorithm, CryptoEngine, IpVersion};
/// # use esp_dataplane::{Packet, SaConfig, SecurityAssociation, SoftEngine};
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # let config = SaConfig::builder()
/// #     .with_spi(0x1000)
/// #     .with_algorithm(Algorithm::Aead { cipher: AeadCipher::AesGcm128, salt: [0; 4] })
/// #     .with_tunnel(IpVersion::V4)
/// #     .build()?;
/// # let sa = SecurityAssociation::new(&config)?;
/// # let cipher_key = [0u8; 16];
/// # let packets: Vec<Packet> = Vec::new();
/// let engine = SoftEngine::new(&sa, &cipher_key, &[])?;
/// let mut batch = prepare(&sa, packets);
/// engine.process_batch(&mut batch.packets, &mut batch.jobs);
/// complete(&mut batch.packets, &batch.jobs);
/// # Ok(())
/// # }
/// ```
pub struct SoftEngine {
    algorithm: Algorithm,
    cipher_key: Zeroizing<Vec<u8>>,
    auth_key: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for SoftEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftEngine")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

fn check_key(what: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(Error::InvalidConfig(format!(
            "{} key must be {} bytes, got {}",
            what, expected, actual
        )));
    }
    Ok(())
}

impl SoftEngine {
    /// Create an engine for `sa`
    ///
    /// # Arguments
    ///
    /// * `sa` - Security association the jobs belong to
    /// * `cipher_key` - Encryption key without salt (ignored for NULL)
    /// * `auth_key` - HMAC key (ignored for AEAD)
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if a key has the wrong length
    pub fn new(sa: &SecurityAssociation, cipher_key: &[u8], auth_key: &[u8]) -> Result<Self> {
        let algorithm = *sa.algorithm();
        match algorithm {
            Algorithm::Aead { cipher, .. } => check_key("cipher", cipher.key_len(), cipher_key.len())?,
            Algorithm::CipherHmac { cipher, auth } => {
                check_key("cipher", cipher.key_len(), cipher_key.len())?;
                check_key("auth", auth.key_len(), auth_key.len())?;
            }
            Algorithm::CtrHmac { cipher, auth, .. } => {
                check_key("cipher", cipher.key_len(), cipher_key.len())?;
                check_key("auth", auth.key_len(), auth_key.len())?;
            }
            Algorithm::Null { auth } => check_key("auth", auth.key_len(), auth_key.len())?,
        }

        Ok(SoftEngine {
            algorithm,
            cipher_key: Zeroizing::new(cipher_key.to_vec()),
            auth_key: Zeroizing::new(auth_key.to_vec()),
        })
    }

    /// Run a job; `Ok(false)` means the ICV did not match
    fn run(&self, packet: &mut Packet, job: &CryptoJob) -> Result<bool> {
        let digest = packet
            .last_segment()
            .room(job.digest.offset, job.digest.len)?
            .to_vec();

        match job.op {
            JobOp::Aead { data, aad } => {
                let aad = packet.last_segment().room(aad.offset, aad.len)?.to_vec();
                let mut buf = read_region(packet, data)?;
                if !self.aead_open(job.iv.as_slice(), &aad, &mut buf, &digest)? {
                    return Ok(false);
                }
                packet.write_at(data.offset, &buf)?;
                Ok(true)
            }
            JobOp::CipherAuth { cipher, auth } => {
                if !self.verify_icv(packet, auth, &digest)? {
                    return Ok(false);
                }
                let mut buf = read_region(packet, cipher)?;
                self.decrypt(job.iv.as_slice(), &mut buf)?;
                packet.write_at(cipher.offset, &buf)?;
                Ok(true)
            }
            JobOp::AuthOnly { auth } => self.verify_icv(packet, auth, &digest),
        }
    }

    fn aead_open(&self, iv: &[u8], aad: &[u8], buf: &mut [u8], tag: &[u8]) -> Result<bool> {
        let Algorithm::Aead { cipher, .. } = self.algorithm else {
            return Err(Error::CryptoError("AEAD job for a non-AEAD SA".into()));
        };
        if tag.len() != 16 {
            return Err(Error::CryptoError(format!(
                "{}-byte AEAD tags are not supported",
                tag.len()
            )));
        }
        if iv.len() < 12 {
            return Err(Error::CryptoError("AEAD nonce too short".into()));
        }

        let nonce = GenericArray::from_slice(&iv[..12]);
        let tag = GenericArray::from_slice(tag);
        let key = self.cipher_key.as_slice();
        let bad_key = |_| Error::CryptoError("Failed to create AEAD cipher".into());

        let opened = match cipher {
            AeadCipher::AesGcm128 => Aes128Gcm::new_from_slice(key)
                .map_err(bad_key)?
                .decrypt_in_place_detached(nonce, aad, buf, tag),
            AeadCipher::AesGcm256 => Aes256Gcm::new_from_slice(key)
                .map_err(bad_key)?
                .decrypt_in_place_detached(nonce, aad, buf, tag),
            AeadCipher::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(key)
                .map_err(bad_key)?
                .decrypt_in_place_detached(nonce, aad, buf, tag),
        };
        Ok(opened.is_ok())
    }

    fn verify_icv(&self, packet: &Packet, auth: Region, digest: &[u8]) -> Result<bool> {
        let alg = self
            .algorithm
            .auth()
            .ok_or_else(|| Error::CryptoError("HMAC job for an AEAD SA".into()))?;
        let data = read_region(packet, auth)?;
        let computed = compute_icv(alg, &self.auth_key, &data)?;
        if digest.len() > computed.len() {
            return Err(Error::CryptoError("ICV longer than HMAC output".into()));
        }
        Ok(computed[..digest.len()].ct_eq(digest).into())
    }

    fn decrypt(&self, iv: &[u8], buf: &mut [u8]) -> Result<()> {
        let key = self.cipher_key.as_slice();
        match self.algorithm {
            Algorithm::CipherHmac { cipher, .. } => match cipher {
                BlockCipher::AesCbc128 => cbc_decrypt::<cbc::Decryptor<Aes128>>(key, iv, buf),
                BlockCipher::AesCbc256 => cbc_decrypt::<cbc::Decryptor<Aes256>>(key, iv, buf),
                BlockCipher::TripleDesCbc => Err(Error::CryptoError(
                    "3DES-CBC is not supported by the software engine".into(),
                )),
            },
            Algorithm::CtrHmac { cipher, .. } => match cipher {
                CtrCipher::AesCtr128 => ctr_apply::<Ctr32BE<Aes128>>(key, iv, buf),
                CtrCipher::AesCtr256 => ctr_apply::<Ctr32BE<Aes256>>(key, iv, buf),
            },
            Algorithm::Aead { .. } | Algorithm::Null { .. } => Ok(()),
        }
    }
}

impl CryptoEngine for SoftEngine {
    fn process(&self, packet: &mut Packet, job: &mut CryptoJob) {
        job.status = match self.run(packet, job) {
            Ok(true) => JobStatus::Success,
            Ok(false) => JobStatus::AuthFailed,
            Err(err) => {
                tracing::debug!(error = %err, "Software crypto job failed");
                JobStatus::Error
            }
        };
    }
}

fn read_region(packet: &Packet, region: Region) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; region.length];
    packet.read_at(region.offset, &mut buf)?;
    Ok(buf)
}

fn hmac<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <M as Mac>::new_from_slice(key)
        .map_err(|_| Error::CryptoError("Failed to create HMAC".into()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Full (untruncated) HMAC over `data`
pub(crate) fn compute_icv(alg: AuthAlgorithm, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    match alg {
        AuthAlgorithm::HmacSha256 => hmac::<Hmac<Sha256>>(key, data),
        AuthAlgorithm::HmacSha384 => hmac::<Hmac<Sha384>>(key, data),
        AuthAlgorithm::HmacSha512 => hmac::<Hmac<Sha512>>(key, data),
    }
}

fn cbc_decrypt<D: KeyIvInit + BlockDecryptMut>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()> {
    let mut dec = D::new_from_slices(key, iv)
        .map_err(|_| Error::CryptoError("Invalid CBC key or IV length".into()))?;
    let bs = D::block_size();
    if buf.len() % bs != 0 {
        return Err(Error::CryptoError(format!(
            "CBC ciphertext length {} is not a multiple of {}",
            buf.len(),
            bs
        )));
    }
    for block in buf.chunks_exact_mut(bs) {
        dec.decrypt_block_mut(GenericArray::from_mut_slice(block));
    }
    Ok(())
}

/// XOR `buf` with the AES-CTR keystream of RFC 3686 (32-bit block counter)
fn ctr_apply<C: KeyIvInit + StreamCipher>(
    key: &[u8],
    counter_block: &[u8],
    buf: &mut [u8],
) -> Result<()> {
    let mut ctr = C::new_from_slices(key, counter_block)
        .map_err(|_| Error::CryptoError("Invalid CTR key or counter block length".into()))?;
    ctr.try_apply_keystream(buf)
        .map_err(|_| Error::CryptoError("CTR keystream exhausted".into()))
}
