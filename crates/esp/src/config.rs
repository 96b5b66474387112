//! Security Association configuration
//!
//! Provides [`SaConfig`] and its builder. A validated configuration is
//! turned into a [`SecurityAssociation`](crate::sa::SecurityAssociation),
//! which derives everything the data plane needs from it.
//!
//! With the `serde` feature the configuration can be loaded from any serde
//! format by the SA-management layer:
//!
//! ```json
//! {
//!   "spi": 4096,
//!   "algorithm": { "family": "aead", "cipher": "aes-gcm128", "salt": [1, 2, 3, 4] },
//!   "mode": { "tunnel": { "inner": "v4" } },
//!   "esn": true,
//!   "replay_window": 128
//! }
//! ```

use crate::iph::IpVersion;
use crate::replay::{DEFAULT_WINDOW_SIZE, MAX_WINDOW_SIZE, MIN_WINDOW_SIZE};
use crate::sa::{AeadCipher, Algorithm, Mode, TxOffloadTemplate};
use crate::{Error, Result};

/// Configuration of one inbound SA
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SaConfig {
    /// Security Parameters Index (non-zero)
    pub spi: u32,

    /// Algorithm family and its parameters
    pub algorithm: Algorithm,

    /// Tunnel or transport mode
    pub mode: Mode,

    /// ICV length override (defaults to the algorithm's full ICV)
    #[cfg_attr(feature = "serde", serde(default))]
    pub icv_len: Option<usize>,

    /// Extended (64-bit) sequence numbers
    #[cfg_attr(feature = "serde", serde(default))]
    pub esn: bool,

    /// Anti-replay window size, 0 disables replay protection
    #[cfg_attr(feature = "serde", serde(default = "default_replay_window"))]
    pub replay_window: u32,

    /// Tx-offload template applied to decapsulated tunnel packets
    #[cfg_attr(feature = "serde", serde(default))]
    pub tx_offload: TxOffloadTemplate,
}

#[cfg(feature = "serde")]
fn default_replay_window() -> u32 {
    DEFAULT_WINDOW_SIZE
}

impl SaConfig {
    /// Create builder for SA configuration
    pub fn builder() -> SaConfigBuilder {
        SaConfigBuilder::new()
    }

    /// Effective ICV length
    pub fn icv_len(&self) -> usize {
        self.icv_len
            .unwrap_or_else(|| self.algorithm.default_icv_len())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.spi == 0 {
            return Err(Error::InvalidConfig("SPI cannot be zero".into()));
        }

        let icv_len = self.icv_len();
        match self.algorithm {
            Algorithm::Aead { cipher, .. } => {
                let valid = match cipher {
                    AeadCipher::AesGcm128 | AeadCipher::AesGcm256 => {
                        matches!(icv_len, 8 | 12 | 16)
                    }
                    AeadCipher::ChaCha20Poly1305 => icv_len == 16,
                };
                if !valid {
                    return Err(Error::InvalidConfig(format!(
                        "ICV length {} not supported by {}",
                        icv_len, self.algorithm
                    )));
                }
            }
            _ => {
                let full = self.algorithm.default_icv_len();
                if icv_len < 4 || icv_len > full || icv_len % 4 != 0 {
                    return Err(Error::InvalidConfig(format!(
                        "ICV length {} must be a multiple of 4 within 4..={} for {}",
                        icv_len, full, self.algorithm
                    )));
                }
            }
        }

        if self.replay_window != 0
            && !(MIN_WINDOW_SIZE..=MAX_WINDOW_SIZE).contains(&self.replay_window)
        {
            return Err(Error::InvalidConfig(format!(
                "Replay window must be 0 or between {} and {}, got {}",
                MIN_WINDOW_SIZE, MAX_WINDOW_SIZE, self.replay_window
            )));
        }

        // SQN.hi is inferred from the window top, which a disabled window never advances
        if self.esn && self.replay_window == 0 {
            return Err(Error::InvalidConfig(
                "Extended sequence numbers require a replay window".into(),
            ));
        }

        Ok(())
    }
}

/// Builder for SaConfig
#[derive(Default)]
pub struct SaConfigBuilder {
    spi: Option<u32>,
    algorithm: Option<Algorithm>,
    mode: Option<Mode>,
    icv_len: Option<usize>,
    esn: Option<bool>,
    replay_window: Option<u32>,
    tx_offload: Option<TxOffloadTemplate>,
}

impl SaConfigBuilder {
    /// Create new SA config builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set SPI
    pub fn with_spi(mut self, spi: u32) -> Self {
        self.spi = Some(spi);
        self
    }

    /// Set algorithm family
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    /// Set mode
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set tunnel mode with the given inner IP version
    pub fn with_tunnel(self, inner: IpVersion) -> Self {
        self.with_mode(Mode::Tunnel { inner })
    }

    /// Set transport mode with the given outer IP version
    pub fn with_transport(self, outer: IpVersion) -> Self {
        self.with_mode(Mode::Transport { outer })
    }

    /// Override ICV length
    pub fn with_icv_len(mut self, icv_len: usize) -> Self {
        self.icv_len = Some(icv_len);
        self
    }

    /// Enable or disable extended sequence numbers
    pub fn with_esn(mut self, esn: bool) -> Self {
        self.esn = Some(esn);
        self
    }

    /// Set replay window size (0 disables replay protection)
    pub fn with_replay_window(mut self, size: u32) -> Self {
        self.replay_window = Some(size);
        self
    }

    /// Set tunnel-mode tx-offload template
    pub fn with_tx_offload(mut self, mask: u64, value: u64) -> Self {
        self.tx_offload = Some(TxOffloadTemplate { mask, value });
        self
    }

    /// Build SaConfig with validation
    pub fn build(self) -> Result<SaConfig> {
        let config = SaConfig {
            spi: self
                .spi
                .ok_or_else(|| Error::InvalidConfig("spi is required".into()))?,
            algorithm: self
                .algorithm
                .ok_or_else(|| Error::InvalidConfig("algorithm is required".into()))?,
            mode: self
                .mode
                .ok_or_else(|| Error::InvalidConfig("mode is required".into()))?,
            icv_len: self.icv_len,
            esn: self.esn.unwrap_or(false),
            replay_window: self.replay_window.unwrap_or(DEFAULT_WINDOW_SIZE),
            tx_offload: self.tx_offload.unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }
}
