//! Sampler configuration
//!
//! The knobs of the periodic sampling loop, persisted as a postcard blob so
//! the firmware can keep them in flash and the simulator on disk.

use log::warn;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

/// The datasheet asks for this much rest between two reads
pub const MIN_SAMPLE_PERIOD_MS: u32 = 2000;

/// Upper bound on the encoded size of a [`SamplerConfig`]
pub const MAX_ENCODED_LEN: usize = 16;

/// Which read strategy the sampler drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Strategy {
    /// Timer and edge interrupts; the foreground only polls
    #[default]
    InterruptDriven,
    /// One blocking call per read, about 6 ms with interrupts masked
    BusyWait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerConfig {
    pub strategy: Strategy,
    /// Time from the start of one read to the start of the next
    pub sample_period_ms: u32,
    /// How often `check_status` is polled while a read is in flight
    pub poll_interval_ms: u32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::InterruptDriven,
            sample_period_ms: MIN_SAMPLE_PERIOD_MS,
            poll_interval_ms: 10,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to encode sampler config")]
    Encode,
    #[error("failed to decode sampler config")]
    Decode,
    #[error("sample period below the sensor's 2 s minimum")]
    SamplePeriodTooShort,
    #[error("poll interval must be non-zero and shorter than the sample period")]
    BadPollInterval,
}

impl SamplerConfig {
    /// Check the values are usable against a real sensor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_period_ms < MIN_SAMPLE_PERIOD_MS {
            return Err(ConfigError::SamplePeriodTooShort);
        }
        if self.poll_interval_ms == 0 || self.poll_interval_ms >= self.sample_period_ms {
            return Err(ConfigError::BadPollInterval);
        }
        Ok(())
    }

    /// Serialize into `buf`, returning the used prefix.
    pub fn to_bytes<'a>(&self, buf: &'a mut [u8]) -> Result<&'a mut [u8], ConfigError> {
        postcard::to_slice(self, buf).map_err(|e| {
            warn!("Sampler config encode failed: {}", e);
            ConfigError::Encode
        })
    }

    /// Deserialize and validate a blob written by [`SamplerConfig::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = postcard::from_bytes(bytes).map_err(|e| {
            warn!("Sampler config decode failed: {}", e);
            ConfigError::Decode
        })?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = SamplerConfig::default();
        assert_eq!(config.strategy, Strategy::InterruptDriven);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_persist_and_load() {
        let config = SamplerConfig {
            strategy: Strategy::BusyWait,
            sample_period_ms: 5000,
            poll_interval_ms: 25,
        };
        let mut buf = [0u8; MAX_ENCODED_LEN];
        let bytes = config.to_bytes(&mut buf).unwrap();
        assert!(bytes.len() <= MAX_ENCODED_LEN);
        assert_eq!(SamplerConfig::from_bytes(bytes), Ok(config));
    }

    #[test]
    fn test_encode_into_short_buffer_fails() {
        let mut buf = [0u8; 2];
        assert_eq!(
            SamplerConfig::default().to_bytes(&mut buf),
            Err(ConfigError::Encode)
        );
    }

    #[test]
    fn test_load_rejects_garbage_and_invalid_values() {
        assert_eq!(SamplerConfig::from_bytes(&[]), Err(ConfigError::Decode));
        assert_eq!(SamplerConfig::from_bytes(&[7]), Err(ConfigError::Decode));

        let too_fast = SamplerConfig {
            sample_period_ms: 500,
            ..SamplerConfig::default()
        };
        let mut buf = [0u8; MAX_ENCODED_LEN];
        let bytes = too_fast.to_bytes(&mut buf).unwrap();
        assert_eq!(
            SamplerConfig::from_bytes(bytes),
            Err(ConfigError::SamplePeriodTooShort)
        );
    }

    #[test]
    fn test_poll_interval_bounds() {
        let mut config = SamplerConfig::default();
        config.poll_interval_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::BadPollInterval));
        config.poll_interval_ms = config.sample_period_ms;
        assert_eq!(config.validate(), Err(ConfigError::BadPollInterval));
    }
}
