//! Impairment configuration with environment overrides.
//!
//! Plain-number settings that can be deserialized, overridden from the
//! environment and turned into a validated [`ImpairmentProfile`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::overhead::UDPV4_MIN_HEADER_OVERHEAD;
use crate::profile::{ImpairmentProfile, ProfileError};

/// Impairment settings in configuration-friendly units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpairmentConfig {
    /// Bandwidth in bytes per second (0 or negative = unlimited)
    pub bandwidth: i64,
    /// Lower bound of one-way latency in milliseconds
    pub min_latency_ms: u64,
    /// Upper bound of one-way latency in milliseconds
    pub max_latency_ms: u64,
    /// Probability of dropping a write (0.0 to 1.0)
    pub loss_probability: f64,
    /// Header bytes billed per packet
    pub header_overhead: usize,
    /// Seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for ImpairmentConfig {
    fn default() -> Self {
        Self {
            bandwidth: 0,
            min_latency_ms: 0,
            max_latency_ms: 0,
            loss_probability: 0.0,
            header_overhead: 0,
            seed: None,
        }
    }
}

impl ImpairmentConfig {
    /// Creates a configuration for deterministic testing.
    pub fn deterministic_testing() -> Self {
        Self {
            seed: Some(42), // Fixed seed for reproducible tests
            ..Self::default()
        }
    }

    /// Creates a configuration resembling a congested consumer uplink.
    pub fn realistic_simulation() -> Self {
        Self {
            bandwidth: 1_048_576, // 8 Mbit/s
            min_latency_ms: 20,
            max_latency_ms: 80,
            loss_probability: 0.02,
            header_overhead: UDPV4_MIN_HEADER_OVERHEAD,
            seed: None,
        }
    }

    /// Creates configuration with environment variable overrides.
    ///
    /// Reads `LOSSY_BANDWIDTH`, `LOSSY_MIN_LATENCY_MS`, `LOSSY_MAX_LATENCY_MS`,
    /// `LOSSY_LOSS_PROBABILITY`, `LOSSY_HEADER_OVERHEAD` and `LOSSY_SEED`.
    /// Values that do not parse are ignored.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides looked up by variable name.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            lookup(key).and_then(|value| value.trim().parse().ok())
        }

        if let Some(bandwidth) = parsed(&lookup, "LOSSY_BANDWIDTH") {
            self.bandwidth = bandwidth;
        }
        if let Some(min) = parsed(&lookup, "LOSSY_MIN_LATENCY_MS") {
            self.min_latency_ms = min;
        }
        if let Some(max) = parsed(&lookup, "LOSSY_MAX_LATENCY_MS") {
            self.max_latency_ms = max;
        }
        if let Some(probability) = parsed(&lookup, "LOSSY_LOSS_PROBABILITY") {
            self.loss_probability = probability;
        }
        if let Some(overhead) = parsed(&lookup, "LOSSY_HEADER_OVERHEAD") {
            self.header_overhead = overhead;
        }
        if let Some(seed) = parsed(&lookup, "LOSSY_SEED") {
            self.seed = Some(seed);
        }

        self
    }

    /// Builds the validated profile.
    ///
    /// # Errors
    ///
    /// - `ProfileError` - If the latency range is inverted or the loss probability is invalid
    pub fn to_profile(&self) -> Result<ImpairmentProfile, ProfileError> {
        let mut builder = ImpairmentProfile::builder()
            .bandwidth(self.bandwidth)
            .latency(
                Duration::from_millis(self.min_latency_ms),
                Duration::from_millis(self.max_latency_ms),
            )
            .loss_probability(self.loss_probability)
            .header_overhead(self.header_overhead);
        if let Some(seed) = self.seed {
            builder = builder.seed(seed);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_default_config_is_transparent() {
        let profile = ImpairmentConfig::default().to_profile().unwrap();
        assert!(profile.is_transparent());
        assert_eq!(profile.seed(), None);
    }

    #[test]
    fn test_presets() {
        let testing = ImpairmentConfig::deterministic_testing();
        assert_eq!(testing.seed, Some(42));
        assert!(testing.to_profile().unwrap().is_transparent());

        let realistic = ImpairmentConfig::realistic_simulation().to_profile().unwrap();
        assert_eq!(realistic.bandwidth().map(|b| b.get()), Some(1_048_576));
        assert_eq!(realistic.header_overhead(), 28);
        assert!(realistic.loss_probability() > 0.0);
        assert!(realistic.max_latency() > realistic.min_latency());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("LOSSY_BANDWIDTH", "8192"),
            ("LOSSY_MIN_LATENCY_MS", "10"),
            ("LOSSY_MAX_LATENCY_MS", " 100 "),
            ("LOSSY_LOSS_PROBABILITY", "0.33"),
            ("LOSSY_HEADER_OVERHEAD", "not a number"),
            ("LOSSY_SEED", "12345"),
        ]);

        let config = ImpairmentConfig::default()
            .with_overrides(|key| vars.get(key).map(|value| value.to_string()));

        assert_eq!(config.bandwidth, 8192);
        assert_eq!(config.min_latency_ms, 10);
        assert_eq!(config.max_latency_ms, 100);
        assert_eq!(config.loss_probability, 0.33);
        assert_eq!(config.header_overhead, 0);
        assert_eq!(config.seed, Some(12345));
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("LOSSY_MAX_LATENCY_MS", "250");
        }

        let config = ImpairmentConfig::from_env();
        assert_eq!(config.max_latency_ms, 250);

        unsafe {
            std::env::remove_var("LOSSY_MAX_LATENCY_MS");
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ImpairmentConfig {
            min_latency_ms: 50,
            max_latency_ms: 10,
            ..ImpairmentConfig::default()
        };
        assert!(matches!(
            config.to_profile(),
            Err(ProfileError::InvertedLatency { .. })
        ));
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: ImpairmentConfig =
            serde_json::from_str(r#"{"bandwidth": 1024, "loss_probability": 0.25}"#).unwrap();

        assert_eq!(config.bandwidth, 1024);
        assert_eq!(config.loss_probability, 0.25);
        assert_eq!(config.max_latency_ms, 0);
    }
}
