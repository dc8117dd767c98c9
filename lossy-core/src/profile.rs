//! Impairment profile: bandwidth, latency range, loss and header overhead.

use std::num::NonZeroU64;
use std::time::Duration;

/// Errors raised while validating an impairment profile.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ProfileError {
    /// Maximum latency is smaller than minimum latency
    #[error("Inverted latency range: min {min:?} is greater than max {max:?}")]
    InvertedLatency {
        /// Configured minimum latency
        min: Duration,
        /// Configured maximum latency
        max: Duration,
    },

    /// Loss probability outside of [0, 1] or NaN
    #[error("Invalid loss probability: {probability}")]
    InvalidLossProbability {
        /// Rejected probability value
        probability: f64,
    },
}

/// Immutable description of how the outbound path of a connection is impaired.
///
/// Created once when a connection is wrapped. Bandwidth is in bytes per
/// second; `None` means unlimited, in which case the header overhead has no
/// effect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpairmentProfile {
    bandwidth: Option<NonZeroU64>,
    min_latency: Duration,
    max_latency: Duration,
    loss_probability: f64,
    header_overhead: usize,
    seed: Option<u64>,
}

impl ImpairmentProfile {
    /// Creates a profile with every parameter set explicitly.
    ///
    /// `bandwidth` is in bytes/second, e.g. `1024 * 1024` for an 8 Mbit/s
    /// link. Zero or negative means unlimited.
    ///
    /// # Errors
    ///
    /// - `ProfileError::InvertedLatency` - If `max_latency < min_latency`
    /// - `ProfileError::InvalidLossProbability` - If `loss_probability` is outside `[0, 1]`
    pub fn new(
        bandwidth: i64,
        min_latency: Duration,
        max_latency: Duration,
        loss_probability: f64,
        header_overhead: usize,
    ) -> Result<Self, ProfileError> {
        Self::builder()
            .bandwidth(bandwidth)
            .latency(min_latency, max_latency)
            .loss_probability(loss_probability)
            .header_overhead(header_overhead)
            .build()
    }

    /// Creates a profile with latency and loss only: unlimited bandwidth, no
    /// header overhead.
    ///
    /// # Errors
    ///
    /// - `ProfileError::InvertedLatency` - If `max_latency < min_latency`
    /// - `ProfileError::InvalidLossProbability` - If `loss_probability` is outside `[0, 1]`
    pub fn latency_and_loss(
        min_latency: Duration,
        max_latency: Duration,
        loss_probability: f64,
    ) -> Result<Self, ProfileError> {
        Self::new(0, min_latency, max_latency, loss_probability, 0)
    }

    /// Profile that leaves the connection untouched apart from the hop
    /// through a delivery task.
    pub fn transparent() -> Self {
        Self {
            bandwidth: None,
            min_latency: Duration::ZERO,
            max_latency: Duration::ZERO,
            loss_probability: 0.0,
            header_overhead: 0,
            seed: None,
        }
    }

    /// Returns builder for customizing the profile.
    pub fn builder() -> ImpairmentProfileBuilder {
        ImpairmentProfileBuilder::new()
    }

    /// Bandwidth in bytes per second, `None` if unlimited.
    pub fn bandwidth(&self) -> Option<NonZeroU64> {
        self.bandwidth
    }

    pub fn min_latency(&self) -> Duration {
        self.min_latency
    }

    pub fn max_latency(&self) -> Duration {
        self.max_latency
    }

    pub fn loss_probability(&self) -> f64 {
        self.loss_probability
    }

    pub fn header_overhead(&self) -> usize {
        self.header_overhead
    }

    /// Seed for the random source of connections wrapped with this profile.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Returns a copy of this profile with a fixed random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Wire time of a single byte, zero when bandwidth is unlimited.
    pub fn time_per_byte(&self) -> Duration {
        match self.bandwidth {
            Some(bandwidth) => Duration::from_secs_f64(1.0 / bandwidth.get() as f64),
            None => Duration::ZERO,
        }
    }

    /// Number of bytes billed against the bandwidth for a payload.
    ///
    /// Saturates at `usize::MAX`.
    pub fn billed_size(&self, payload_len: usize) -> usize {
        payload_len.saturating_add(self.header_overhead)
    }

    /// Time a payload occupies the simulated wire, capped at `Duration::MAX`.
    pub fn transmission_time(&self, payload_len: usize) -> Duration {
        match self.bandwidth {
            Some(bandwidth) => {
                let seconds = self.billed_size(payload_len) as f64 / bandwidth.get() as f64;
                Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
            }
            None => Duration::ZERO,
        }
    }

    /// One-way latency for a uniform draw in `[0, 1)`.
    pub fn latency_for(&self, draw: f64) -> Duration {
        let spread = self.max_latency - self.min_latency;
        self.min_latency + spread.mul_f64(draw.clamp(0.0, 1.0))
    }

    /// Whether a uniform draw in `[0, 1)` drops the payload.
    pub fn drops(&self, draw: f64) -> bool {
        draw < self.loss_probability
    }

    /// Returns true if the profile has no effect besides asynchronous delivery.
    pub fn is_transparent(&self) -> bool {
        self.bandwidth.is_none() && self.max_latency.is_zero() && self.loss_probability == 0.0
    }
}

impl Default for ImpairmentProfile {
    fn default() -> Self {
        Self::transparent()
    }
}

/// Builder for configuring impairment parameters.
///
/// Parameters that are not set keep the transparent defaults.
#[derive(Debug, Clone)]
pub struct ImpairmentProfileBuilder {
    bandwidth: i64,
    min_latency: Duration,
    max_latency: Duration,
    loss_probability: f64,
    header_overhead: usize,
    seed: Option<u64>,
}

impl ImpairmentProfileBuilder {
    fn new() -> Self {
        Self {
            bandwidth: 0,
            min_latency: Duration::ZERO,
            max_latency: Duration::ZERO,
            loss_probability: 0.0,
            header_overhead: 0,
            seed: None,
        }
    }

    /// Sets bandwidth in bytes per second, zero or negative for unlimited.
    pub fn bandwidth(mut self, bytes_per_second: i64) -> Self {
        self.bandwidth = bytes_per_second;
        self
    }

    /// Sets the range one-way latency is drawn from.
    pub fn latency(mut self, min: Duration, max: Duration) -> Self {
        self.min_latency = min;
        self.max_latency = max;
        self
    }

    /// Sets a fixed latency with no jitter.
    pub fn fixed_latency(self, latency: Duration) -> Self {
        self.latency(latency, latency)
    }

    /// Sets loss probability.
    pub fn loss_probability(mut self, probability: f64) -> Self {
        self.loss_probability = probability;
        self
    }

    /// Sets per-packet header overhead in bytes.
    pub fn header_overhead(mut self, bytes: usize) -> Self {
        self.header_overhead = bytes;
        self
    }

    /// Sets the random seed for reproducible runs.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validates parameters and creates the profile.
    ///
    /// # Errors
    ///
    /// - `ProfileError::InvertedLatency` - If max latency is below min latency
    /// - `ProfileError::InvalidLossProbability` - If loss probability is NaN, negative or above 1
    pub fn build(self) -> Result<ImpairmentProfile, ProfileError> {
        if self.max_latency < self.min_latency {
            return Err(ProfileError::InvertedLatency {
                min: self.min_latency,
                max: self.max_latency,
            });
        }

        if !(0.0..=1.0).contains(&self.loss_probability) {
            return Err(ProfileError::InvalidLossProbability {
                probability: self.loss_probability,
            });
        }

        if self.loss_probability == 1.0 {
            tracing::warn!("Loss probability is 1.0, every impaired write will be dropped");
        }

        let bandwidth = u64::try_from(self.bandwidth)
            .ok()
            .and_then(NonZeroU64::new);

        Ok(ImpairmentProfile {
            bandwidth,
            min_latency: self.min_latency,
            max_latency: self.max_latency,
            loss_probability: self.loss_probability,
            header_overhead: self.header_overhead,
            seed: self.seed,
        })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::overhead::UDPV4_MIN_HEADER_OVERHEAD;

    #[test]
    fn test_reduced_constructor_fills_defaults() {
        let profile = ImpairmentProfile::latency_and_loss(
            Duration::from_millis(10),
            Duration::from_millis(100),
            0.25,
        )
        .unwrap();

        assert_eq!(profile.bandwidth(), None);
        assert_eq!(profile.header_overhead(), 0);
        assert_eq!(profile.min_latency(), Duration::from_millis(10));
        assert_eq!(profile.max_latency(), Duration::from_millis(100));
        assert_eq!(profile.loss_probability(), 0.25);
    }

    #[test]
    fn test_full_constructor_matches_builder() {
        let full = ImpairmentProfile::new(
            8192,
            Duration::from_millis(5),
            Duration::from_millis(6),
            0.1,
            UDPV4_MIN_HEADER_OVERHEAD,
        )
        .unwrap();
        let built = ImpairmentProfile::builder()
            .bandwidth(8192)
            .latency(Duration::from_millis(5), Duration::from_millis(6))
            .loss_probability(0.1)
            .header_overhead(UDPV4_MIN_HEADER_OVERHEAD)
            .build()
            .unwrap();

        assert_eq!(full, built);
    }

    #[test]
    fn test_non_positive_bandwidth_is_unlimited() {
        for bandwidth in [0, -1, i64::MIN] {
            let profile =
                ImpairmentProfile::new(bandwidth, Duration::ZERO, Duration::ZERO, 0.0, 68).unwrap();
            assert_eq!(profile.bandwidth(), None);
            assert_eq!(profile.time_per_byte(), Duration::ZERO);
            assert_eq!(profile.transmission_time(1500), Duration::ZERO);
        }
    }

    #[test]
    fn test_transmission_time_includes_header_overhead() {
        let profile = ImpairmentProfile::builder()
            .bandwidth(1000)
            .header_overhead(28)
            .build()
            .unwrap();

        assert_eq!(profile.billed_size(72), 100);
        assert_eq!(profile.transmission_time(72), Duration::from_millis(100));
        assert_eq!(profile.time_per_byte(), Duration::from_millis(1));
    }

    #[test]
    fn test_huge_header_overhead_saturates() {
        let profile =
            ImpairmentProfile::new(1, Duration::ZERO, Duration::ZERO, 0.0, usize::MAX).unwrap();

        assert_eq!(profile.billed_size(1), usize::MAX);
        assert_eq!(profile.transmission_time(1), Duration::MAX);

        let unlimited = ImpairmentProfile::new(0, Duration::ZERO, Duration::ZERO, 0.0, usize::MAX)
            .unwrap();
        assert_eq!(unlimited.transmission_time(usize::MAX), Duration::ZERO);
    }

    #[test]
    fn test_inverted_latency_rejected() {
        let result = ImpairmentProfile::latency_and_loss(
            Duration::from_millis(50),
            Duration::from_millis(10),
            0.0,
        );

        assert_eq!(
            result,
            Err(ProfileError::InvertedLatency {
                min: Duration::from_millis(50),
                max: Duration::from_millis(10),
            })
        );
    }

    #[test]
    fn test_invalid_loss_probability_rejected() {
        for probability in [-0.01, 1.01, f64::NAN, f64::INFINITY] {
            let result =
                ImpairmentProfile::latency_and_loss(Duration::ZERO, Duration::ZERO, probability);
            assert!(
                matches!(result, Err(ProfileError::InvalidLossProbability { .. })),
                "probability {probability} should be rejected"
            );
        }
    }

    #[test]
    fn test_total_loss_is_accepted() {
        let profile =
            ImpairmentProfile::latency_and_loss(Duration::ZERO, Duration::ZERO, 1.0).unwrap();
        assert!(profile.drops(0.0));
        assert!(profile.drops(0.999_999));
    }

    #[test]
    fn test_zero_loss_never_drops() {
        let profile = ImpairmentProfile::transparent();
        assert!(!profile.drops(0.0));
        assert!(profile.is_transparent());
    }

    #[test]
    fn test_fixed_latency_has_no_jitter() {
        let profile = ImpairmentProfile::builder()
            .fixed_latency(Duration::from_millis(30))
            .build()
            .unwrap();

        assert_eq!(profile.latency_for(0.0), Duration::from_millis(30));
        assert_eq!(profile.latency_for(0.99), Duration::from_millis(30));
        assert!(!profile.is_transparent());
    }

    #[test]
    fn test_seed_is_carried() {
        let profile = ImpairmentProfile::transparent().with_seed(7);
        assert_eq!(profile.seed(), Some(7));
        assert_eq!(ImpairmentProfile::builder().seed(9).build().unwrap().seed(), Some(9));
    }

    proptest! {
        #[test]
        fn latency_stays_within_range(
            min_ms in 0u64..1_000,
            spread_ms in 0u64..1_000,
            draw in 0.0f64..1.0,
        ) {
            let min = Duration::from_millis(min_ms);
            let max = min + Duration::from_millis(spread_ms);
            let profile = ImpairmentProfile::latency_and_loss(min, max, 0.0).unwrap();
            let latency = profile.latency_for(draw);
            prop_assert!(latency >= min);
            prop_assert!(latency <= max);
        }

        #[test]
        fn transmission_time_grows_with_size(
            bandwidth in 1i64..10_000_000,
            overhead in 0usize..100,
            len in 0usize..65_536,
        ) {
            let profile = ImpairmentProfile::builder()
                .bandwidth(bandwidth)
                .header_overhead(overhead)
                .build()
                .unwrap();
            prop_assert!(profile.transmission_time(len) <= profile.transmission_time(len + 1));
        }
    }
}
