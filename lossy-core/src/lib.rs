//! Lossy Core - outbound impairment for stream and datagram transports
//!
//! Wraps a connection or endpoint so that its writes behave like they cross
//! an unreliable network: bounded bandwidth, random one-way latency and
//! probabilistic loss. Reads are left alone. Intended for testing protocols
//! built on unreliable transports without a real lossy network.
//!
//! # Architecture
//!
//! ```text
//!  caller ──write/send_to──▶ LossyStream / LossyDatagram
//!                                    │
//!                             WriteImpairment ──▶ detached delivery task
//!                                    │              throttle ▸ loss ▸ latency
//!                                    ▼                     │
//!                           StreamTransport / DatagramTransport ◀─┘
//! ```
//!
//! - [`profile`]       - bandwidth, latency range, loss and header overhead
//! - [`engine`]        - the write-path impairment engine
//! - [`stream`]        - impaired stream connections
//! - [`datagram`]      - impaired datagram endpoints
//! - [`transport`]     - transport traits and tokio socket implementations
//! - [`overhead`]      - header sizes of common network stacks
//! - [`config`]        - configuration with environment overrides
//! - [`tracing_setup`] - console and file logging

pub mod config;
pub mod datagram;
pub mod engine;
pub mod overhead;
pub mod profile;
pub mod stream;
pub mod tracing_setup;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export main types for convenient access
pub use config::ImpairmentConfig;
pub use datagram::LossyDatagram;
pub use engine::WriteImpairment;
pub use profile::{ImpairmentProfile, ProfileError};
pub use stream::LossyStream;
pub use transport::{DatagramTransport, StreamTransport};

/// Errors surfaced by lossy outside of the I/O paths.
///
/// Reads and writes report plain `std::io::Error`s so wrapped connections stay
/// interchangeable with the sockets they wrap.
#[derive(Debug, thiserror::Error)]
pub enum LossyError {
    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

impl LossyError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            LossyError::Profile(ProfileError::InvertedLatency { .. }) => {
                "Maximum latency must not be smaller than minimum latency".to_string()
            }
            LossyError::Profile(ProfileError::InvalidLossProbability { probability }) => {
                format!("Loss probability must be between 0 and 1, got {probability}")
            }
            LossyError::Io(_) => "Network error occurred".to_string(),
            LossyError::Configuration { reason } => format!("Configuration error: {reason}"),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            LossyError::Profile(_) | LossyError::Configuration { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LossyError>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_profile_errors_are_user_errors() {
        let err: LossyError =
            ImpairmentProfile::latency_and_loss(Duration::ZERO, Duration::ZERO, 2.0)
                .unwrap_err()
                .into();

        assert!(err.is_user_error());
        assert_eq!(
            err.user_message(),
            "Loss probability must be between 0 and 1, got 2"
        );
    }

    #[test]
    fn test_io_errors_are_not_user_errors() {
        let err = LossyError::from(std::io::Error::from(std::io::ErrorKind::AddrInUse));
        assert!(!err.is_user_error());
        assert_eq!(err.user_message(), "Network error occurred");
    }
}
