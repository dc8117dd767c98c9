//! Write-path impairment engine
//!
//! Every outbound payload is either sent straight through (connection closed
//! or write deadline expired) or accepted into a simulated wire and handed to
//! a detached delivery task. The task:
//!
//! 1. waits for its turn on the wire (throttle lock) and sleeps for the
//!    payload's transmission time,
//! 2. rolls for loss,
//! 3. sleeps for its one-way latency with no lock held,
//! 4. performs the real send under the state lock unless the connection was
//!    closed in the meantime.
//!
//! Because step 3 runs outside the throttle lock, payloads queue for
//! bandwidth in order but can still overtake each other through jitter.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::{Mutex, MutexGuard};

use crate::profile::ImpairmentProfile;
use crate::transport::Deliver;

/// Mutable per-connection state guarded by the state lock.
#[derive(Debug, Default)]
pub struct WriteState {
    closed: bool,
    write_deadline: Option<Instant>,
}

impl WriteState {
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Marks the connection closed. There is no way back.
    pub fn mark_closed(&mut self) {
        self.closed = true;
    }

    pub fn write_deadline(&self) -> Option<Instant> {
        self.write_deadline
    }

    pub fn set_write_deadline(&mut self, deadline: Option<Instant>) {
        self.write_deadline = deadline;
    }

    /// True if writes must skip impairment: closed, or a deadline that is
    /// not in the future.
    fn bypasses(&self, now: Instant) -> bool {
        self.closed || self.write_deadline.is_some_and(|deadline| deadline <= now)
    }
}

/// Decision for a payload that made it through the throttle.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Fate {
    Dropped,
    Delayed(std::time::Duration),
}

struct Shared<T> {
    underlying: T,
    profile: ImpairmentProfile,
    state: Mutex<WriteState>,
    throttle: Mutex<()>,
    rng: parking_lot::Mutex<ChaCha8Rng>,
}

/// Applies an [`ImpairmentProfile`] to the writes of an underlying transport.
///
/// The underlying transport is only ever written to, closed, or given new
/// deadlines while the state lock is held. Reads go to [`underlying`]
/// directly.
///
/// [`underlying`]: WriteImpairment::underlying
pub struct WriteImpairment<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for WriteImpairment<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for WriteImpairment<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteImpairment")
            .field("profile", &self.shared.profile)
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> WriteImpairment<T> {
    /// Takes ownership of `underlying` and seeds the random source once.
    pub fn new(underlying: T, profile: ImpairmentProfile) -> Self {
        let seed = profile.seed().unwrap_or_else(rand::random);
        tracing::debug!(?profile, seed, "Impairing outbound path");

        Self {
            shared: Arc::new(Shared {
                underlying,
                profile,
                state: Mutex::new(WriteState::default()),
                throttle: Mutex::new(()),
                rng: parking_lot::Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            }),
        }
    }

    /// The wrapped transport, for operations that are not impaired.
    pub fn underlying(&self) -> &T {
        &self.shared.underlying
    }

    pub fn profile(&self) -> &ImpairmentProfile {
        &self.shared.profile
    }

    /// Acquires the state lock.
    ///
    /// Callers closing the connection or changing its deadline must keep the
    /// guard while calling into the underlying transport.
    pub async fn state(&self) -> MutexGuard<'_, WriteState> {
        self.shared.state.lock().await
    }

    /// Schedules one outbound payload.
    ///
    /// Returns `Ok(payload.len())` as soon as the payload is accepted; the
    /// outcome of the delayed send is never reported. When the connection is
    /// closed or its write deadline has expired, the payload is sent
    /// synchronously and the underlying result is returned unchanged.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - `io::Error` - Only on bypass, whatever the underlying send returns
    pub async fn schedule<D>(&self, payload: &[u8], destination: D) -> io::Result<usize>
    where
        T: Deliver<D>,
        D: Send + 'static,
    {
        {
            let state = self.shared.state.lock().await;
            if state.bypasses(Instant::now()) {
                tracing::trace!(closed = state.closed, "Write bypasses impairment");
                return self.shared.underlying.deliver(payload, destination).await;
            }
        }

        let shared = Arc::clone(&self.shared);
        let payload = Bytes::copy_from_slice(payload);
        let accepted = payload.len();
        tokio::spawn(async move {
            shared.deliver_later(payload, destination).await;
        });

        Ok(accepted)
    }
}

impl<T> Shared<T> {
    async fn deliver_later<D>(&self, payload: Bytes, destination: D)
    where
        T: Deliver<D>,
    {
        self.occupy_wire(payload.len()).await;

        let latency = match self.roll() {
            Fate::Dropped => return,
            Fate::Delayed(latency) => latency,
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let state = self.state.lock().await;
        if state.closed {
            return;
        }
        let _ = self.underlying.deliver(&payload, destination).await;
    }

    /// Holds the throttle lock for the payload's transmission time.
    async fn occupy_wire(&self, payload_len: usize) {
        let transmission = self.profile.transmission_time(payload_len);
        let _wire = self.throttle.lock().await;
        if !transmission.is_zero() {
            tokio::time::sleep(transmission).await;
        }
    }

    fn roll(&self) -> Fate {
        let mut rng = self.rng.lock();
        if self.profile.drops(rng.random::<f64>()) {
            return Fate::Dropped;
        }
        Fate::Delayed(self.profile.latency_for(rng.random::<f64>()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_utils::RecordingTransport;

    fn engine(profile: ImpairmentProfile) -> WriteImpairment<RecordingTransport> {
        WriteImpairment::new(RecordingTransport::new(), profile)
    }

    #[test]
    fn test_bypass_conditions() {
        let now = Instant::now();
        let mut state = WriteState::default();
        assert!(!state.bypasses(now));

        state.set_write_deadline(Some(now + Duration::from_secs(1)));
        assert!(!state.bypasses(now));

        // A deadline equal to now is no longer in the future
        state.set_write_deadline(Some(now));
        assert!(state.bypasses(now));

        state.set_write_deadline(None);
        state.mark_closed();
        assert!(state.bypasses(now));
    }

    #[tokio::test]
    async fn test_accepts_without_waiting_for_delivery() {
        let engine = engine(
            ImpairmentProfile::builder()
                .fixed_latency(Duration::from_millis(200))
                .build()
                .unwrap(),
        );

        let started = Instant::now();
        assert_eq!(engine.schedule(b"hello", ()).await.unwrap(), 5);
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(engine.underlying().deliveries().is_empty());

        let deliveries = engine
            .underlying()
            .wait_for_deliveries(1, Duration::from_secs(2))
            .await;
        assert_eq!(deliveries[0].payload.as_ref(), b"hello");
        assert!(deliveries[0].at.duration_since(started) >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_same_seed_same_fate() {
        let profile = ImpairmentProfile::builder()
            .latency(Duration::ZERO, Duration::from_millis(100))
            .loss_probability(0.5)
            .seed(1234)
            .build()
            .unwrap();

        let first = engine(profile);
        let second = engine(profile);
        let fates_a: Vec<Fate> = (0..64).map(|_| first.shared.roll()).collect();
        let fates_b: Vec<Fate> = (0..64).map(|_| second.shared.roll()).collect();

        assert_eq!(fates_a, fates_b);
        assert!(fates_a.contains(&Fate::Dropped));
        assert!(fates_a.iter().any(|fate| matches!(fate, Fate::Delayed(_))));
    }

    #[tokio::test]
    async fn test_total_loss_never_touches_underlying() {
        let engine = engine(
            ImpairmentProfile::latency_and_loss(Duration::ZERO, Duration::ZERO, 1.0).unwrap(),
        );

        for _ in 0..32 {
            engine.schedule(b"gone", ()).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(engine.underlying().deliveries().is_empty());
    }

    #[tokio::test]
    async fn test_closed_state_aborts_pending_delivery() {
        let engine = engine(
            ImpairmentProfile::builder()
                .fixed_latency(Duration::from_millis(50))
                .build()
                .unwrap(),
        );

        engine.schedule(b"in flight", ()).await.unwrap();
        engine.state().await.mark_closed();
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(engine.underlying().deliveries().is_empty());
    }

    #[tokio::test]
    async fn test_bypass_returns_underlying_error() {
        let engine = engine(ImpairmentProfile::transparent());
        engine.underlying().fail_writes(true);
        engine
            .state()
            .await
            .set_write_deadline(Some(Instant::now()));

        let err = engine.schedule(b"x", ()).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_unbounded_transmission_time_stays_pending() {
        let engine = engine(
            ImpairmentProfile::new(1, Duration::ZERO, Duration::ZERO, 0.0, usize::MAX).unwrap(),
        );

        assert_eq!(engine.schedule(b"x", ()).await.unwrap(), 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine.state().await.mark_closed();

        assert!(engine.underlying().deliveries().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_errors_are_swallowed() {
        let engine = engine(ImpairmentProfile::transparent());
        engine.underlying().fail_writes(true);

        assert_eq!(engine.schedule(b"x", ()).await.unwrap(), 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(engine.underlying().deliveries().is_empty());
    }
}
