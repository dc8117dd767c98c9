//! Loss rates, jitter and throttling measured against the recording transport

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use lossy_core::test_utils::RecordingTransport;
use lossy_core::{
    DatagramTransport, ImpairmentProfile, LossyDatagram, LossyStream, StreamTransport,
};

use crate::common::wait_until_settled;

const SEND_COUNT: usize = 16 * 1024;
const LOSS: f64 = 0.33;
const LOSS_TOLERANCE: f64 = 0.03;

fn lossy_profile(seed: u64) -> ImpairmentProfile {
    ImpairmentProfile::builder()
        .loss_probability(LOSS)
        .seed(seed)
        .build()
        .unwrap()
}

async fn stream_delivered(profile: ImpairmentProfile) -> usize {
    let conn = LossyStream::new(RecordingTransport::new(), profile);
    for i in 0..SEND_COUNT {
        conn.write(&i.to_le_bytes()).await.unwrap();
    }
    wait_until_settled(conn.get_ref(), Duration::from_secs(10)).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stream_loss_rate() {
    let delivered = stream_delivered(lossy_profile(7)).await;

    let measured = 1.0 - delivered as f64 / SEND_COUNT as f64;
    assert!(
        (measured - LOSS).abs() <= LOSS_TOLERANCE,
        "measured loss {measured:.4}, expected {LOSS}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_datagram_loss_rate() {
    let target: SocketAddr = "192.0.2.1:9000".parse().unwrap();
    let conn = LossyDatagram::new(RecordingTransport::new(), lossy_profile(11));
    for i in 0..SEND_COUNT {
        conn.send_to(&i.to_le_bytes(), target).await.unwrap();
    }
    let delivered = wait_until_settled(conn.get_ref(), Duration::from_secs(10)).await;

    let measured = 1.0 - delivered as f64 / SEND_COUNT as f64;
    assert!(
        (measured - LOSS).abs() <= LOSS_TOLERANCE,
        "measured loss {measured:.4}, expected {LOSS}"
    );
    assert!(
        conn.get_ref()
            .deliveries()
            .iter()
            .all(|d| d.destination == Some(target))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_seed_drops_same_count() {
    let (first, second) = futures::future::join(
        stream_delivered(lossy_profile(42)),
        stream_delivered(lossy_profile(42)),
    )
    .await;
    assert_eq!(first, second);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_zero_loss_delivers_everything() {
    let conn = LossyStream::new(RecordingTransport::new(), ImpairmentProfile::transparent());
    for i in 0..SEND_COUNT {
        conn.write(&i.to_le_bytes()).await.unwrap();
    }

    let deliveries = conn
        .get_ref()
        .wait_for_deliveries(SEND_COUNT, Duration::from_secs(10))
        .await;
    assert_eq!(deliveries.len(), SEND_COUNT);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_jitter_reorders_within_bounds() {
    const COUNT: usize = 50;
    const MAX_LATENCY: Duration = Duration::from_millis(200);

    let conn = LossyStream::new(
        RecordingTransport::new(),
        ImpairmentProfile::builder()
            .latency(Duration::ZERO, MAX_LATENCY)
            .seed(3)
            .build()
            .unwrap(),
    );

    let started = Instant::now();
    for i in 0..COUNT {
        conn.write(&[i as u8]).await.unwrap();
    }
    let deliveries = conn
        .get_ref()
        .wait_for_deliveries(COUNT, Duration::from_secs(2))
        .await;
    assert_eq!(deliveries.len(), COUNT);

    let order: Vec<u8> = deliveries.iter().map(|d| d.payload[0]).collect();
    let mut sorted = order.clone();
    sorted.sort_unstable();
    assert_ne!(order, sorted, "jitter should reorder payloads");
    assert_eq!(sorted, (0..COUNT as u8).collect::<Vec<_>>());

    for delivery in &deliveries {
        let latency = delivery.at.duration_since(started);
        assert!(
            latency <= MAX_LATENCY + Duration::from_millis(50),
            "latency {latency:?} above range"
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bandwidth_serializes_transmissions() {
    const PAYLOAD: usize = 1000;
    const COUNT: usize = 5;

    let conn = LossyStream::new(
        RecordingTransport::new(),
        ImpairmentProfile::builder().bandwidth(10_000).build().unwrap(),
    );

    let started = Instant::now();
    for _ in 0..COUNT {
        conn.write(&[0u8; PAYLOAD]).await.unwrap();
    }
    let deliveries = conn
        .get_ref()
        .wait_for_deliveries(COUNT, Duration::from_secs(2))
        .await;
    assert_eq!(deliveries.len(), COUNT);

    for pair in deliveries.windows(2) {
        let gap = pair[1].at.duration_since(pair[0].at);
        assert!(gap >= Duration::from_millis(90), "gap {gap:?} below transmission time");
    }
    let last = deliveries[COUNT - 1].at.duration_since(started);
    assert!(last >= Duration::from_millis(500), "finished early: {last:?}");
    assert!(last <= Duration::from_millis(650), "finished late: {last:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_latency_overlaps_transmission() {
    const COUNT: usize = 5;
    const LATENCY: Duration = Duration::from_millis(200);

    let conn = LossyStream::new(
        RecordingTransport::new(),
        ImpairmentProfile::builder()
            .bandwidth(10_000)
            .fixed_latency(LATENCY)
            .build()
            .unwrap(),
    );

    let started = Instant::now();
    for _ in 0..COUNT {
        conn.write(&[0u8; 100]).await.unwrap();
    }
    let deliveries = conn
        .get_ref()
        .wait_for_deliveries(COUNT, Duration::from_secs(2))
        .await;
    assert_eq!(deliveries.len(), COUNT);

    // Latency sleeps run outside the wire, so they overlap
    let last = deliveries[COUNT - 1].at.duration_since(started);
    assert!(last >= Duration::from_millis(250), "finished early: {last:?}");
    assert!(last <= Duration::from_millis(400), "finished late: {last:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reads_bypass_pending_writes() {
    let conn = LossyStream::new(
        RecordingTransport::new(),
        ImpairmentProfile::builder()
            .bandwidth(100)
            .fixed_latency(Duration::from_secs(1))
            .build()
            .unwrap(),
    );
    conn.write(&[0u8; 500]).await.unwrap();
    conn.get_ref().push_inbound(b"reply".to_vec());

    let mut buf = [0u8; 8];
    let started = Instant::now();
    let n = conn.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"reply");
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_state_changes_do_not_wait_for_the_wire() {
    const QUICK: Duration = Duration::from_millis(50);

    // 200 bytes at 1000 B/s keep the wire busy for 200 ms
    let conn = LossyStream::new(
        RecordingTransport::new(),
        ImpairmentProfile::builder().bandwidth(1000).build().unwrap(),
    );
    conn.write(&[0u8; 200]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = Instant::now();
    conn.write(&[1u8; 10]).await.unwrap();
    assert!(started.elapsed() < QUICK, "write queued behind the wire");

    let started = Instant::now();
    conn.set_write_deadline(Some(Instant::now() + Duration::from_secs(10)))
        .await
        .unwrap();
    assert!(started.elapsed() < QUICK, "deadline update queued behind the wire");

    let started = Instant::now();
    conn.close().await.unwrap();
    assert!(started.elapsed() < QUICK, "close queued behind the wire");

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(conn.get_ref().delivery_count(), 0);
}
