//! Error surfacing through the impairing adapters

use std::io;
use std::time::{Duration, Instant};

use lossy_core::{
    DatagramTransport, ImpairmentProfile, LossyDatagram, LossyStream, StreamTransport,
};

use crate::common::loopback_pair;

fn slow_profile() -> ImpairmentProfile {
    ImpairmentProfile::latency_and_loss(Duration::from_millis(100), Duration::from_millis(200), 0.0)
        .unwrap()
}

#[tokio::test]
async fn test_stream_write_errors() {
    let (_endpoint, stream) = loopback_pair().await;
    let stream = LossyStream::new(stream, slow_profile());

    stream
        .set_write_deadline(Some(Instant::now()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    let err = stream.write(&[0u8; 16]).await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::TimedOut);

    stream.set_deadline(None).await.unwrap();
    assert_eq!(stream.write(&[0u8; 16]).await.unwrap(), 16);

    stream.set_deadline(Some(Instant::now())).await.unwrap();
    let err = stream.write(&[0u8; 16]).await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::TimedOut);

    stream.set_deadline(None).await.unwrap();
    stream.close().await.unwrap();
    let err = stream.write(&[0u8; 16]).await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotConnected);
}

#[tokio::test]
async fn test_datagram_send_errors() {
    let (endpoint, stream) = loopback_pair().await;
    let target = stream.local_addr().unwrap();
    let endpoint = LossyDatagram::new(endpoint, slow_profile());

    endpoint
        .set_write_deadline(Some(Instant::now()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    let err = endpoint.send_to(&[0u8; 16], target).await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::TimedOut);

    endpoint.set_deadline(Some(Instant::now())).await.unwrap();
    let err = endpoint.send_to(&[0u8; 16], target).await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::TimedOut);

    endpoint.set_deadline(None).await.unwrap();
    endpoint.close().await.unwrap();
    let err = endpoint.send_to(&[0u8; 16], target).await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotConnected);
}

#[tokio::test]
async fn test_future_deadline_accepts_writes() {
    let (endpoint, stream) = loopback_pair().await;
    let stream = LossyStream::new(stream, slow_profile());

    stream
        .set_write_deadline(Some(Instant::now() + Duration::from_secs(10)))
        .await
        .unwrap();
    let started = Instant::now();
    assert_eq!(stream.write(b"scheduled").await.unwrap(), 9);
    assert!(started.elapsed() < Duration::from_millis(50));

    let mut buf = [0u8; 16];
    endpoint
        .set_read_deadline(Some(Instant::now() + Duration::from_secs(2)))
        .await
        .unwrap();
    let (n, _) = endpoint.recv_from(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"scheduled");
}

#[tokio::test]
async fn test_close_discards_pending_writes() {
    let (endpoint, stream) = loopback_pair().await;
    let stream = LossyStream::new(stream, slow_profile());

    for _ in 0..8 {
        stream.write(b"never").await.unwrap();
    }
    stream.close().await.unwrap();

    let mut buf = [0u8; 16];
    endpoint
        .set_read_deadline(Some(Instant::now() + Duration::from_millis(400)))
        .await
        .unwrap();
    let err = endpoint.recv_from(&mut buf).await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::TimedOut);
}

#[tokio::test]
async fn test_second_close_fails() {
    let (_endpoint, stream) = loopback_pair().await;
    let stream = LossyStream::new(stream, ImpairmentProfile::transparent());

    stream.close().await.unwrap();
    assert!(stream.close().await.is_err());
    assert_eq!(
        stream.read(&mut [0u8; 4]).await.unwrap_err().kind(),
        io::ErrorKind::NotConnected
    );
}
