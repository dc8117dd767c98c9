//! In-memory transport for exercising impairment without sockets.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::transport::slot::SocketSlot;
use crate::transport::{DatagramTransport, StreamTransport};

/// A payload that reached the recording transport.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub payload: Bytes,
    /// Destination of a datagram send, `None` for stream writes.
    pub destination: Option<SocketAddr>,
    pub at: Instant,
}

#[derive(Debug)]
struct Recorder {
    deliveries: Mutex<Vec<Delivery>>,
    fail_writes: AtomicBool,
    inbound_tx: mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>>,
}

impl Recorder {
    fn record(&self, payload: &[u8], destination: Option<SocketAddr>) -> io::Result<usize> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "injected write failure"));
        }
        self.deliveries.lock().push(Delivery {
            payload: Bytes::copy_from_slice(payload),
            destination,
            at: Instant::now(),
        });
        Ok(payload.len())
    }

    async fn next_inbound(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut inbound = self.inbound_rx.lock().await;
        let (data, from) = inbound
            .recv()
            .await
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok((n, from))
    }
}

/// Transport that records every write instead of sending it.
///
/// Implements both [`StreamTransport`] and [`DatagramTransport`], honors
/// deadlines and close exactly like the socket transports, and serves reads
/// from payloads queued with [`push_inbound`](RecordingTransport::push_inbound).
#[derive(Debug)]
pub struct RecordingTransport {
    recorder: Arc<Recorder>,
    slot: SocketSlot<Arc<Recorder>>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTransport {
    /// Local address reported by the transport.
    pub const LOCAL_ADDR: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST), 4000);

    /// Peer address reported by the transport and used as sender of inbound data.
    pub const PEER_ADDR: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST), 4001);

    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Recorder {
            deliveries: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
        });
        Self {
            slot: SocketSlot::new(Arc::clone(&recorder)),
            recorder,
        }
    }

    /// Snapshot of everything delivered so far, in delivery order.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.recorder.deliveries.lock().clone()
    }

    pub fn delivery_count(&self) -> usize {
        self.recorder.deliveries.lock().len()
    }

    /// Waits until at least `count` payloads were delivered or `timeout`
    /// elapsed, then returns the snapshot.
    pub async fn wait_for_deliveries(&self, count: usize, timeout: Duration) -> Vec<Delivery> {
        let deadline = Instant::now() + timeout;
        while self.delivery_count() < count && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        self.deliveries()
    }

    /// Makes subsequent writes fail with `BrokenPipe`.
    pub fn fail_writes(&self, fail: bool) {
        self.recorder.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Queues data for the next read, as if sent by [`Self::PEER_ADDR`].
    pub fn push_inbound(&self, data: Vec<u8>) {
        let _ = self.recorder.inbound_tx.send((data, Self::PEER_ADDR));
    }
}

#[async_trait]
impl StreamTransport for RecordingTransport {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.slot
            .read_op(move |recorder| async move {
                recorder.next_inbound(buf).await.map(|(n, _)| n)
            })
            .await
    }

    async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.slot
            .write_op(move |recorder| async move { recorder.record(buf, None) })
            .await
    }

    async fn close(&self) -> io::Result<()> {
        self.slot.close()
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.slot.with(|_| Ok(Self::LOCAL_ADDR))
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.slot.with(|_| Ok(Self::PEER_ADDR))
    }

    async fn set_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.slot.set_deadline(deadline)
    }

    async fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.slot.set_read_deadline(deadline)
    }

    async fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.slot.set_write_deadline(deadline)
    }
}

#[async_trait]
impl DatagramTransport for RecordingTransport {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.slot
            .read_op(move |recorder| async move { recorder.next_inbound(buf).await })
            .await
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.slot
            .write_op(move |recorder| async move { recorder.record(buf, Some(target)) })
            .await
    }

    async fn close(&self) -> io::Result<()> {
        self.slot.close()
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.slot.with(|_| Ok(Self::LOCAL_ADDR))
    }

    async fn set_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.slot.set_deadline(deadline)
    }

    async fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.slot.set_read_deadline(deadline)
    }

    async fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.slot.set_write_deadline(deadline)
    }
}
