//! Shared socket handle with deadline and close bookkeeping.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use super::{closed_error, timeout_error};

#[derive(Debug, Default, Clone, Copy)]
struct Deadlines {
    read: Option<Instant>,
    write: Option<Instant>,
}

/// Owns a socket on behalf of a transport.
///
/// Closing takes the socket out of the slot and wakes pending operations;
/// the socket itself is released once the last in-flight operation lets go
/// of its handle.
#[derive(Debug)]
pub(crate) struct SocketSlot<S> {
    socket: RwLock<Option<Arc<S>>>,
    deadlines: Mutex<Deadlines>,
    closed: watch::Sender<bool>,
}

impl<S> SocketSlot<S> {
    pub(crate) fn new(socket: S) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            socket: RwLock::new(Some(Arc::new(socket))),
            deadlines: Mutex::new(Deadlines::default()),
            closed,
        }
    }

    /// Returns the socket, or `NotConnected` once closed.
    pub(crate) fn get(&self) -> io::Result<Arc<S>> {
        self.socket.read().clone().ok_or_else(closed_error)
    }

    /// Runs a synchronous query against the socket.
    pub(crate) fn with<R>(&self, query: impl FnOnce(&S) -> io::Result<R>) -> io::Result<R> {
        let socket = self.get()?;
        query(socket.as_ref())
    }

    /// Closes the slot. Closing twice fails with `NotConnected`.
    pub(crate) fn close(&self) -> io::Result<()> {
        let socket = self.socket.write().take();
        match socket {
            Some(_) => {
                self.closed.send_replace(true);
                Ok(())
            }
            None => Err(closed_error()),
        }
    }

    pub(crate) fn set_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.get()?;
        let mut deadlines = self.deadlines.lock();
        deadlines.read = deadline;
        deadlines.write = deadline;
        Ok(())
    }

    pub(crate) fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.get()?;
        self.deadlines.lock().read = deadline;
        Ok(())
    }

    pub(crate) fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.get()?;
        self.deadlines.lock().write = deadline;
        Ok(())
    }

    /// Runs a read operation bounded by the read deadline and by close.
    pub(crate) async fn read_op<F, Fut, R>(&self, op: F) -> io::Result<R>
    where
        F: FnOnce(Arc<S>) -> Fut,
        Fut: Future<Output = io::Result<R>>,
    {
        let deadline = self.deadlines.lock().read;
        self.run(deadline, op).await
    }

    /// Runs a write operation bounded by the write deadline and by close.
    pub(crate) async fn write_op<F, Fut, R>(&self, op: F) -> io::Result<R>
    where
        F: FnOnce(Arc<S>) -> Fut,
        Fut: Future<Output = io::Result<R>>,
    {
        let deadline = self.deadlines.lock().write;
        self.run(deadline, op).await
    }

    async fn run<F, Fut, R>(&self, deadline: Option<Instant>, op: F) -> io::Result<R>
    where
        F: FnOnce(Arc<S>) -> Fut,
        Fut: Future<Output = io::Result<R>>,
    {
        let socket = self.get()?;
        let closed = self.closed.subscribe();

        let bounded = async move {
            match deadline {
                Some(deadline) if deadline <= Instant::now() => Err(timeout_error()),
                Some(deadline) => tokio::time::timeout_at(deadline.into(), op(socket))
                    .await
                    .unwrap_or_else(|_| Err(timeout_error())),
                None => op(socket).await,
            }
        };

        tokio::select! {
            result = bounded => result,
            () = wait_closed(closed) => Err(closed_error()),
        }
    }
}

async fn wait_closed(mut closed: watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}
