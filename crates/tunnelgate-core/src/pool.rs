use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{Result, TunnelError};
use crate::socket::TunnelSocket;

/// A waiter is a oneshot sender paired with a handler: fulfilling it with
/// `Some(socket)` lends a socket, `None` signals shutdown (the null
/// sentinel in spec terms). Each waiter is fulfilled at most once.
type Waiter = oneshot::Sender<Option<TunnelSocket>>;

struct Inner {
    idle: VecDeque<TunnelSocket>,
    waiters: VecDeque<Waiter>,
    size: usize,
    max_sockets: usize,
    closed: bool,
}

/// FIFO pool of pooled tunnel sockets for one client tunnel.
///
/// Mirrors spec §4.1: `|idle| + in_flight = size`, and while any waiter is
/// queued, `idle` is empty. Built as a channel/semaphore-style design per
/// the recommendation in §9 rather than a callback-per-waiter: each waiter
/// is a oneshot receiver, which gives FIFO lending and at-most-once
/// handler invocation for free.
pub struct TunnelSocketPool {
    inner: Mutex<Inner>,
    on_empty: Box<dyn Fn() + Send + Sync>,
}

impl TunnelSocketPool {
    pub fn new(max_sockets: usize, on_empty: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            inner: Mutex::new(Inner {
                idle: VecDeque::new(),
                waiters: VecDeque::new(),
                size: 0,
                max_sockets,
                closed: false,
            }),
            on_empty: Box::new(on_empty),
        }
    }

    /// Admits a freshly accepted socket into the pool. If a waiter is
    /// already queued it is handed the socket directly (never touching
    /// `idle`); otherwise the socket is pushed to the back of `idle`.
    pub fn admit(&self, socket: TunnelSocket) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(TunnelError::NotListening);
        }
        if inner.size >= inner.max_sockets {
            return Err(TunnelError::CapReached(inner.max_sockets));
        }
        inner.size += 1;
        while let Some(waiter) = inner.waiters.pop_front() {
            match waiter.send(Some(socket)) {
                Ok(()) => return Ok(()),
                // Waiter's receiver was dropped (caller gave up); try the next one.
                Err(Some(returned)) => {
                    let socket = returned;
                    if inner.waiters.is_empty() {
                        inner.idle.push_back(socket);
                        return Ok(());
                    }
                    continue;
                }
                Err(None) => unreachable!("admit always sends Some"),
            }
        }
        inner.idle.push_back(socket);
        Ok(())
    }

    /// Borrows the next socket, in FIFO order. Blocks (without holding the
    /// lock) when none is idle. Reaps dead idle sockets transparently
    /// before handing one out, per the "reap on acquire" strategy described
    /// in the design notes.
    pub async fn next_socket(&self) -> Option<TunnelSocket> {
        let rx = loop {
            let mut inner = self.inner.lock().unwrap();
            match inner.idle.pop_front() {
                Some(socket) => {
                    // Liveness check happens outside the lock.
                    drop(inner);
                    if socket.is_dead().await {
                        debug!("reaped dead idle socket on acquire");
                        let mut inner = self.inner.lock().unwrap();
                        inner.size = inner.size.saturating_sub(1);
                        let empty = inner.size == 0;
                        drop(inner);
                        if empty {
                            (self.on_empty)();
                        }
                        continue;
                    }
                    return Some(socket);
                }
                None => {
                    if inner.closed {
                        return None;
                    }
                    let (tx, rx) = oneshot::channel();
                    inner.waiters.push_back(tx);
                    break rx;
                }
            }
        };
        rx.await.ok().flatten()
    }

    /// Returns a borrowed socket to the pool. A destroyed socket is removed
    /// from accounting (decrementing `size`) instead of being recycled:
    /// unlike the event-driven source, this implementation has no passive
    /// "socket closed" notification, so silently doing nothing here would
    /// leave the conservation invariant `|idle| + in_flight = size`
    /// permanently violated by a phantom in-flight count.
    pub fn release(&self, socket: TunnelSocket) {
        let mut inner = self.inner.lock().unwrap();
        if socket.destroyed {
            inner.size = inner.size.saturating_sub(1);
            let empty = inner.size == 0;
            drop(inner);
            if empty {
                (self.on_empty)();
            }
            return;
        }
        while let Some(waiter) = inner.waiters.pop_front() {
            match waiter.send(Some(socket)) {
                Ok(()) => return,
                Err(Some(returned)) => {
                    let socket = returned;
                    if inner.waiters.is_empty() {
                        inner.idle.push_back(socket);
                        return;
                    }
                    continue;
                }
                Err(None) => unreachable!("release always sends Some"),
            }
        }
        inner.idle.push_back(socket);
    }

    /// Removes a socket from accounting without returning it anywhere,
    /// e.g. when a handler consumes it permanently (upgrade bridge).
    pub fn consume(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.size = inner.size.saturating_sub(1);
        let empty = inner.size == 0;
        drop(inner);
        if empty {
            (self.on_empty)();
        }
    }

    /// Drains all idle sockets and fires every queued waiter with `None`,
    /// in FIFO order, so no waiter is starved during shutdown (P5).
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        inner.idle.clear();
        while let Some(waiter) = inner.waiters.pop_front() {
            let _ = waiter.send(None);
        }
        if inner.size != 0 {
            warn!(size = inner.size, "pool shut down with sockets still accounted for");
        }
    }

    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().size
    }

    pub fn idle_count(&self) -> usize {
        self.inner.lock().unwrap().idle.len()
    }

    pub fn waiters_count(&self) -> usize {
        self.inner.lock().unwrap().waiters.len()
    }
}
