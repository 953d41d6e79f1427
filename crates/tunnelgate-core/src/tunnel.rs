use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, TunnelError};
use crate::pool::TunnelSocketPool;
use crate::socket::TunnelSocket;

const DEFAULT_IDLE_DESTROY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Fresh,
    Starting,
    Listening,
    Closing,
    Ended,
}

/// Owns an ephemeral TCP listener for one client, pools the sockets the
/// client dials in, and emits `end` (via [`ClientTunnel::wait_ended`])
/// exactly once, per spec §4.2.
pub struct ClientTunnel {
    pub id: String,
    pub max_sockets: usize,
    pub pool: TunnelSocketPool,
    state: Mutex<TunnelState>,
    port: AtomicU16,
    idle_timer: Mutex<Option<CancellationToken>>,
    idle_destroy: Duration,
    close_token: CancellationToken,
    ended: Notify,
}

impl ClientTunnel {
    /// `Arc::new_cyclic` lets the pool's `on_empty` callback hold a `Weak`
    /// back to the owning tunnel (to re-arm the idle timer) without a
    /// strong reference cycle between tunnel and pool.
    pub fn new(id: String, max_sockets: usize) -> Arc<Self> {
        Self::with_idle_destroy(id, max_sockets, DEFAULT_IDLE_DESTROY)
    }

    pub fn with_idle_destroy(id: String, max_sockets: usize, idle_destroy: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<ClientTunnel>| {
            let weak_for_pool = weak.clone();
            let pool = TunnelSocketPool::new(max_sockets, move || {
                if let Some(tunnel) = weak_for_pool.upgrade() {
                    tunnel.arm_idle_timer();
                }
            });
            ClientTunnel {
                id,
                max_sockets,
                pool,
                state: Mutex::new(TunnelState::Fresh),
                port: AtomicU16::new(0),
                idle_timer: Mutex::new(None),
                idle_destroy,
                close_token: CancellationToken::new(),
                ended: Notify::new(),
            }
        })
    }

    pub fn port(&self) -> u16 {
        self.port.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> TunnelState {
        *self.state.lock().unwrap()
    }

    /// Binds the listener, arms the initial idle-destroy timer, and spawns
    /// the accept loop. Idempotent guard: a second call is `AlreadyStarted`.
    pub async fn start(self: &Arc<Self>) -> Result<(u16, usize)> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != TunnelState::Fresh {
                return Err(TunnelError::AlreadyStarted);
            }
            *state = TunnelState::Starting;
        }
        let listener = TcpListener::bind("0.0.0.0:0").await?;
        let port = listener.local_addr()?.port();
        self.port.store(port, Ordering::SeqCst);
        *self.state.lock().unwrap() = TunnelState::Listening;
        self.arm_idle_timer();

        let tunnel = Arc::clone(self);
        tokio::spawn(async move {
            tunnel.accept_loop(listener).await;
        });

        info!(id = %self.id, port, "tunnel listening");
        Ok((port, self.max_sockets))
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.close_token.cancelled() => break,
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let socket = TunnelSocket::new(stream, addr);
                            self.on_accept(socket).await;
                        }
                        Err(e) if is_transient(&e) => {
                            debug!(id = %self.id, error = %e, "transient listener error ignored");
                        }
                        Err(e) => {
                            warn!(id = %self.id, error = %e, "listener error");
                        }
                    }
                }
            }
        }
        self.close().await;
    }

    /// Cap-enforces at accept time (the pool itself is not responsible for
    /// §4.1's cap enforcement). A socket accepted over the cap is simply
    /// dropped, closing its connection.
    async fn on_accept(self: &Arc<Self>, socket: TunnelSocket) {
        if self.pool.size() >= self.max_sockets {
            debug!(id = %self.id, "socket cap reached, discarding accepted connection");
            return;
        }
        self.disarm_idle_timer();
        if let Err(e) = self.pool.admit(socket) {
            warn!(id = %self.id, error = %e, "failed to admit accepted socket");
        }
    }

    fn arm_idle_timer(self: &Arc<Self>) {
        let token = CancellationToken::new();
        *self.idle_timer.lock().unwrap() = Some(token.clone());
        let tunnel = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(id = %tunnel.id, "idle timer disarmed");
                }
                _ = tokio::time::sleep(tunnel.idle_destroy) => {
                    info!(id = %tunnel.id, "idle timeout elapsed, closing tunnel");
                    tunnel.close().await;
                }
            }
        });
    }

    fn disarm_idle_timer(&self) {
        if let Some(token) = self.idle_timer.lock().unwrap().take() {
            token.cancel();
        }
    }

    /// Stops accepting, shuts the pool down (notifying all waiters with
    /// null), and emits `end` exactly once. Safe to call more than once;
    /// the idle timer's own invocation races a concurrent `close()` caller
    /// and both are swallowed past the first.
    pub async fn close(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().unwrap();
            if matches!(*state, TunnelState::Ended | TunnelState::Closing) {
                return;
            }
            *state = TunnelState::Closing;
        }
        self.close_token.cancel();
        self.disarm_idle_timer();
        self.pool.shutdown();
        *self.state.lock().unwrap() = TunnelState::Ended;
        info!(id = %self.id, "tunnel ended");
        self.ended.notify_waiters();
    }

    /// Resolves once `close()` has fully run. Used by the registry to
    /// remove the tunnel's entry and decrement `tunnels_count` on `end`.
    pub async fn wait_ended(&self) {
        loop {
            if self.state() == TunnelState::Ended {
                return;
            }
            let notified = self.ended.notified();
            if self.state() == TunnelState::Ended {
                return;
            }
            notified.await;
        }
    }
}

fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn start_twice_fails() {
        let tunnel = ClientTunnel::new("abcd1234".to_string(), 10);
        tunnel.start().await.unwrap();
        let err = tunnel.start().await;
        assert!(matches!(err, Err(TunnelError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn accept_fills_pool_up_to_cap() {
        let tunnel = ClientTunnel::new("capcap01".to_string(), 1);
        let (port, max) = tunnel.start().await.unwrap();
        assert_eq!(max, 1);
        let _c1 = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let _c2 = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(tunnel.pool.size(), 1);
    }

    #[tokio::test]
    async fn idle_destroy_closes_tunnel() {
        tokio::time::pause();
        let tunnel = ClientTunnel::new("idleidle".to_string(), 10);
        tunnel.start().await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert_eq!(tunnel.state(), TunnelState::Ended);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_ends_exactly_once() {
        let tunnel = ClientTunnel::new("closeonce".to_string(), 10);
        tunnel.start().await.unwrap();
        tunnel.close().await;
        tunnel.close().await;
        assert_eq!(tunnel.state(), TunnelState::Ended);
    }
}
