use std::net::SocketAddr;

use tokio::net::TcpStream;

/// A TCP stream accepted on a tunnel's listener, on loan to at most one
/// handler at a time. `destroyed` sockets are never returned to the idle
/// queue; see [`crate::pool::TunnelSocketPool::release`].
#[derive(Debug)]
pub struct TunnelSocket {
    pub stream: TcpStream,
    pub remote_addr: SocketAddr,
    pub destroyed: bool,
}

impl TunnelSocket {
    pub fn new(stream: TcpStream, remote_addr: SocketAddr) -> Self {
        Self {
            stream,
            remote_addr,
            destroyed: false,
        }
    }

    /// Best-effort liveness probe used when reaping stale idle sockets on
    /// acquire. Uses a non-consuming `peek` under a zero-duration timeout so
    /// a dead (EOF) peer is detected without stealing bytes a handler would
    /// otherwise need. A socket that is merely idle (no bytes pending) times
    /// out and is treated as alive.
    pub async fn is_dead(&self) -> bool {
        let mut buf = [0u8; 1];
        match tokio::time::timeout(std::time::Duration::from_millis(0), self.stream.peek(&mut buf))
            .await
        {
            Ok(Ok(0)) => true,
            Ok(Ok(_)) => false,
            Ok(Err(_)) => true,
            Err(_) => false,
        }
    }
}
