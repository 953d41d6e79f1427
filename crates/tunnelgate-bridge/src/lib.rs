//! Raw upgrade bridge (spec §4.6): reconstructs an HTTP request preamble
//! textually from its raw, order-preserving parts and then wires two
//! sockets into a full-duplex byte pipe. Deliberately does not go through
//! any HTTP client/server machinery — see `tunnelgate-server`'s dispatcher
//! for why.

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

/// A request preamble reconstructed from raw wire parts rather than a
/// normalized header map, so header order and duplicates survive onto the
/// tunnel socket. An implementer who normalizes headers here will break
/// upgrade clients that rely on header order (e.g. some WebSocket
/// subprotocol negotiators).
#[derive(Debug, Clone)]
pub struct RawHead {
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl RawHead {
    pub fn to_preamble_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(self.method.as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.path.as_bytes());
        out.extend_from_slice(b" HTTP/");
        out.extend_from_slice(self.version.as_bytes());
        out.extend_from_slice(b"\r\n");
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

/// Writes the reconstructed preamble onto the tunnel socket, then pipes
/// `tunnel` and `peer` bidirectionally until either half-closes (P9). The
/// tunnel socket is consumed by this call: once handed to
/// `copy_bidirectional` its framing is unrecoverable, so the caller must
/// not attempt to return it to a pool afterward.
///
/// `peer_leftover` is any bytes the caller already read off `peer` past
/// the parsed request head (e.g. the first WebSocket frame, read as part
/// of buffering the head); it is written immediately after the preamble,
/// before the bidirectional pipe takes over.
pub async fn bridge(
    tunnel: &mut TcpStream,
    peer: &mut TcpStream,
    head: &RawHead,
    peer_leftover: &[u8],
) -> std::io::Result<(u64, u64)> {
    let mut preamble = head.to_preamble_bytes();
    preamble.extend_from_slice(peer_leftover);
    tunnel.write_all(&preamble).await?;
    let result = tokio::io::copy_bidirectional(tunnel, peer).await;
    match &result {
        Ok((to_peer, to_tunnel)) => {
            debug!(to_peer, to_tunnel, "upgrade bridge closed");
        }
        Err(e) => {
            debug!(error = %e, "upgrade bridge ended with error");
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn preamble_preserves_header_order_and_duplicates() {
        let head = RawHead {
            method: "GET".to_string(),
            path: "/chat".to_string(),
            version: "1.1".to_string(),
            headers: vec![
                ("Host".to_string(), "abcd.example.com".to_string()),
                ("Upgrade".to_string(), "websocket".to_string()),
                ("Connection".to_string(), "Upgrade".to_string()),
                ("Sec-WebSocket-Protocol".to_string(), "chat".to_string()),
                ("Sec-WebSocket-Protocol".to_string(), "superchat".to_string()),
            ],
        };
        let bytes = head.to_preamble_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            "GET /chat HTTP/1.1\r\n\
             Host: abcd.example.com\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Protocol: chat\r\n\
             Sec-WebSocket-Protocol: superchat\r\n\
             \r\n"
        );
    }

    #[tokio::test]
    async fn bridges_bytes_in_both_directions_until_close() {
        let listener_a = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr_a = listener_a.local_addr().unwrap();
        let listener_b = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr_b = listener_b.local_addr().unwrap();

        let (mut tunnel_srv, mut peer_srv) = tokio::join!(
            async { TcpStream::connect(addr_a).await.unwrap() },
            async { TcpStream::connect(addr_b).await.unwrap() },
        );
        let (mut tunnel_client, _) = listener_a.accept().await.unwrap();
        let (mut peer_client, _) = listener_b.accept().await.unwrap();

        let head = RawHead {
            method: "GET".to_string(),
            path: "/".to_string(),
            version: "1.1".to_string(),
            headers: vec![("Host".to_string(), "abcd.example.com".to_string())],
        };

        let bridge_task =
            tokio::spawn(async move { bridge(&mut tunnel_srv, &mut peer_srv, &head, &[]).await });

        let mut preamble_buf = vec![0u8; 128];
        let n = tunnel_client.read(&mut preamble_buf).await.unwrap();
        assert!(String::from_utf8_lossy(&preamble_buf[..n]).starts_with("GET / HTTP/1.1\r\n"));

        peer_client.write_all(b"hello-from-peer").await.unwrap();
        let mut buf = [0u8; 32];
        let n = tunnel_client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello-from-peer");

        tunnel_client.write_all(b"hello-from-tunnel").await.unwrap();
        let mut buf2 = [0u8; 32];
        let n2 = peer_client.read(&mut buf2).await.unwrap();
        assert_eq!(&buf2[..n2], b"hello-from-tunnel");

        drop(tunnel_client);
        drop(peer_client);
        let _ = bridge_task.await.unwrap();
    }
}
