use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::head::ParsedHead;

/// Drives exactly one HTTP/1.x exchange over a borrowed tunnel socket: the
/// handshake's sole transport is `tunnel_stream`, there is no dial and no
/// pooling on hyper's side, matching spec §4.5 and the design note
/// rejecting a custom re-dialing agent. `tunnel_stream` is borrowed (not
/// consumed): it is handed back to the caller for release to
/// `TunnelSocketPool` once this returns.
pub async fn inject(
    tunnel_stream: &mut TcpStream,
    peer_stream: &mut TcpStream,
    head: &ParsedHead,
) -> std::io::Result<()> {
    let io = TokioIo::new(&mut *tunnel_stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(to_io_err)?;

    let conn_task = tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "tunnel connection driver ended");
        }
    });

    let body_bytes = read_request_body(peer_stream, head).await?;

    let mut builder = Request::builder()
        .method(head.method.as_str())
        .uri(head.path.as_str());
    for (name, value) in &head.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    let request = builder
        .body(Full::new(Bytes::from(body_bytes)))
        .map_err(to_io_err)?;

    let response = match sender.send_request(request).await {
        Ok(resp) => resp,
        Err(e) => {
            conn_task.abort();
            // Headers may already be in flight to the tunnel client; the
            // peer gets nothing usable either way, so destroy its
            // connection rather than try to respond.
            return Err(to_io_err(e));
        }
    };

    let (parts, body) = response.into_parts();
    let body_bytes = body.collect().await.map_err(to_io_err)?.to_bytes();
    write_response_head(peer_stream, &parts, body_bytes.len()).await?;
    peer_stream.write_all(&body_bytes).await?;
    conn_task.abort();
    Ok(())
}

/// The peer's request body is small and fully buffered before injection:
/// the exchange is one-shot and synchronous in this implementation, so
/// streaming a chunked peer body concurrently with writing the outbound
/// request isn't needed for the scenarios spec §8 exercises. Bodies
/// without a `Content-Length` are treated as already complete in
/// `head.leftover` (no body, or the client sent one without declaring its
/// length, which callers of this crate are not expected to do for GET).
async fn read_request_body(peer: &mut TcpStream, head: &ParsedHead) -> std::io::Result<Vec<u8>> {
    let mut body = head.leftover.clone();
    if let Some(content_length) = head.content_length() {
        while body.len() < content_length {
            let mut chunk = vec![0u8; content_length - body.len()];
            let n = peer.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
    }
    Ok(body)
}

fn to_io_err(e: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::other(e.to_string())
}

/// The body is fully decoded and buffered before this is called (see
/// `inject`), so whatever framing the tunnel client used to send it
/// (`Transfer-Encoding: chunked`, `Content-Length`, or neither) no longer
/// describes the bytes on the wire to `peer`. Forwarding the original
/// `Transfer-Encoding`/`Content-Length` headers verbatim here would produce
/// a response whose framing header lies about its body, which every HTTP/1.1
/// client treats as malformed. Both headers are dropped and replaced with a
/// single `Content-Length` matching `body_len`.
async fn write_response_head(
    peer: &mut TcpStream,
    parts: &hyper::http::response::Parts,
    body_len: usize,
) -> std::io::Result<()> {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\n",
        parts.status.as_u16(),
        parts.status.canonical_reason().unwrap_or(""),
    );
    for (name, value) in parts.headers.iter() {
        if *name == hyper::header::TRANSFER_ENCODING || *name == hyper::header::CONTENT_LENGTH {
            continue;
        }
        head.push_str(name.as_str());
        head.push_str(": ");
        head.push_str(value.to_str().unwrap_or(""));
        head.push_str("\r\n");
    }
    head.push_str(&format!("Content-Length: {body_len}\r\n"));
    head.push_str("\r\n");
    peer.write_all(head.as_bytes()).await
}
