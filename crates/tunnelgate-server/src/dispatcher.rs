use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{debug, info};

use tunnelgate_bridge::{bridge, RawHead};
use tunnelgate_core::registry::ClientRegistry;
use tunnelgate_core::tunnel::ClientTunnel;

use crate::config::ServerConfig;
use crate::error::DispatchError;
use crate::head::{self, ParsedHead};
use crate::injector;
use crate::management;
use crate::response::HttpResponse;

/// Front door for every inbound connection on the public listener (spec
/// §4.4). Shares one `TcpListener` between subdomain-routed traffic and
/// the management API (§6), same as the source's single public HTTP
/// server.
pub struct Dispatcher {
    registry: Arc<ClientRegistry>,
    config: ServerConfig,
}

impl Dispatcher {
    pub fn new(registry: Arc<ClientRegistry>, config: ServerConfig) -> Arc<Self> {
        Arc::new(Self { registry, config })
    }

    pub async fn serve(self: Arc<Self>) -> std::io::Result<()> {
        let addr = format!("{}:{}", self.config.public_bind, self.config.public_port);
        let listener = TcpListener::bind(&addr).await?;
        info!(%addr, "public listener bound");
        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let dispatcher = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = dispatcher.handle_connection(stream).await {
                    debug!(%peer_addr, error = %e, "connection ended with error");
                }
            });
        }
    }

    async fn handle_connection(&self, mut peer: TcpStream) -> std::io::Result<()> {
        let head = head::read_head(&mut peer).await?;

        let Some(host) = head.header("host").map(str::to_string) else {
            if head.is_upgrade() {
                debug!(error = %DispatchError::NoHost, "destroying peer connection");
                return Ok(());
            }
            return self.dispatch_management(&mut peer, &head).await;
        };

        let subdomain = head::extract_subdomain(&host, &self.config.domain).map(str::to_string);

        let Some(subdomain) = subdomain else {
            if head.is_upgrade() {
                debug!(error = %DispatchError::NoSubdomain, "destroying peer connection");
                return Ok(());
            }
            return self.dispatch_management(&mut peer, &head).await;
        };

        let Some(tunnel) = self.registry.lookup(&subdomain) else {
            let err = DispatchError::UnknownSubdomain(subdomain.clone());
            if head.is_upgrade() {
                debug!(%err, "destroying peer connection");
                return Ok(());
            }
            let resp = HttpResponse::plain(502, "Bad Gateway", err.to_string());
            resp.write_to(&mut peer).await?;
            return Ok(());
        };

        self.route_to_tunnel(peer, head, tunnel).await
    }

    /// `GET /?new`, `GET /:id`, `GET /api/status`, and the bare `/`
    /// redirect — everything the dispatcher falls through to when there's
    /// no Host header or no subdomain under the apex domain.
    async fn dispatch_management(
        &self,
        peer: &mut TcpStream,
        head: &ParsedHead,
    ) -> std::io::Result<()> {
        let host_header = head.header("host").unwrap_or(&self.config.domain).to_string();
        let path = head.path.as_str();

        let resp = if let Some(query_start) = path.find('?') {
            let (base, query) = path.split_at(query_start);
            if base == "/" && query.contains("new") {
                management::create_tunnel(&self.registry, None, &host_header, "http").await
            } else {
                self.route_management_path(base, &host_header).await
            }
        } else {
            self.route_management_path(path, &host_header).await
        };

        resp.write_to(peer).await
    }

    async fn route_management_path(&self, path: &str, host_header: &str) -> HttpResponse {
        match path {
            "/" => management::redirect_to_marketing(&self.config.marketing_url),
            "/api/status" => management::status(&self.registry),
            other => {
                let candidate = other.trim_start_matches('/');
                if let Err(resp) = management::validate_requested_id(candidate) {
                    return resp;
                }
                management::create_tunnel(
                    &self.registry,
                    Some(candidate.to_string()),
                    host_header,
                    "http",
                )
                .await
            }
        }
    }

    /// Borrow-and-race (spec §4.4): waits for a tunnel socket while
    /// concurrently watching the peer for an early disconnect, so a dead
    /// peer never causes a borrowed socket to be written to or leaked.
    async fn route_to_tunnel(
        &self,
        mut peer: TcpStream,
        head: ParsedHead,
        tunnel: Arc<ClientTunnel>,
    ) -> std::io::Result<()> {
        let stop = Notify::new();
        let (socket_opt, peer_disconnected) = tokio::join!(
            async {
                let socket = tunnel.pool.next_socket().await;
                stop.notify_one();
                socket
            },
            wait_for_disconnect(&peer, &stop),
        );

        let Some(mut socket) = socket_opt else {
            let err = DispatchError::PoolDrained;
            if head.is_upgrade() {
                debug!(%err, "destroying peer connection");
                return Ok(());
            }
            let resp = HttpResponse::plain(504, "Gateway Timeout", err.to_string());
            return resp.write_to(&mut peer).await;
        };

        if peer_disconnected {
            debug!("peer disconnected while a tunnel socket was on loan; returning it unused");
            tunnel.pool.release(socket);
            return Ok(());
        }

        if head.is_upgrade() {
            let raw_head = RawHead {
                method: head.method.clone(),
                path: head.path.clone(),
                version: head.version.clone(),
                headers: head.headers.clone(),
            };
            let result = bridge(&mut socket.stream, &mut peer, &raw_head, &head.leftover).await;
            if let Err(e) = result {
                debug!(error = %e, "upgrade bridge ended with an error");
            }
            // Consumed by the bidirectional pipe regardless of outcome:
            // its framing is unrecoverable once handed to the pipe.
            socket.destroyed = true;
            tunnel.pool.release(socket);
            return Ok(());
        }

        match injector::inject(&mut socket.stream, &mut peer, &head).await {
            Ok(()) => tunnel.pool.release(socket),
            Err(e) => {
                debug!(error = %e, "tunnel socket error during injection, destroying socket");
                socket.destroyed = true;
                tunnel.pool.release(socket);
            }
        }
        Ok(())
    }
}

/// Polls the peer for EOF/error while `stop` is not yet notified. Used
/// purely as the disconnect side of the borrow-and-race; a genuinely idle
/// but still-connected peer never trips this.
async fn wait_for_disconnect(peer: &TcpStream, stop: &Notify) -> bool {
    let mut buf = [0u8; 1];
    loop {
        tokio::select! {
            _ = stop.notified() => return false,
            result = peer.peek(&mut buf) => {
                match result {
                    Ok(0) => return true,
                    Ok(_) => tokio::time::sleep(Duration::from_millis(20)).await,
                    Err(_) => return true,
                }
            }
        }
    }
}
