use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::error::Result;
use crate::id;
use crate::tunnel::ClientTunnel;

const MAX_ID_ATTEMPTS: usize = 20;

#[derive(Debug, Default, Clone)]
pub struct CreateOptions {
    pub max_sockets: Option<usize>,
    pub idle_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct CreateResult {
    pub id: String,
    pub port: u16,
    pub max_conn_count: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct RegistryStats {
    pub tunnels_count: usize,
}

/// Process-wide `ClientId -> ClientTunnel` map. Re-architected (per the
/// design notes) as an explicitly constructed, independently testable
/// service rather than a process-global, so tests can instantiate fresh
/// registries.
pub struct ClientRegistry {
    map: DashMap<String, Arc<ClientTunnel>>,
    tunnels_count: AtomicUsize,
    default_max_sockets: usize,
    default_idle_timeout: Duration,
}

impl ClientRegistry {
    pub fn new(default_max_sockets: usize) -> Arc<Self> {
        Self::with_idle_timeout(default_max_sockets, Duration::from_secs(5))
    }

    pub fn with_idle_timeout(default_max_sockets: usize, default_idle_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            map: DashMap::new(),
            tunnels_count: AtomicUsize::new(0),
            default_max_sockets,
            default_idle_timeout,
        })
    }

    /// Allocates a tunnel for `requested_id`, substituting a fresh random
    /// id on collision (silently, per §4.3), inserting a placeholder entry
    /// before `start()` runs so concurrent `create` calls can't race for
    /// the same id (P7).
    pub async fn create(
        self: &Arc<Self>,
        requested_id: Option<String>,
        options: CreateOptions,
    ) -> Result<CreateResult> {
        let max_sockets = options.max_sockets.unwrap_or(self.default_max_sockets);
        let idle_timeout = options.idle_timeout.unwrap_or(self.default_idle_timeout);
        let mut candidate = requested_id.unwrap_or_else(id::generate);

        let (reserved_id, tunnel) = {
            let mut attempts = 0usize;
            loop {
                attempts += 1;
                if attempts > MAX_ID_ATTEMPTS {
                    return Err(crate::error::TunnelError::IdExhausted(MAX_ID_ATTEMPTS));
                }
                let placeholder =
                    ClientTunnel::with_idle_destroy(candidate.clone(), max_sockets, idle_timeout);
                match self.map.entry(candidate.clone()) {
                    Entry::Vacant(v) => {
                        v.insert(Arc::clone(&placeholder));
                        break (candidate, placeholder);
                    }
                    Entry::Occupied(_) => {
                        candidate = id::generate();
                        continue;
                    }
                }
            }
        };

        match tunnel.start().await {
            Ok((port, max_conn_count)) => {
                self.tunnels_count.fetch_add(1, Ordering::SeqCst);
                self.spawn_end_reaper(reserved_id.clone(), Arc::clone(&tunnel));
                Ok(CreateResult {
                    id: reserved_id,
                    port,
                    max_conn_count,
                })
            }
            Err(e) => {
                self.map.remove(&reserved_id);
                Err(e)
            }
        }
    }

    fn spawn_end_reaper(self: &Arc<Self>, id: String, tunnel: Arc<ClientTunnel>) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            tunnel.wait_ended().await;
            registry.map.remove(&id);
            registry.tunnels_count.fetch_sub(1, Ordering::SeqCst);
            debug!(%id, "tunnel removed from registry on end");
        });
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<ClientTunnel>> {
        self.map.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            tunnels_count: self.tunnels_count.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_with_explicit_id_round_trips() {
        let registry = ClientRegistry::new(10);
        let result = registry
            .create(Some("myid1234".to_string()), CreateOptions::default())
            .await
            .unwrap();
        assert_eq!(result.id, "myid1234");
        assert_eq!(result.max_conn_count, 10);
        assert!(registry.lookup("myid1234").is_some());
        assert_eq!(registry.stats().tunnels_count, 1);
    }

    #[tokio::test]
    async fn collision_yields_a_different_id() {
        let registry = ClientRegistry::new(10);
        registry
            .create(Some("wxyzwxyz".to_string()), CreateOptions::default())
            .await
            .unwrap();
        let second = registry
            .create(Some("wxyzwxyz".to_string()), CreateOptions::default())
            .await
            .unwrap();
        assert_ne!(second.id, "wxyzwxyz");
    }

    #[tokio::test]
    async fn end_removes_from_registry_and_decrements_count() {
        let registry = ClientRegistry::new(10);
        let result = registry
            .create(Some("endslot1".to_string()), CreateOptions::default())
            .await
            .unwrap();
        let tunnel = registry.lookup(&result.id).unwrap();
        tunnel.close().await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert!(registry.lookup(&result.id).is_none());
        assert_eq!(registry.stats().tunnels_count, 0);
    }

    #[tokio::test]
    async fn generated_id_when_absent() {
        let registry = ClientRegistry::new(10);
        let result = registry.create(None, CreateOptions::default()).await.unwrap();
        assert!(crate::id::validate(&result.id).is_ok());
    }

    #[tokio::test]
    async fn per_create_idle_timeout_overrides_registry_default() {
        tokio::time::pause();
        let registry = ClientRegistry::with_idle_timeout(10, Duration::from_secs(60));
        let result = registry
            .create(
                Some("idleover".to_string()),
                CreateOptions {
                    idle_timeout: Some(Duration::from_secs(1)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let tunnel = registry.lookup(&result.id).unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(tunnel.state(), crate::tunnel::TunnelState::Ended);
    }
}
