use std::sync::Arc;

use database_utils::redacted::redact_target;
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::connection::Connector;
use crate::error::ConnectionError;
use crate::server::ServerState;

/// Owns the [`ServerState`] of every target that has ever been scraped, keyed by the exact target
/// string. Entries are only removed by [`ServerPool::close`].
pub struct ServerPool {
    connector: Arc<dyn Connector>,
    servers: tokio::sync::Mutex<IndexMap<String, Arc<ServerState>>>,
}

impl ServerPool {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            servers: Default::default(),
        }
    }

    /// Returns the state for `target`, connecting to it first if this is the first time it's been
    /// asked for, or if its connection has since been closed.
    pub async fn get_server(&self, target: &str) -> Result<Arc<ServerState>, ConnectionError> {
        let mut servers = self.servers.lock().await;
        if let Some(server) = servers.get(target) {
            server.reconnect_if_closed(self.connector.as_ref()).await?;
            return Ok(Arc::clone(server));
        }

        let session = self
            .connector
            .connect(target)
            .await
            .map_err(|source| ConnectionError {
                target: redact_target(target),
                source,
            })?;
        let server = Arc::new(ServerState::new(target, session));
        info!(server = %server.redacted_target(), "Connected to new server");
        servers.insert(target.to_owned(), Arc::clone(&server));
        Ok(server)
    }

    pub async fn len(&self) -> usize {
        self.servers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.servers.lock().await.is_empty()
    }

    /// Closes the connection to every server, emptying the pool
    pub async fn close(&self) {
        let servers = std::mem::take(&mut *self.servers.lock().await);
        for (_, server) in servers {
            match Arc::try_unwrap(server) {
                Ok(server) => server.close().await,
                Err(server) => {
                    warn!(
                        server = %server.redacted_target(),
                        "Server is still in use, dropping its connection without closing it"
                    );
                }
            }
        }
        debug!("Closed all server connections");
    }
}
