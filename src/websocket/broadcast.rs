//! Broadcasting to WebSocket connections via the API Gateway Management API.
//! A Lambda invocation never holds a socket open, so there is no in-process
//! connection registry to broadcast through; instead this posts against an
//! injected [`ConnectionPoster`] — the same "capability consumed, not
//! implemented" shape as [`crate::store::KvStore`] and
//! [`crate::store::ConnectionStore`].

use crate::error::{Error, Result};
use crate::store::{ConnectionRecord, ConnectionStore};
use async_trait::async_trait;
use std::sync::Arc;

/// Which connections a [`Broadcaster::send`] call should reach.
#[derive(Debug, Clone)]
pub enum BroadcastTarget {
    All,
    Connections(Vec<String>),
    AllExcept(Vec<String>),
}

/// Posts a frame to one connection's API Gateway Management API endpoint.
/// Implementations return `Ok(false)` for a gone connection (HTTP 410) so
/// the broadcaster can prune its `ConnectionStore` record; any other
/// failure should be returned as `Err`.
#[async_trait]
pub trait ConnectionPoster: Send + Sync {
    async fn post(&self, management_api_url: &str, connection_id: &str, data: &[u8]) -> Result<bool>;
}

/// Fans a message out to connections drawn from a [`ConnectionStore`],
/// pruning stale records the poster reports as gone.
pub struct Broadcaster {
    store: Arc<dyn ConnectionStore>,
    poster: Arc<dyn ConnectionPoster>,
}

impl Broadcaster {
    pub fn new(store: Arc<dyn ConnectionStore>, poster: Arc<dyn ConnectionPoster>) -> Self {
        Self { store, poster }
    }

    /// Sends `data` to every connection in `tenant_id` matching `target`,
    /// using `management_api_url` (from [`crate::request::WebSocketContext::management_api_url`]).
    /// Returns the number of connections the post succeeded against.
    pub async fn send(
        &self,
        tenant_id: &str,
        management_api_url: &str,
        target: BroadcastTarget,
        data: &[u8],
    ) -> Result<usize> {
        let candidates = self.store.list_by_tenant(tenant_id).await?;
        let recipients: Vec<ConnectionRecord> = match &target {
            BroadcastTarget::All => candidates,
            BroadcastTarget::Connections(ids) => candidates
                .into_iter()
                .filter(|c| ids.contains(&c.connection_id))
                .collect(),
            BroadcastTarget::AllExcept(ids) => candidates
                .into_iter()
                .filter(|c| !ids.contains(&c.connection_id))
                .collect(),
        };

        let mut sent = 0usize;
        for connection in recipients {
            match self.poster.post(management_api_url, &connection.connection_id, data).await {
                Ok(true) => sent += 1,
                Ok(false) => {
                    self.store.delete(&connection.connection_id).await?;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(sent)
    }
}

/// A poster that always reports failure, useful as a safe default before a
/// real API Gateway Management API client is wired in.
pub struct UnconfiguredPoster;

#[async_trait]
impl ConnectionPoster for UnconfiguredPoster {
    async fn post(&self, _management_api_url: &str, _connection_id: &str, _data: &[u8]) -> Result<bool> {
        Err(Error::Internal("no ConnectionPoster configured".to_string()))
    }
}
