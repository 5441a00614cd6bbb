//! Text channels inside a server.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use catcord_shared::constants::{COLLECTION_CHANNELS, COLLECTION_SERVERS};
use catcord_shared::{now_millis, ChannelId, ServerId, UserId};
use catcord_store::{Direction, Document, DocumentStore, Filter, Query, QueryWatcher, StoreError};

use crate::error::Result;
use crate::servers::{require_manager, Server};

/// One channel document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    #[serde(skip)]
    pub id: ChannelId,
    pub name: String,
    pub server_id: ServerId,
    #[serde(default)]
    pub created_at: i64,
}

impl Channel {
    pub fn from_doc(doc: &Document) -> catcord_store::Result<Self> {
        let mut channel: Channel = doc.decode()?;
        channel.id = ChannelId::new(doc.id.clone());
        Ok(channel)
    }
}

/// Channel reads and writes.
#[derive(Clone)]
pub struct Channels {
    store: Arc<dyn DocumentStore>,
}

impl Channels {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Creates a channel on the server. Owner or admin only.
    pub async fn create(&self, actor: &UserId, server: &ServerId, name: &str) -> Result<Channel> {
        let doc = self
            .store
            .get(COLLECTION_SERVERS, server.as_str())
            .await?
            .ok_or(StoreError::NotFound)?;
        require_manager(&Server::from_doc(&doc)?, actor)?;

        let data = json!({
            "name": name.trim(),
            "serverId": server,
            "createdAt": now_millis(),
        });
        let id = self.store.add(COLLECTION_CHANNELS, data).await?;
        info!(channel = %id, server = %server, "Channel created");

        let doc = self
            .store
            .get(COLLECTION_CHANNELS, &id)
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(Channel::from_doc(&doc)?)
    }

    /// Channels of a server, oldest first.
    pub async fn list(&self, server: &ServerId) -> Result<Vec<Channel>> {
        let docs = self.store.query(&channel_query(server)).await?;
        docs.iter()
            .map(|doc| Ok(Channel::from_doc(doc)?))
            .collect()
    }

    /// Live view of a server's channel list.
    pub async fn watch(&self, server: &ServerId) -> Result<QueryWatcher> {
        Ok(self.store.watch_query(&channel_query(server)).await?)
    }
}

fn channel_query(server: &ServerId) -> Query {
    Query::collection(COLLECTION_CHANNELS)
        .filter(Filter::eq("serverId", server.as_str()))
        .order_by("createdAt", Direction::Ascending)
}
