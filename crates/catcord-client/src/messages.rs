//! Channel messages.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use catcord_shared::constants::COLLECTION_MESSAGES;
use catcord_shared::{now_millis, ChannelId, UserId};
use catcord_store::{AuthUser, Direction, Document, DocumentStore, Filter, Query, QueryWatcher};

use crate::error::{ClientError, Result};

/// One message in a server channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessage {
    #[serde(skip)]
    pub id: String,
    pub content: String,
    pub channel_id: ChannelId,
    /// Author email, kept for display next to the message.
    pub author: String,
    pub author_id: UserId,
    #[serde(default)]
    pub created_at: i64,
}

impl ChannelMessage {
    pub fn from_doc(doc: &Document) -> catcord_store::Result<Self> {
        let mut message: ChannelMessage = doc.decode()?;
        message.id = doc.id.clone();
        Ok(message)
    }
}

/// Message reads and writes for server channels.
#[derive(Clone)]
pub struct Messages {
    store: Arc<dyn DocumentStore>,
}

impl Messages {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Posts a message to a channel. Whitespace-only content is rejected.
    pub async fn send(
        &self,
        author: &AuthUser,
        channel: &ChannelId,
        content: &str,
    ) -> Result<String> {
        if content.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let data = json!({
            "content": content,
            "channelId": channel,
            "author": author.email,
            "authorId": author.uid,
            "createdAt": now_millis(),
        });
        let id = self.store.add(COLLECTION_MESSAGES, data).await?;
        debug!(channel = %channel, message = %id, "Message sent");
        Ok(id)
    }

    /// Messages of a channel, oldest first.
    pub async fn list(&self, channel: &ChannelId) -> Result<Vec<ChannelMessage>> {
        let docs = self.store.query(&message_query(channel)).await?;
        docs.iter()
            .map(|doc| Ok(ChannelMessage::from_doc(doc)?))
            .collect()
    }

    /// Live view of a channel's message history.
    pub async fn watch(&self, channel: &ChannelId) -> Result<QueryWatcher> {
        Ok(self.store.watch_query(&message_query(channel)).await?)
    }
}

fn message_query(channel: &ChannelId) -> Query {
    Query::collection(COLLECTION_MESSAGES)
        .filter(Filter::eq("channelId", channel.as_str()))
        .order_by("createdAt", Direction::Ascending)
}
