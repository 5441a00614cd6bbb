//! Private conversations, their messages, and server invitations.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use catcord_shared::constants::{COLLECTION_DMS, COLLECTION_SERVERS, SUBCOLLECTION_DM_MESSAGES};
use catcord_shared::{now_millis, ConversationId, ServerId, UserId};
use catcord_store::{
    Direction, Document, DocumentStore, Filter, Query, QueryWatcher, StoreError,
};

use crate::error::{ClientError, Result};
use crate::servers::Server;

/// Body text carried by invitation messages.
pub const INVITE_TEXT: &str = "Invitation à rejoindre un serveur";

/// One two-member private conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(skip)]
    pub id: ConversationId,
    pub members: Vec<UserId>,
}

impl Conversation {
    pub fn from_doc(doc: &Document) -> catcord_store::Result<Self> {
        let mut conversation: Conversation = doc.decode()?;
        conversation.id = ConversationId::new(doc.id.clone());
        Ok(conversation)
    }
}

/// A plain direct message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessage {
    #[serde(skip)]
    pub id: String,
    pub text: String,
    pub author: UserId,
    #[serde(default)]
    pub created_at: i64,
}

/// Response state of a server invitation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatus {
    Pending,
    Accepted,
    Rejected,
}

impl InviteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

/// A server invitation sent through a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteMessage {
    #[serde(skip)]
    pub id: String,
    pub text: String,
    pub server_id: ServerId,
    pub dm_id: ConversationId,
    pub from: UserId,
    pub status: InviteStatus,
    #[serde(default)]
    pub created_at: i64,
}

/// One entry of a conversation timeline.
///
/// Invitation documents carry a `type: "invite"` marker and no `author`
/// field, so the two shapes are told apart before decoding.
#[derive(Debug, Clone)]
pub enum DmEntry {
    Message(DirectMessage),
    Invite(InviteMessage),
}

impl DmEntry {
    pub fn from_doc(doc: &Document) -> catcord_store::Result<Self> {
        if doc.str_field("type") == Some("invite") {
            let mut invite: InviteMessage = doc.decode()?;
            invite.id = doc.id.clone();
            return Ok(Self::Invite(invite));
        }
        let mut message: DirectMessage = doc.decode()?;
        message.id = doc.id.clone();
        Ok(Self::Message(message))
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Message(m) => &m.id,
            Self::Invite(i) => &i.id,
        }
    }
}

/// Conversation and DM reads and writes.
#[derive(Clone)]
pub struct Conversations {
    store: Arc<dyn DocumentStore>,
}

impl Conversations {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Finds the conversation between the two users, creating it on first
    /// contact. Members are stored sorted so both sides find the same
    /// document.
    pub async fn open_with(&self, me: &UserId, other: &UserId) -> Result<Conversation> {
        let mut pair = [me.as_str(), other.as_str()];
        pair.sort_unstable();

        let query = Query::collection(COLLECTION_DMS).filter(Filter::eq("members", json!(pair)));
        if let Some(doc) = self.store.query(&query).await?.first() {
            return Ok(Conversation::from_doc(doc)?);
        }

        let id = self
            .store
            .add(COLLECTION_DMS, json!({"members": pair}))
            .await?;
        info!(conversation = %id, "Conversation opened");
        let doc = self
            .store
            .get(COLLECTION_DMS, &id)
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(Conversation::from_doc(&doc)?)
    }

    /// Conversations the given user takes part in.
    pub async fn my_conversations(&self, uid: &UserId) -> Result<Vec<Conversation>> {
        let docs = self.store.query(&member_query(uid)).await?;
        docs.iter()
            .map(|doc| Ok(Conversation::from_doc(doc)?))
            .collect()
    }

    /// Live view of the user's conversation list.
    pub async fn watch_my_conversations(&self, uid: &UserId) -> Result<QueryWatcher> {
        Ok(self.store.watch_query(&member_query(uid)).await?)
    }

    /// Sends a message into a conversation. Whitespace-only text is
    /// rejected.
    pub async fn send(
        &self,
        me: &UserId,
        conversation: &ConversationId,
        text: &str,
    ) -> Result<String> {
        if text.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let data = json!({
            "text": text,
            "author": me,
            "createdAt": now_millis(),
        });
        let id = self
            .store
            .add(&dm_messages_collection(conversation), data)
            .await?;
        Ok(id)
    }

    /// Timeline of a conversation, oldest first.
    pub async fn list_messages(&self, conversation: &ConversationId) -> Result<Vec<DmEntry>> {
        let docs = self.store.query(&timeline_query(conversation)).await?;
        docs.iter().map(|doc| Ok(DmEntry::from_doc(doc)?)).collect()
    }

    /// Live view of a conversation timeline.
    pub async fn watch_messages(&self, conversation: &ConversationId) -> Result<QueryWatcher> {
        Ok(self
            .store
            .watch_query(&timeline_query(conversation))
            .await?)
    }

    /// Drops a pending server invitation into the conversation with the
    /// invitee, opening it if needed. Returns the invitation message id.
    pub async fn send_invite(
        &self,
        me: &UserId,
        other: &UserId,
        server: &ServerId,
    ) -> Result<String> {
        let conversation = self.open_with(me, other).await?;
        let data = json!({
            "text": INVITE_TEXT,
            "type": "invite",
            "serverId": server,
            "dmId": conversation.id,
            "from": me,
            "status": InviteStatus::Pending.as_str(),
            "createdAt": now_millis(),
        });
        let id = self
            .store
            .add(&dm_messages_collection(&conversation.id), data)
            .await?;
        info!(server = %server, to = %other, "Invite sent");
        Ok(id)
    }

    /// Accepts or rejects an invitation. Accepting also joins the server.
    pub async fn respond_invite(
        &self,
        me: &UserId,
        conversation: &ConversationId,
        message_id: &str,
        accept: bool,
    ) -> Result<()> {
        let collection = dm_messages_collection(conversation);
        let doc = self
            .store
            .get(&collection, message_id)
            .await?
            .ok_or(StoreError::NotFound)?;
        let invite = match DmEntry::from_doc(&doc)? {
            DmEntry::Invite(invite) => invite,
            DmEntry::Message(_) => return Err(ClientError::NotAnInvite),
        };

        let status = if accept {
            InviteStatus::Accepted
        } else {
            InviteStatus::Rejected
        };
        self.store
            .update(&collection, message_id, json!({"status": status.as_str()}))
            .await?;

        if accept {
            self.join_server(me, &invite.server_id).await?;
            info!(server = %invite.server_id, uid = %me, "Invite accepted");
        }
        Ok(())
    }

    async fn join_server(&self, me: &UserId, server_id: &ServerId) -> Result<()> {
        let doc = self
            .store
            .get(COLLECTION_SERVERS, server_id.as_str())
            .await?
            .ok_or(StoreError::NotFound)?;
        let server = Server::from_doc(&doc)?;
        if server.members.contains(me) {
            return Ok(());
        }
        let mut members = server.members;
        members.push(me.clone());
        self.store
            .update(
                COLLECTION_SERVERS,
                server_id.as_str(),
                json!({"members": members}),
            )
            .await?;
        Ok(())
    }
}

/// Path of the message subcollection under one conversation.
fn dm_messages_collection(conversation: &ConversationId) -> String {
    format!(
        "{}/{}/{}",
        COLLECTION_DMS,
        conversation.as_str(),
        SUBCOLLECTION_DM_MESSAGES
    )
}

fn member_query(uid: &UserId) -> Query {
    Query::collection(COLLECTION_DMS).filter(Filter::array_contains("members", uid.as_str()))
}

fn timeline_query(conversation: &ConversationId) -> Query {
    Query::collection(dm_messages_collection(conversation))
        .order_by("createdAt", Direction::Ascending)
}
