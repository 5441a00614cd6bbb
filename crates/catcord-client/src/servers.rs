//! Servers: creation, membership, roles, icons.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use catcord_shared::constants::{BLOB_SERVER_ICONS_PREFIX, COLLECTION_SERVERS};
use catcord_shared::{now_millis, ServerId, UserId};
use catcord_store::{
    BlobStore, Document, DocumentStore, Filter, Query, QueryWatcher, StoreError,
};

use crate::error::{ClientError, Result};
use crate::profile::{Profiles, UserProfile};

/// One server document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    #[serde(skip)]
    pub id: ServerId,
    pub name: String,
    pub owner: UserId,
    #[serde(default)]
    pub members: Vec<UserId>,
    #[serde(default)]
    pub admins: Vec<UserId>,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub created_at: i64,
}

impl Server {
    /// Whether `uid` may manage this server (rename, icon, channels).
    pub fn is_managed_by(&self, uid: &UserId) -> bool {
        self.owner == *uid || self.admins.contains(uid)
    }

    pub fn from_doc(doc: &Document) -> catcord_store::Result<Self> {
        let mut server: Server = doc.decode()?;
        server.id = ServerId::new(doc.id.clone());
        Ok(server)
    }
}

/// Server reads and writes.
#[derive(Clone)]
pub struct Servers {
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
}

impl Servers {
    pub fn new(store: Arc<dyn DocumentStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { store, blobs }
    }

    /// Creates a server with the caller as sole member and owner.
    pub async fn create(&self, owner: &UserId, name: &str) -> Result<Server> {
        let data = json!({
            "name": name.trim(),
            "owner": owner,
            "members": [owner],
            "createdAt": now_millis(),
        });
        let id = self.store.add(COLLECTION_SERVERS, data).await?;
        info!(server = %id, owner = %owner, "Server created");
        self.get(&ServerId::new(id)).await
    }

    pub async fn get(&self, id: &ServerId) -> Result<Server> {
        let doc = self
            .store
            .get(COLLECTION_SERVERS, id.as_str())
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(Server::from_doc(&doc)?)
    }

    /// Servers the given user belongs to.
    pub async fn my_servers(&self, uid: &UserId) -> Result<Vec<Server>> {
        let docs = self.store.query(&member_query(uid)).await?;
        collect_servers(&docs)
    }

    /// Live view of the user's server list.
    pub async fn watch_my_servers(&self, uid: &UserId) -> Result<QueryWatcher> {
        Ok(self.store.watch_query(&member_query(uid)).await?)
    }

    /// Renames the server. Owner or admin only.
    pub async fn rename(&self, actor: &UserId, id: &ServerId, name: &str) -> Result<()> {
        let server = self.get(id).await?;
        require_manager(&server, actor)?;
        self.store
            .update(COLLECTION_SERVERS, id.as_str(), json!({"name": name.trim()}))
            .await?;
        Ok(())
    }

    /// Uploads an icon image and records its URL on the server. Owner or
    /// admin only.
    pub async fn set_icon(
        &self,
        actor: &UserId,
        id: &ServerId,
        filename: &str,
        data: Bytes,
    ) -> Result<String> {
        let server = self.get(id).await?;
        require_manager(&server, actor)?;
        let key = format!(
            "{}/{}/{}_{}",
            BLOB_SERVER_ICONS_PREFIX,
            id.as_str(),
            now_millis(),
            filename
        );
        let url = self.blobs.upload(&key, data).await?;
        self.store
            .update(COLLECTION_SERVERS, id.as_str(), json!({"icon": url}))
            .await?;
        info!(server = %id, "Server icon updated");
        Ok(url)
    }

    /// Removes the caller from the member list. The owner cannot leave.
    pub async fn leave(&self, actor: &UserId, id: &ServerId) -> Result<()> {
        let server = self.get(id).await?;
        if server.owner == *actor {
            return Err(ClientError::OwnerCannotLeave);
        }
        let members: Vec<&UserId> = server.members.iter().filter(|m| *m != actor).collect();
        self.store
            .update(
                COLLECTION_SERVERS,
                id.as_str(),
                json!({"members": members}),
            )
            .await?;
        info!(server = %id, uid = %actor, "Left server");
        Ok(())
    }

    /// Resolves member uids to profiles. Members whose profile document is
    /// missing are skipped.
    pub async fn members(&self, id: &ServerId, profiles: &Profiles) -> Result<Vec<UserProfile>> {
        let server = self.get(id).await?;
        let mut resolved = Vec::with_capacity(server.members.len());
        for uid in &server.members {
            match profiles.load(uid).await {
                Ok(profile) => resolved.push(profile),
                Err(ClientError::Store(StoreError::NotFound)) => {
                    debug!(uid = %uid, "Member without a profile document");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(resolved)
    }
}

fn member_query(uid: &UserId) -> Query {
    Query::collection(COLLECTION_SERVERS).filter(Filter::array_contains("members", uid.as_str()))
}

fn collect_servers(docs: &[Document]) -> Result<Vec<Server>> {
    docs.iter()
        .map(|doc| Ok(Server::from_doc(doc)?))
        .collect()
}

pub(crate) fn require_manager(server: &Server, actor: &UserId) -> Result<()> {
    if server.is_managed_by(actor) {
        return Ok(());
    }
    Err(ClientError::PermissionDenied("owner or admin role required"))
}
