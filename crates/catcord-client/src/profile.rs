//! User profiles and presence.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use catcord_shared::constants::{BLOB_AVATARS_PREFIX, COLLECTION_USERS};
use catcord_shared::{now_millis, PresenceStatus, UserId};
use catcord_store::{
    AuthUser, BlobStore, Document, DocumentStore, DocumentWatcher, Filter, Query, StoreError,
};

use crate::error::Result;

/// One account's profile document. The document id is the account uid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(skip)]
    pub uid: UserId,
    pub email: String,
    pub pseudo: String,
    pub discriminator: String,
    #[serde(default)]
    pub friends: Vec<UserId>,
    #[serde(default)]
    pub avatar: String,
    pub status: PresenceStatus,
    #[serde(default)]
    pub created_at: i64,
}

impl UserProfile {
    /// Display handle, `pseudo#discriminator`.
    pub fn tag(&self) -> String {
        format!("{}#{}", self.pseudo, self.discriminator)
    }

    /// Decode a users-collection document, keeping its id as the uid.
    pub fn from_doc(doc: &Document) -> catcord_store::Result<Self> {
        let mut profile: UserProfile = doc.decode()?;
        profile.uid = UserId::new(doc.id.clone());
        Ok(profile)
    }
}

/// Profile reads and writes over the users collection.
#[derive(Clone)]
pub struct Profiles {
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
}

impl Profiles {
    pub fn new(store: Arc<dyn DocumentStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { store, blobs }
    }

    /// Writes the initial profile document for a fresh account.
    pub(crate) async fn create(
        &self,
        user: &AuthUser,
        pseudo: &str,
        discriminator: &str,
    ) -> Result<UserProfile> {
        let data = json!({
            "email": user.email,
            "pseudo": pseudo,
            "discriminator": discriminator,
            "friends": [],
            "avatar": "",
            "status": PresenceStatus::Online.as_str(),
            "createdAt": now_millis(),
        });
        self.store
            .set(COLLECTION_USERS, user.uid.as_str(), data)
            .await?;
        let profile = self.load(&user.uid).await?;
        info!(uid = %user.uid, tag = %profile.tag(), "Profile created");
        Ok(profile)
    }

    pub async fn load(&self, uid: &UserId) -> Result<UserProfile> {
        let doc = self
            .store
            .get(COLLECTION_USERS, uid.as_str())
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(UserProfile::from_doc(&doc)?)
    }

    /// Rewrites the mutable profile fields.
    pub async fn update_profile(
        &self,
        uid: &UserId,
        pseudo: &str,
        status: PresenceStatus,
    ) -> Result<()> {
        self.store
            .update(
                COLLECTION_USERS,
                uid.as_str(),
                json!({"pseudo": pseudo, "status": status.as_str()}),
            )
            .await?;
        Ok(())
    }

    pub async fn set_status(&self, uid: &UserId, status: PresenceStatus) -> Result<()> {
        self.store
            .update(
                COLLECTION_USERS,
                uid.as_str(),
                json!({"status": status.as_str()}),
            )
            .await?;
        debug!(uid = %uid, status = %status, "Presence updated");
        Ok(())
    }

    /// Uploads avatar bytes and records the returned URL on the profile.
    pub async fn set_avatar(&self, uid: &UserId, data: Bytes) -> Result<String> {
        let key = format!("{}/{}", BLOB_AVATARS_PREFIX, uid.as_str());
        let url = self.blobs.upload(&key, data).await?;
        self.store
            .update(COLLECTION_USERS, uid.as_str(), json!({"avatar": url}))
            .await?;
        info!(uid = %uid, "Avatar updated");
        Ok(url)
    }

    /// Clears the avatar URL on the profile. The stored blob stays in place.
    pub async fn clear_avatar(&self, uid: &UserId) -> Result<()> {
        self.store
            .update(COLLECTION_USERS, uid.as_str(), json!({"avatar": ""}))
            .await?;
        Ok(())
    }

    /// Live view of one profile document.
    pub async fn watch(&self, uid: &UserId) -> Result<DocumentWatcher> {
        Ok(self
            .store
            .watch_document(COLLECTION_USERS, uid.as_str())
            .await?)
    }

    /// Whether any profile already holds `pseudo#discriminator`.
    pub(crate) async fn tag_exists(&self, pseudo: &str, discriminator: &str) -> Result<bool> {
        let query = Query::collection(COLLECTION_USERS)
            .filter(Filter::eq("pseudo", pseudo))
            .filter(Filter::eq("discriminator", discriminator));
        Ok(!self.store.query(&query).await?.is_empty())
    }
}
