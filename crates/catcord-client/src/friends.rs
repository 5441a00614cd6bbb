//! Friend requests, the friends list, and user search.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use catcord_shared::constants::{
    COLLECTION_FRIEND_REQUESTS, COLLECTION_USERS, PREFIX_RANGE_CEILING,
};
use catcord_shared::{now_millis, UserId};
use catcord_store::{Document, DocumentStore, Filter, Query, QueryWatcher, StoreError};

use crate::error::{ClientError, Result};
use crate::profile::UserProfile;

/// Most suggestions a user search returns.
pub const SEARCH_LIMIT: usize = 5;

/// Shortest query a user search accepts. Anything shorter matches too much
/// to be useful.
pub const MIN_SEARCH_LEN: usize = 2;

/// Response state of a friend request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

/// One friend request document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequest {
    #[serde(skip)]
    pub id: String,
    pub from: UserId,
    pub to: UserId,
    pub status: RequestStatus,
    #[serde(default)]
    pub created_at: i64,
}

impl FriendRequest {
    pub fn from_doc(doc: &Document) -> catcord_store::Result<Self> {
        let mut request: FriendRequest = doc.decode()?;
        request.id = doc.id.clone();
        Ok(request)
    }
}

/// Friendship reads and writes.
#[derive(Clone)]
pub struct Friends {
    store: Arc<dyn DocumentStore>,
}

impl Friends {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Sends a friend request to the user named by `text`, resolved first
    /// as an exact pseudo and then as an exact email. Self-adds, existing
    /// friendships, and already-pending requests between the pair are
    /// rejected.
    pub async fn send_request(&self, me: &UserId, text: &str) -> Result<String> {
        let target = self.resolve(text.trim()).await?;
        if target.uid == *me {
            return Err(ClientError::SelfFriendRequest);
        }

        let mine = self.load_profile(me).await?;
        if mine.friends.contains(&target.uid) {
            return Err(ClientError::AlreadyFriends);
        }
        if self.has_pending(me, &target.uid).await? || self.has_pending(&target.uid, me).await? {
            return Err(ClientError::RequestAlreadyPending);
        }

        let data = json!({
            "from": me,
            "to": target.uid,
            "status": RequestStatus::Pending.as_str(),
            "createdAt": now_millis(),
        });
        let id = self.store.add(COLLECTION_FRIEND_REQUESTS, data).await?;
        info!(to = %target.tag(), "Friend request sent");
        Ok(id)
    }

    /// Pending requests addressed to the user.
    pub async fn incoming(&self, uid: &UserId) -> Result<Vec<FriendRequest>> {
        let docs = self.store.query(&pending_query("to", uid)).await?;
        collect_requests(&docs)
    }

    pub async fn watch_incoming(&self, uid: &UserId) -> Result<QueryWatcher> {
        Ok(self.store.watch_query(&pending_query("to", uid)).await?)
    }

    /// Pending requests the user has sent.
    pub async fn outgoing(&self, uid: &UserId) -> Result<Vec<FriendRequest>> {
        let docs = self.store.query(&pending_query("from", uid)).await?;
        collect_requests(&docs)
    }

    pub async fn watch_outgoing(&self, uid: &UserId) -> Result<QueryWatcher> {
        Ok(self.store.watch_query(&pending_query("from", uid)).await?)
    }

    /// Accepts a request addressed to the caller and links both profiles.
    pub async fn accept(&self, me: &UserId, request_id: &str) -> Result<()> {
        let request = self.respond(me, request_id, RequestStatus::Accepted).await?;
        self.link(&request.from, &request.to).await?;
        self.link(&request.to, &request.from).await?;
        info!(from = %request.from, to = %request.to, "Friend request accepted");
        Ok(())
    }

    /// Rejects a request addressed to the caller.
    pub async fn reject(&self, me: &UserId, request_id: &str) -> Result<()> {
        self.respond(me, request_id, RequestStatus::Rejected).await?;
        Ok(())
    }

    /// Removes each side from the other's friends list.
    pub async fn remove_friend(&self, me: &UserId, other: &UserId) -> Result<()> {
        self.unlink(me, other).await?;
        self.unlink(other, me).await?;
        info!(uid = %other, "Friend removed");
        Ok(())
    }

    /// Prefix search over pseudos, `name#disc` queries narrowing by
    /// discriminator. The caller is never suggested.
    pub async fn search_users(&self, me: &UserId, text: &str) -> Result<Vec<UserProfile>> {
        let trimmed = text.trim();
        if trimmed.chars().count() < MIN_SEARCH_LEN {
            return Ok(Vec::new());
        }

        let (name, disc) = match trimmed.split_once('#') {
            Some((name, disc)) => (name, Some(disc)),
            None => (trimmed, None),
        };
        let mut query = Query::collection(COLLECTION_USERS)
            .filter(Filter::gte("pseudo", name))
            .filter(Filter::lte("pseudo", format!("{name}{PREFIX_RANGE_CEILING}")));
        if let Some(disc) = disc {
            let low = if disc.is_empty() { "0000" } else { disc };
            let high = if disc.is_empty() { "9999" } else { disc };
            query = query
                .filter(Filter::gte("discriminator", low))
                .filter(Filter::lte(
                    "discriminator",
                    format!("{high}{PREFIX_RANGE_CEILING}"),
                ));
        }

        let docs = self.store.query(&query).await?;
        let mut found = Vec::new();
        for doc in &docs {
            let profile = UserProfile::from_doc(doc)?;
            if profile.uid != *me {
                found.push(profile);
            }
        }
        found.truncate(SEARCH_LIMIT);
        Ok(found)
    }

    async fn resolve(&self, text: &str) -> Result<UserProfile> {
        let by_pseudo = Query::collection(COLLECTION_USERS).filter(Filter::eq("pseudo", text));
        if let Some(doc) = self.store.query(&by_pseudo).await?.first() {
            return Ok(UserProfile::from_doc(doc)?);
        }
        let by_email = Query::collection(COLLECTION_USERS).filter(Filter::eq("email", text));
        if let Some(doc) = self.store.query(&by_email).await?.first() {
            return Ok(UserProfile::from_doc(doc)?);
        }
        Err(ClientError::UserNotFound(text.to_string()))
    }

    async fn load_profile(&self, uid: &UserId) -> Result<UserProfile> {
        let doc = self
            .store
            .get(COLLECTION_USERS, uid.as_str())
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(UserProfile::from_doc(&doc)?)
    }

    async fn has_pending(&self, from: &UserId, to: &UserId) -> Result<bool> {
        let query = Query::collection(COLLECTION_FRIEND_REQUESTS)
            .filter(Filter::eq("from", from.as_str()))
            .filter(Filter::eq("to", to.as_str()))
            .filter(Filter::eq("status", RequestStatus::Pending.as_str()));
        Ok(!self.store.query(&query).await?.is_empty())
    }

    /// Marks the request and returns it. Only the recipient may respond.
    async fn respond(
        &self,
        me: &UserId,
        request_id: &str,
        status: RequestStatus,
    ) -> Result<FriendRequest> {
        let doc = self
            .store
            .get(COLLECTION_FRIEND_REQUESTS, request_id)
            .await?
            .ok_or(StoreError::NotFound)?;
        let request = FriendRequest::from_doc(&doc)?;
        if request.to != *me {
            return Err(ClientError::PermissionDenied(
                "only the recipient can respond to a friend request",
            ));
        }
        self.store
            .update(
                COLLECTION_FRIEND_REQUESTS,
                request_id,
                json!({"status": status.as_str()}),
            )
            .await?;
        Ok(request)
    }

    /// Adds `friend` to `owner`'s friends list if absent.
    async fn link(&self, owner: &UserId, friend: &UserId) -> Result<()> {
        let profile = self.load_profile(owner).await?;
        if profile.friends.contains(friend) {
            return Ok(());
        }
        let mut friends = profile.friends;
        friends.push(friend.clone());
        self.store
            .update(
                COLLECTION_USERS,
                owner.as_str(),
                json!({"friends": friends}),
            )
            .await?;
        Ok(())
    }

    async fn unlink(&self, owner: &UserId, friend: &UserId) -> Result<()> {
        let profile = self.load_profile(owner).await?;
        let friends: Vec<&UserId> = profile.friends.iter().filter(|f| *f != friend).collect();
        self.store
            .update(
                COLLECTION_USERS,
                owner.as_str(),
                json!({"friends": friends}),
            )
            .await?;
        Ok(())
    }
}

fn pending_query(side: &str, uid: &UserId) -> Query {
    Query::collection(COLLECTION_FRIEND_REQUESTS)
        .filter(Filter::eq(side, uid.as_str()))
        .filter(Filter::eq("status", RequestStatus::Pending.as_str()))
}

fn collect_requests(docs: &[Document]) -> Result<Vec<FriendRequest>> {
    docs.iter()
        .map(|doc| Ok(FriendRequest::from_doc(doc)?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use catcord_store::LocalStore;

    fn rig() -> (Friends, Arc<dyn DocumentStore>) {
        let store: Arc<dyn DocumentStore> = Arc::new(LocalStore::open_in_memory().unwrap());
        (Friends::new(store.clone()), store)
    }

    async fn seed_user(store: &Arc<dyn DocumentStore>, uid: &str, pseudo: &str, disc: &str) {
        store
            .set(
                COLLECTION_USERS,
                uid,
                json!({
                    "email": format!("{uid}@exemple.fr"),
                    "pseudo": pseudo,
                    "discriminator": disc,
                    "friends": [],
                    "avatar": "",
                    "status": "online",
                    "createdAt": 1_000,
                }),
            )
            .await
            .unwrap();
    }

    fn alice() -> UserId {
        UserId::new("alice")
    }

    fn bob() -> UserId {
        UserId::new("bob")
    }

    async fn friends_of(store: &Arc<dyn DocumentStore>, uid: &UserId) -> Vec<UserId> {
        let doc = store
            .get(COLLECTION_USERS, uid.as_str())
            .await
            .unwrap()
            .unwrap();
        UserProfile::from_doc(&doc).unwrap().friends
    }

    #[tokio::test]
    async fn request_then_accept_links_both_profiles() {
        let (friends, store) = rig();
        seed_user(&store, "alice", "alice", "0001").await;
        seed_user(&store, "bob", "bob", "0002").await;

        let id = friends.send_request(&alice(), "bob").await.unwrap();
        let incoming = friends.incoming(&bob()).await.unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].from, alice());
        assert_eq!(friends.outgoing(&alice()).await.unwrap().len(), 1);

        friends.accept(&bob(), &id).await.unwrap();
        assert_eq!(friends_of(&store, &alice()).await, vec![bob()]);
        assert_eq!(friends_of(&store, &bob()).await, vec![alice()]);
        // No longer pending on either side.
        assert!(friends.incoming(&bob()).await.unwrap().is_empty());
        assert!(friends.outgoing(&alice()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn target_resolves_by_email_when_pseudo_misses() {
        let (friends, store) = rig();
        seed_user(&store, "alice", "alice", "0001").await;
        seed_user(&store, "bob", "bob", "0002").await;

        friends
            .send_request(&alice(), "bob@exemple.fr")
            .await
            .unwrap();
        assert_eq!(friends.incoming(&bob()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_target_is_reported() {
        let (friends, store) = rig();
        seed_user(&store, "alice", "alice", "0001").await;
        let err = friends.send_request(&alice(), "personne").await.unwrap_err();
        assert!(matches!(err, ClientError::UserNotFound(name) if name == "personne"));
    }

    #[tokio::test]
    async fn self_request_is_rejected() {
        let (friends, store) = rig();
        seed_user(&store, "alice", "alice", "0001").await;
        let err = friends.send_request(&alice(), "alice").await.unwrap_err();
        assert!(matches!(err, ClientError::SelfFriendRequest));
    }

    #[tokio::test]
    async fn existing_friendship_is_rejected() {
        let (friends, store) = rig();
        seed_user(&store, "alice", "alice", "0001").await;
        seed_user(&store, "bob", "bob", "0002").await;
        let id = friends.send_request(&alice(), "bob").await.unwrap();
        friends.accept(&bob(), &id).await.unwrap();

        let err = friends.send_request(&alice(), "bob").await.unwrap_err();
        assert!(matches!(err, ClientError::AlreadyFriends));
    }

    #[tokio::test]
    async fn pending_request_blocks_duplicates_in_both_directions() {
        let (friends, store) = rig();
        seed_user(&store, "alice", "alice", "0001").await;
        seed_user(&store, "bob", "bob", "0002").await;
        friends.send_request(&alice(), "bob").await.unwrap();

        let again = friends.send_request(&alice(), "bob").await.unwrap_err();
        assert!(matches!(again, ClientError::RequestAlreadyPending));
        let reverse = friends.send_request(&bob(), "alice").await.unwrap_err();
        assert!(matches!(reverse, ClientError::RequestAlreadyPending));
    }

    #[tokio::test]
    async fn reject_leaves_no_friendship_behind() {
        let (friends, store) = rig();
        seed_user(&store, "alice", "alice", "0001").await;
        seed_user(&store, "bob", "bob", "0002").await;
        let id = friends.send_request(&alice(), "bob").await.unwrap();

        friends.reject(&bob(), &id).await.unwrap();
        assert!(friends_of(&store, &alice()).await.is_empty());
        assert!(friends_of(&store, &bob()).await.is_empty());
        assert!(friends.incoming(&bob()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn only_the_recipient_can_respond() {
        let (friends, store) = rig();
        seed_user(&store, "alice", "alice", "0001").await;
        seed_user(&store, "bob", "bob", "0002").await;
        let id = friends.send_request(&alice(), "bob").await.unwrap();

        let err = friends.accept(&alice(), &id).await.unwrap_err();
        assert!(matches!(err, ClientError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn remove_friend_clears_both_sides() {
        let (friends, store) = rig();
        seed_user(&store, "alice", "alice", "0001").await;
        seed_user(&store, "bob", "bob", "0002").await;
        let id = friends.send_request(&alice(), "bob").await.unwrap();
        friends.accept(&bob(), &id).await.unwrap();

        friends.remove_friend(&alice(), &bob()).await.unwrap();
        assert!(friends_of(&store, &alice()).await.is_empty());
        assert!(friends_of(&store, &bob()).await.is_empty());
    }

    #[tokio::test]
    async fn search_matches_pseudo_prefixes_without_the_caller() {
        let (friends, store) = rig();
        seed_user(&store, "me", "boromir", "0001").await;
        seed_user(&store, "u1", "boris", "0002").await;
        seed_user(&store, "u2", "borah", "0003").await;
        seed_user(&store, "u3", "alice", "0004").await;

        let found = friends.search_users(&UserId::new("me"), "bor").await.unwrap();
        let mut pseudos: Vec<&str> = found.iter().map(|p| p.pseudo.as_str()).collect();
        pseudos.sort_unstable();
        assert_eq!(pseudos, ["borah", "boris"]);
    }

    #[tokio::test]
    async fn search_with_discriminator_narrows_the_matches() {
        let (friends, store) = rig();
        seed_user(&store, "u1", "boris", "0011").await;
        seed_user(&store, "u2", "boris", "0222").await;

        let narrowed = friends
            .search_users(&UserId::new("me"), "boris#00")
            .await
            .unwrap();
        assert_eq!(narrowed.len(), 1);
        assert_eq!(narrowed[0].discriminator, "0011");

        // A bare `#` keeps the full discriminator range.
        let all = friends
            .search_users(&UserId::new("me"), "boris#")
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn short_queries_return_nothing() {
        let (friends, store) = rig();
        seed_user(&store, "u1", "boris", "0011").await;
        assert!(friends
            .search_users(&UserId::new("me"), "b")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn search_caps_the_suggestion_count() {
        let (friends, store) = rig();
        for i in 0..7 {
            seed_user(&store, &format!("u{i}"), &format!("boris{i}"), "0001").await;
        }
        let found = friends
            .search_users(&UserId::new("me"), "boris")
            .await
            .unwrap();
        assert_eq!(found.len(), SEARCH_LIMIT);
    }
}
