//! # catcord-client
//!
//! The Catcord application core: account sessions, servers, channels,
//! messaging, friends, and calls, all running against the platform
//! services of [`catcord_store`].
//!
//! [`Client`] bundles the per-domain services behind one handle wired to a
//! single document store, auth service and blob store. Everything that
//! needs a signed-in account goes through the session held by the auth
//! service; call operations refuse to run without one.

pub mod calls;
pub mod channels;
pub mod dms;
pub mod friends;
pub mod messages;
pub mod profile;
pub mod servers;
pub mod session;

mod error;

pub use calls::Calls;
pub use channels::{Channel, Channels};
pub use dms::{
    Conversation, Conversations, DirectMessage, DmEntry, InviteMessage, InviteStatus,
};
pub use error::{ClientError, Result};
pub use friends::{FriendRequest, Friends, RequestStatus};
pub use messages::{ChannelMessage, Messages};
pub use profile::{Profiles, UserProfile};
pub use servers::{Server, Servers};
pub use session::Sessions;

// Call types surface in [`Client`] method signatures.
pub use catcord_media::{
    CallAlert, CallHandle, CallState, EndReason, IncomingCall, IncomingCallWatcher,
};

use std::sync::Arc;

use catcord_media::{
    AudioConfig, CallNegotiator, CallRegistry, CpalSource, MediaSource, PeerFactory,
    RtcPeerFactory,
};
use catcord_shared::{ConversationId, ServerId, UserId};
use catcord_store::{AuthService, AuthUser, BlobStore, DocumentStore};

/// One signed-in (or signed-out) application instance.
#[derive(Clone)]
pub struct Client {
    auth: Arc<dyn AuthService>,
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    sessions: Sessions,
    profiles: Profiles,
    servers: Servers,
    channels: Channels,
    messages: Messages,
    conversations: Conversations,
    friends: Friends,
    calls: Calls,
}

impl Client {
    /// Builds a client using the real audio stack and WebRTC transport.
    pub fn new(
        auth: Arc<dyn AuthService>,
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self::with_media(
            auth,
            store,
            blobs,
            Arc::new(RtcPeerFactory::new()),
            Arc::new(CpalSource::new(AudioConfig::default())),
        )
    }

    /// Builds a client over caller-supplied transport and capture stacks.
    pub fn with_media(
        auth: Arc<dyn AuthService>,
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        peers: Arc<dyn PeerFactory>,
        media: Arc<dyn MediaSource>,
    ) -> Self {
        let profiles = Profiles::new(Arc::clone(&store), Arc::clone(&blobs));
        let negotiator = CallNegotiator::new(
            Arc::clone(&store),
            peers,
            media,
            CallRegistry::new(),
        );
        Self {
            sessions: Sessions::new(Arc::clone(&auth), profiles.clone()),
            servers: Servers::new(Arc::clone(&store), Arc::clone(&blobs)),
            channels: Channels::new(Arc::clone(&store)),
            messages: Messages::new(Arc::clone(&store)),
            conversations: Conversations::new(Arc::clone(&store)),
            friends: Friends::new(Arc::clone(&store)),
            calls: Calls::new(negotiator, Arc::clone(&store), profiles.clone()),
            profiles,
            auth,
            store,
            blobs,
        }
    }

    pub fn sessions(&self) -> &Sessions {
        &self.sessions
    }

    pub fn profiles(&self) -> &Profiles {
        &self.profiles
    }

    pub fn servers(&self) -> &Servers {
        &self.servers
    }

    pub fn channels(&self) -> &Channels {
        &self.channels
    }

    pub fn messages(&self) -> &Messages {
        &self.messages
    }

    pub fn conversations(&self) -> &Conversations {
        &self.conversations
    }

    pub fn friends(&self) -> &Friends {
        &self.friends
    }

    pub fn calls(&self) -> &Calls {
        &self.calls
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// The signed-in account, or [`ClientError::NotSignedIn`].
    pub fn current_user(&self) -> Result<AuthUser> {
        self.auth.current_user().ok_or(ClientError::NotSignedIn)
    }

    /// Rings `remote` in the given conversation as the signed-in user.
    pub async fn start_call(
        &self,
        conversation: &ConversationId,
        remote: &UserId,
    ) -> Result<CallHandle> {
        let me = self.current_user()?;
        self.calls.start(&me, conversation, remote).await
    }

    /// Ring/withdraw alerts for calls addressed to the signed-in user.
    pub async fn incoming_calls(&self) -> Result<IncomingCallWatcher> {
        let me = self.current_user()?;
        self.calls.incoming(&me.uid).await
    }

    pub async fn accept_call(&self, call: IncomingCall) -> Result<CallHandle> {
        self.current_user()?;
        self.calls.accept(call).await
    }

    pub async fn decline_call(&self, call: &IncomingCall) -> Result<()> {
        self.current_user()?;
        self.calls.decline(call).await
    }

    /// Friends-search suggestions for inviting into `server`, leaving out
    /// users who already belong to it.
    pub async fn invite_suggestions(
        &self,
        server: &ServerId,
        text: &str,
    ) -> Result<Vec<UserProfile>> {
        let me = self.current_user()?;
        let server = self.servers.get(server).await?;
        let found = self.friends.search_users(&me.uid, text).await?;
        Ok(found
            .into_iter()
            .filter(|profile| !server.members.contains(&profile.uid))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    use catcord_shared::constants::{COLLECTION_SERVERS, COLLECTION_USERS};
    use catcord_store::{FsBlobStore, LocalAuth, LocalStore};

    async fn rig() -> (Client, TempDir) {
        let dir = TempDir::new().unwrap();
        let auth: Arc<dyn AuthService> = Arc::new(LocalAuth::new());
        let store: Arc<dyn DocumentStore> = Arc::new(LocalStore::open_in_memory().unwrap());
        let blobs: Arc<dyn BlobStore> = Arc::new(
            FsBlobStore::new(dir.path().to_path_buf(), 1024 * 1024)
                .await
                .unwrap(),
        );
        (Client::new(auth, store, blobs), dir)
    }

    #[tokio::test]
    async fn signed_out_client_has_no_user() {
        let (client, _dir) = rig().await;
        assert!(matches!(
            client.current_user(),
            Err(ClientError::NotSignedIn)
        ));
    }

    #[tokio::test]
    async fn call_operations_require_a_session() {
        let (client, _dir) = rig().await;
        let convo = ConversationId::new("dm1");
        let remote = UserId::new("bob");

        let err = client.start_call(&convo, &remote).await.unwrap_err();
        assert!(matches!(err, ClientError::NotSignedIn));
        let err = client.incoming_calls().await.unwrap_err();
        assert!(matches!(err, ClientError::NotSignedIn));
    }

    #[tokio::test]
    async fn invite_suggestions_leave_out_existing_members() {
        let (client, _dir) = rig().await;
        let me = client
            .sessions()
            .sign_up("alice@exemple.fr", "motdepasse")
            .await
            .unwrap();
        let server = client.servers().create(&me.uid, "Ma guilde").await.unwrap();

        for (uid, pseudo) in [("bob", "boris"), ("carol", "borah")] {
            client
                .store()
                .set(
                    COLLECTION_USERS,
                    uid,
                    json!({
                        "email": format!("{uid}@exemple.fr"),
                        "pseudo": pseudo,
                        "discriminator": "0001",
                        "friends": [],
                        "avatar": "",
                        "status": "online",
                        "createdAt": 1_000,
                    }),
                )
                .await
                .unwrap();
        }
        // boris already belongs to the server.
        client
            .store()
            .update(
                COLLECTION_SERVERS,
                server.id.as_str(),
                json!({"members": [me.uid.as_str(), "bob"]}),
            )
            .await
            .unwrap();

        let found = client.invite_suggestions(&server.id, "bor").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].pseudo, "borah");
    }
}
