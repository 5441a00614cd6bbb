//! Glue between the signed-in session and the call negotiator.

use std::sync::Arc;

use tracing::debug;

use catcord_media::{CallHandle, CallNegotiator, IncomingCall, IncomingCallWatcher, Participant};
use catcord_shared::{ConversationId, UserId};
use catcord_store::{AuthUser, DocumentStore};

use crate::error::Result;
use crate::profile::Profiles;

/// Call operations bound to the document store and the local account.
#[derive(Clone)]
pub struct Calls {
    negotiator: CallNegotiator,
    store: Arc<dyn DocumentStore>,
    profiles: Profiles,
}

impl Calls {
    pub fn new(
        negotiator: CallNegotiator,
        store: Arc<dyn DocumentStore>,
        profiles: Profiles,
    ) -> Self {
        Self {
            negotiator,
            store,
            profiles,
        }
    }

    /// Rings `remote` in the given conversation. The caller's pseudo rides
    /// along on the offer so the other side can show who is calling.
    pub async fn start(
        &self,
        me: &AuthUser,
        conversation: &ConversationId,
        remote: &UserId,
    ) -> Result<CallHandle> {
        let display_name = match self.profiles.load(&me.uid).await {
            Ok(profile) => profile.pseudo,
            Err(e) => {
                debug!(uid = %me.uid, error = %e, "No profile for caller, using email");
                me.email.clone()
            }
        };
        let local = Participant {
            uid: me.uid.clone(),
            display_name,
        };
        Ok(self.negotiator.initiate(conversation, &local, remote).await?)
    }

    /// Ring/withdraw alerts for offers addressed to the user.
    pub async fn incoming(&self, uid: &UserId) -> Result<IncomingCallWatcher> {
        Ok(IncomingCallWatcher::start(Arc::clone(&self.store), uid).await?)
    }

    pub async fn accept(&self, call: IncomingCall) -> Result<CallHandle> {
        Ok(self.negotiator.accept(call).await?)
    }

    pub async fn decline(&self, call: &IncomingCall) -> Result<()> {
        Ok(self.negotiator.decline(call).await?)
    }
}
