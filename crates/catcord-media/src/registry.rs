//! Tracks which conversations currently have a live call.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::debug;

use catcord_shared::ConversationId;

use crate::error::{CallError, Result};

/// Shared registry of conversations with an active call.
///
/// A claim is handed out at most once per conversation and released when
/// the [`CallClaim`] drops, so an abandoned call never wedges the
/// conversation.
#[derive(Clone, Default)]
pub struct CallRegistry {
    active: Arc<Mutex<HashSet<ConversationId>>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the conversation for a call. Fails with
    /// [`CallError::AlreadyInCall`] while another claim is live.
    pub fn claim(&self, conversation: &ConversationId) -> Result<CallClaim> {
        let mut active = self.active.lock().map_err(|_| CallError::LockPoisoned)?;
        if !active.insert(conversation.clone()) {
            return Err(CallError::AlreadyInCall);
        }
        debug!(conversation = %conversation, "Claimed conversation for a call");
        Ok(CallClaim {
            registry: Arc::clone(&self.active),
            conversation: conversation.clone(),
        })
    }

    /// True while a claim is live for the conversation.
    pub fn is_active(&self, conversation: &ConversationId) -> bool {
        self.active
            .lock()
            .map(|active| active.contains(conversation))
            .unwrap_or(false)
    }
}

/// RAII claim on a conversation; dropping it frees the slot.
pub struct CallClaim {
    registry: Arc<Mutex<HashSet<ConversationId>>>,
    conversation: ConversationId,
}

impl CallClaim {
    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }
}

impl Drop for CallClaim {
    fn drop(&mut self) {
        if let Ok(mut active) = self.registry.lock() {
            active.remove(&self.conversation);
        }
        debug!(conversation = %self.conversation, "Released call claim");
    }
}
