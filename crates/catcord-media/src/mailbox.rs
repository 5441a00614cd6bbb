//! The call-session mailbox inside the document store.
//!
//! Each call lives under a deterministic key derived from the conversation
//! and both participants, so either side addresses the same document slots:
//! one offer, one answer, and one latest-candidate slot per participant.
//! Every slot has exactly one legitimate writer, and the store delivers
//! snapshots of a single document in write order; that convention is the
//! entire concurrency story of the protocol.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use catcord_shared::constants::COLLECTION_CALLS;
use catcord_shared::{now_millis, ConversationId, IceCandidate, SessionDescription, UserId};
use catcord_store::{DocumentSnapshot, DocumentStore, DocumentWatcher, Result};

/// Sentinel stored in the answer slot when the callee refuses.
pub const DECLINED: &str = "declined";

/// Deterministic key shared by both ends of a call session.
///
/// Derived by sorting the conversation id and both participant ids, so the
/// same key comes out no matter who dials.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallKey {
    value: String,
}

impl CallKey {
    pub fn new(conversation: &ConversationId, a: &UserId, b: &UserId) -> Self {
        let mut parts = [conversation.as_str(), a.as_str(), b.as_str()];
        parts.sort_unstable();
        Self {
            value: parts.join("_"),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Document id of the offer slot.
    pub fn offer_doc(&self) -> String {
        format!("offer_{}", self.value)
    }

    /// Document id of the answer slot.
    pub fn answer_doc(&self) -> String {
        format!("answer_{}", self.value)
    }

    /// Document id of one participant's latest-candidate slot.
    pub fn candidate_doc(&self, uid: &UserId) -> String {
        format!("{}_ice_{}", self.value, uid.as_str())
    }
}

impl std::fmt::Display for CallKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

/// The offer slot. `kind` is written as the literal `"offer"` so the
/// incoming-call watcher can match offers with a plain field filter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OfferRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub offer: SessionDescription,
    pub from: UserId,
    pub to: UserId,
    pub from_name: String,
    pub dm_id: ConversationId,
    pub timestamp: i64,
}

impl OfferRecord {
    pub fn new(
        offer: SessionDescription,
        from: &UserId,
        to: &UserId,
        from_name: &str,
        dm_id: &ConversationId,
    ) -> Self {
        Self {
            kind: "offer".to_string(),
            offer,
            from: from.clone(),
            to: to.clone(),
            from_name: from_name.to_string(),
            dm_id: dm_id.clone(),
            timestamp: now_millis(),
        }
    }
}

/// What sits in the answer slot: a session description, or the decline
/// sentinel as a bare string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AnswerPayload {
    Session(SessionDescription),
    Sentinel(String),
}

impl AnswerPayload {
    pub fn declined() -> Self {
        Self::Sentinel(DECLINED.to_string())
    }

    pub fn is_declined(&self) -> bool {
        matches!(self, Self::Sentinel(s) if s == DECLINED)
    }

    pub fn session(&self) -> Option<&SessionDescription> {
        match self {
            Self::Session(desc) => Some(desc),
            Self::Sentinel(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    pub answer: AnswerPayload,
    pub from: UserId,
    pub to: UserId,
    pub dm_id: ConversationId,
    pub timestamp: i64,
}

/// One participant's latest-candidate slot, overwritten on every locally
/// gathered candidate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateRecord {
    pub candidate: IceCandidate,
    pub timestamp: i64,
}

/// An inbound offer captured by the notification watcher, ready to hand to
/// the negotiator or to decline directly.
#[derive(Debug, Clone)]
pub struct IncomingCall {
    /// Document id of the offer slot that rang.
    pub doc_id: String,
    pub offer: OfferRecord,
}

/// One call session's view of the mailbox: typed reads, writes and watches
/// over the session's document slots.
pub struct CallMailbox {
    store: Arc<dyn DocumentStore>,
    key: CallKey,
    local: UserId,
    remote: UserId,
    dm_id: ConversationId,
}

impl CallMailbox {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        conversation: &ConversationId,
        local: &UserId,
        remote: &UserId,
    ) -> Self {
        Self {
            store,
            key: CallKey::new(conversation, local, remote),
            local: local.clone(),
            remote: remote.clone(),
            dm_id: conversation.clone(),
        }
    }

    pub fn key(&self) -> &CallKey {
        &self.key
    }

    /// Writes the offer slot.
    pub async fn write_offer(&self, offer: SessionDescription, from_name: &str) -> Result<()> {
        let record = OfferRecord::new(offer, &self.local, &self.remote, from_name, &self.dm_id);
        self.store
            .set(
                COLLECTION_CALLS,
                &self.key.offer_doc(),
                serde_json::to_value(&record)?,
            )
            .await?;
        debug!(key = %self.key, "Offer written");
        Ok(())
    }

    /// Writes the answer slot.
    pub async fn write_answer(&self, answer: AnswerPayload) -> Result<()> {
        let record = AnswerRecord {
            answer,
            from: self.local.clone(),
            to: self.remote.clone(),
            dm_id: self.dm_id.clone(),
            timestamp: now_millis(),
        };
        self.store
            .set(
                COLLECTION_CALLS,
                &self.key.answer_doc(),
                serde_json::to_value(&record)?,
            )
            .await?;
        debug!(key = %self.key, "Answer written");
        Ok(())
    }

    /// Overwrites the local latest-candidate slot.
    pub async fn publish_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let record = CandidateRecord {
            candidate,
            timestamp: now_millis(),
        };
        self.store
            .set(
                COLLECTION_CALLS,
                &self.key.candidate_doc(&self.local),
                serde_json::to_value(&record)?,
            )
            .await
    }

    pub async fn watch_offer(&self) -> Result<DocumentWatcher> {
        self.store
            .watch_document(COLLECTION_CALLS, &self.key.offer_doc())
            .await
    }

    pub async fn watch_answer(&self) -> Result<DocumentWatcher> {
        self.store
            .watch_document(COLLECTION_CALLS, &self.key.answer_doc())
            .await
    }

    /// Watches the remote participant's candidate slot.
    pub async fn watch_remote_candidates(&self) -> Result<DocumentWatcher> {
        self.store
            .watch_document(COLLECTION_CALLS, &self.key.candidate_doc(&self.remote))
            .await
    }

    /// Clears the answer and candidate slots left over from an earlier
    /// session under the same key. Runs before a fresh offer is written; a
    /// stale answer must never be able to complete a new call.
    pub async fn clear_stale(&self) -> Result<()> {
        self.store
            .delete(COLLECTION_CALLS, &self.key.answer_doc())
            .await?;
        self.store
            .delete(COLLECTION_CALLS, &self.key.candidate_doc(&self.local))
            .await?;
        self.store
            .delete(COLLECTION_CALLS, &self.key.candidate_doc(&self.remote))
            .await?;
        Ok(())
    }

    /// Best-effort removal of every session document. Failures are logged
    /// and swallowed; a leftover document is harmless because the next call
    /// under this key overwrites it.
    pub async fn clear_all(&self) {
        for id in [
            self.key.offer_doc(),
            self.key.answer_doc(),
            self.key.candidate_doc(&self.local),
            self.key.candidate_doc(&self.remote),
        ] {
            if let Err(error) = self.store.delete(COLLECTION_CALLS, &id).await {
                warn!(doc = %id, %error, "Failed to clear call document");
            }
        }
        debug!(key = %self.key, "Call documents cleared");
    }

    /// Declines the session: writes the sentinel answer and removes the
    /// offer. Touches no media.
    pub async fn decline(&self) -> Result<()> {
        self.write_answer(AnswerPayload::declined()).await?;
        self.store
            .delete(COLLECTION_CALLS, &self.key.offer_doc())
            .await?;
        Ok(())
    }
}

/// Decodes an offer-slot snapshot. Deletions and malformed payloads both
/// yield `None`.
pub fn decode_offer(snapshot: &DocumentSnapshot) -> Option<OfferRecord> {
    match snapshot.decode() {
        Ok(record) => record,
        Err(error) => {
            debug!(%error, "Ignoring malformed offer document");
            None
        }
    }
}

/// Decodes an answer-slot snapshot the same way.
pub fn decode_answer(snapshot: &DocumentSnapshot) -> Option<AnswerRecord> {
    match snapshot.decode() {
        Ok(record) => record,
        Err(error) => {
            debug!(%error, "Ignoring malformed answer document");
            None
        }
    }
}

/// Decodes a candidate-slot snapshot the same way.
pub fn decode_candidate(snapshot: &DocumentSnapshot) -> Option<CandidateRecord> {
    match snapshot.decode() {
        Ok(record) => record,
        Err(error) => {
            debug!(%error, "Ignoring malformed candidate document");
            None
        }
    }
}
