//! Inbound-call notifications.
//!
//! Watches the calls collection for offer documents addressed to the local
//! user and turns result-set churn into ring and withdraw alerts. Each offer
//! document rings exactly once; rewrites of the same document (candidate
//! renegotiation, timestamp refreshes) stay silent until the document
//! disappears and a fresh one lands.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use catcord_shared::constants::COLLECTION_CALLS;
use catcord_shared::UserId;

use catcord_store::{Document, DocumentStore, Filter, Query};

use crate::error::Result;
use crate::mailbox::{IncomingCall, OfferRecord};

/// A change in the set of offers ringing for the local user.
#[derive(Debug, Clone)]
pub enum CallAlert {
    /// A new offer addressed to the local user appeared.
    Ring(IncomingCall),
    /// A ringing offer disappeared before it was accepted here. The caller
    /// hung up, the call was answered on another device, or it was cleared.
    Withdrawn { doc_id: String },
}

/// Stream of [`CallAlert`]s for one signed-in user. Dropping it stops the
/// underlying subscription.
#[derive(Debug)]
pub struct IncomingCallWatcher {
    alerts: mpsc::UnboundedReceiver<CallAlert>,
}

impl IncomingCallWatcher {
    /// Subscribes to offers addressed to `uid` and starts alerting.
    pub async fn start(store: Arc<dyn DocumentStore>, uid: &UserId) -> Result<Self> {
        let query = Query::collection(COLLECTION_CALLS)
            .filter(Filter::eq("type", "offer"))
            .filter(Filter::eq("to", uid.as_str()));
        let mut watch = store.watch_query(&query).await?;

        let (alert_tx, alert_rx) = mpsc::unbounded_channel();
        let uid = uid.clone();
        tokio::spawn(async move {
            let mut ringing: HashSet<String> = HashSet::new();
            loop {
                tokio::select! {
                    docs = watch.next() => {
                        let Some(docs) = docs else { break };
                        process_snapshot(&docs, &uid, &mut ringing, &alert_tx);
                    }
                    _ = alert_tx.closed() => break,
                }
            }
            debug!(uid = %uid, "Call notification watch stopped");
        });

        Ok(Self { alerts: alert_rx })
    }

    /// Next alert; `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<CallAlert> {
        self.alerts.recv().await
    }

    /// Non-blocking variant of [`IncomingCallWatcher::next`].
    pub fn try_next(&mut self) -> Option<CallAlert> {
        self.alerts.try_recv().ok()
    }
}

fn process_snapshot(
    docs: &[Document],
    uid: &UserId,
    ringing: &mut HashSet<String>,
    alert_tx: &mpsc::UnboundedSender<CallAlert>,
) {
    let mut seen: HashSet<String> = HashSet::new();
    for doc in docs {
        let record: OfferRecord = match doc.decode() {
            Ok(record) => record,
            Err(error) => {
                debug!(doc = %doc.id, %error, "Ignoring malformed offer document");
                continue;
            }
        };
        // A self-addressed offer is our own outbound leg; never ring on it.
        if record.from == *uid {
            continue;
        }
        seen.insert(doc.id.clone());
        if ringing.contains(&doc.id) {
            continue;
        }
        info!(from = %record.from, conversation = %record.dm_id, "Incoming call");
        ringing.insert(doc.id.clone());
        let _ = alert_tx.send(CallAlert::Ring(IncomingCall {
            doc_id: doc.id.clone(),
            offer: record,
        }));
    }

    ringing.retain(|id| {
        if seen.contains(id) {
            true
        } else {
            let _ = alert_tx.send(CallAlert::Withdrawn { doc_id: id.clone() });
            false
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::time::{sleep, timeout};

    use catcord_shared::{ConversationId, SessionDescription};
    use catcord_store::LocalStore;

    use crate::mailbox::CallMailbox;

    fn alice() -> UserId {
        UserId::new("alice")
    }

    fn bob() -> UserId {
        UserId::new("bob")
    }

    fn dm() -> ConversationId {
        ConversationId::new("dm-alice-bob")
    }

    fn mailbox_from(store: &Arc<dyn DocumentStore>, from: &UserId, to: &UserId) -> CallMailbox {
        CallMailbox::new(Arc::clone(store), &dm(), from, to)
    }

    async fn next_alert(watcher: &mut IncomingCallWatcher) -> CallAlert {
        timeout(Duration::from_secs(2), watcher.next())
            .await
            .expect("timed out waiting for call alert")
            .expect("alert channel closed")
    }

    #[tokio::test]
    async fn rings_once_per_offer_document() {
        let store: Arc<dyn DocumentStore> = Arc::new(LocalStore::open_in_memory().unwrap());
        let mut watcher = IncomingCallWatcher::start(Arc::clone(&store), &bob())
            .await
            .unwrap();

        let outbound = mailbox_from(&store, &alice(), &bob());
        outbound
            .write_offer(SessionDescription::offer("v=0 one"), "Alice")
            .await
            .unwrap();

        let alert = next_alert(&mut watcher).await;
        let CallAlert::Ring(call) = alert else {
            panic!("expected a ring");
        };
        assert_eq!(call.offer.from, alice());
        assert_eq!(call.offer.from_name, "Alice");

        // Rewriting the same offer document must not ring again.
        outbound
            .write_offer(SessionDescription::offer("v=0 two"), "Alice")
            .await
            .unwrap();
        sleep(Duration::from_millis(50)).await;
        assert!(watcher.try_next().is_none());
    }

    #[tokio::test]
    async fn withdraws_when_the_offer_disappears_and_rerings_on_a_fresh_one() {
        let store: Arc<dyn DocumentStore> = Arc::new(LocalStore::open_in_memory().unwrap());
        let mut watcher = IncomingCallWatcher::start(Arc::clone(&store), &bob())
            .await
            .unwrap();

        let outbound = mailbox_from(&store, &alice(), &bob());
        outbound
            .write_offer(SessionDescription::offer("v=0 first"), "Alice")
            .await
            .unwrap();
        let CallAlert::Ring(call) = next_alert(&mut watcher).await else {
            panic!("expected a ring");
        };

        outbound.clear_all().await;
        let CallAlert::Withdrawn { doc_id } = next_alert(&mut watcher).await else {
            panic!("expected a withdrawal");
        };
        assert_eq!(doc_id, call.doc_id);

        // A fresh offer under the same key rings again.
        outbound
            .write_offer(SessionDescription::offer("v=0 second"), "Alice")
            .await
            .unwrap();
        let CallAlert::Ring(call) = next_alert(&mut watcher).await else {
            panic!("expected a second ring");
        };
        assert_eq!(call.offer.from, alice());
    }

    #[tokio::test]
    async fn ignores_self_addressed_offers() {
        let store: Arc<dyn DocumentStore> = Arc::new(LocalStore::open_in_memory().unwrap());
        let mut watcher = IncomingCallWatcher::start(Arc::clone(&store), &alice())
            .await
            .unwrap();

        // An offer from alice to alice matches the query but is our own leg.
        mailbox_from(&store, &alice(), &alice())
            .write_offer(SessionDescription::offer("v=0 self"), "Alice")
            .await
            .unwrap();
        sleep(Duration::from_millis(50)).await;
        assert!(watcher.try_next().is_none());

        mailbox_from(&store, &bob(), &alice())
            .write_offer(SessionDescription::offer("v=0 real"), "Bob")
            .await
            .unwrap();
        let CallAlert::Ring(call) = next_alert(&mut watcher).await else {
            panic!("expected a ring");
        };
        assert_eq!(call.offer.from, bob());
    }

    #[tokio::test]
    async fn preexisting_offer_rings_immediately() {
        let store: Arc<dyn DocumentStore> = Arc::new(LocalStore::open_in_memory().unwrap());
        mailbox_from(&store, &alice(), &bob())
            .write_offer(SessionDescription::offer("v=0 waiting"), "Alice")
            .await
            .unwrap();

        let mut watcher = IncomingCallWatcher::start(store, &bob()).await.unwrap();
        let CallAlert::Ring(call) = next_alert(&mut watcher).await else {
            panic!("expected a ring");
        };
        assert_eq!(call.offer.to, bob());
    }

    #[tokio::test]
    async fn dropping_the_watcher_cancels_the_subscription() {
        let local = LocalStore::open_in_memory().unwrap();
        let store: Arc<dyn DocumentStore> = Arc::new(local.clone());
        let watcher = IncomingCallWatcher::start(store, &bob()).await.unwrap();
        assert_eq!(local.watcher_count(), 1);

        drop(watcher);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(local.watcher_count(), 0);
    }
}
