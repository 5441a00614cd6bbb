//! The call state machine.
//!
//! One negotiator drives one call from initiation or acceptance to a
//! terminal state. Each live call is a single task owning the peer
//! connection, the mailbox subscriptions and the microphone claim, and
//! multiplexing all of them; the handle it returns is the only way in.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use catcord_shared::{ConversationId, IceCandidate, SessionDescription, UserId};
use catcord_store::{DocumentSnapshot, DocumentStore, DocumentWatcher};

use crate::audio::{LocalMedia, MediaSource};
use crate::buffer::GatedQueue;
use crate::error::Result;
use crate::mailbox::{self, AnswerPayload, CallMailbox, IncomingCall};
use crate::peer::{PeerConnection, PeerEvent, PeerFactory};
use crate::registry::{CallClaim, CallRegistry};

/// The local user as written into an offer record.
#[derive(Debug, Clone)]
pub struct Participant {
    pub uid: UserId,
    pub display_name: String,
}

/// Externally observable call lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallState {
    /// Initiator side: media acquired, offer out, waiting for the answer.
    Connecting,
    /// Receiver side: subscribed and expecting the offer.
    Waiting,
    /// Remote description set; media is flowing.
    InCall,
    /// Terminal, with the reason the call ended.
    Ended(EndReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    HungUp,
    Declined,
    /// A mutual-call collision was resolved in favor of the other side.
    AlreadyBeingCalled,
    ConnectionLost,
    /// Signaling or negotiation failed after the call was underway.
    SetupFailed,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::HungUp => "hung up",
            Self::Declined => "declined",
            Self::AlreadyBeingCalled => "already being called",
            Self::ConnectionLost => "connection lost",
            Self::SetupFailed => "call setup failed",
        };
        f.write_str(text)
    }
}

enum CallCommand {
    Hangup,
}

/// Handle to a live call. Dropping it hangs up.
#[derive(Debug)]
pub struct CallHandle {
    state_rx: watch::Receiver<CallState>,
    cmd_tx: mpsc::UnboundedSender<CallCommand>,
    media: Arc<LocalMedia>,
}

impl CallHandle {
    /// Watchable call state; the current value is readable immediately.
    pub fn state(&self) -> watch::Receiver<CallState> {
        self.state_rx.clone()
    }

    pub fn current_state(&self) -> CallState {
        self.state_rx.borrow().clone()
    }

    pub fn set_muted(&self, muted: bool) {
        self.media.set_muted(muted);
    }

    pub fn is_muted(&self) -> bool {
        self.media.is_muted()
    }

    /// Ends the call. Idempotent; dropping the handle has the same effect.
    pub fn hangup(&self) {
        let _ = self.cmd_tx.send(CallCommand::Hangup);
    }
}

/// Entry point for placing and answering calls.
#[derive(Clone)]
pub struct CallNegotiator {
    store: Arc<dyn DocumentStore>,
    peers: Arc<dyn PeerFactory>,
    media: Arc<dyn MediaSource>,
    registry: CallRegistry,
}

impl CallNegotiator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        peers: Arc<dyn PeerFactory>,
        media: Arc<dyn MediaSource>,
        registry: CallRegistry,
    ) -> Self {
        Self {
            store,
            peers,
            media,
            registry,
        }
    }

    /// Places a call to `remote` in the given conversation.
    ///
    /// Acquires the microphone, writes a fresh offer into the mailbox and
    /// returns a handle whose state starts at [`CallState::Connecting`].
    /// Media denial, a live call in the same conversation and signaling
    /// failures are returned as errors; nothing is retried.
    pub async fn initiate(
        &self,
        conversation: &ConversationId,
        local: &Participant,
        remote: &UserId,
    ) -> Result<CallHandle> {
        let claim = self.registry.claim(conversation)?;
        let media = Arc::new(self.media.acquire().await?);
        let mailbox = CallMailbox::new(
            Arc::clone(&self.store),
            conversation,
            &local.uid,
            remote,
        );

        let (peer, peer_events) = self.peers.create(&media).await?;
        let (offer_watch, answer_watch, candidate_watch) =
            match prepare_initiator(&mailbox, peer.as_ref(), &local.display_name).await {
                Ok(watches) => watches,
                Err(error) => {
                    peer.close().await;
                    return Err(error);
                }
            };

        info!(conversation = %conversation, remote = %remote, "Call initiated");

        Ok(spawn_call(
            CallTask {
                role: Role::Initiator,
                mailbox,
                media,
                peer,
                peer_events,
                offer_watch,
                answer_watch: Some(answer_watch),
                candidate_watch,
                claim,
                local_uid: local.uid.clone(),
                remote_uid: remote.clone(),
            },
            CallState::Connecting,
        ))
    }

    /// Answers an inbound offer captured by the notification watcher.
    ///
    /// The handle starts at [`CallState::Waiting`]; the offer slot is read
    /// through its own subscription, so a ring accepted moments after the
    /// offer was written still converges.
    pub async fn accept(&self, call: IncomingCall) -> Result<CallHandle> {
        let conversation = call.offer.dm_id.clone();
        let local_uid = call.offer.to.clone();
        let remote_uid = call.offer.from.clone();

        let claim = self.registry.claim(&conversation)?;
        let media = Arc::new(self.media.acquire().await?);
        let mailbox = CallMailbox::new(
            Arc::clone(&self.store),
            &conversation,
            &local_uid,
            &remote_uid,
        );

        let (peer, peer_events) = self.peers.create(&media).await?;
        let (offer_watch, candidate_watch) = match prepare_receiver(&mailbox).await {
            Ok(watches) => watches,
            Err(error) => {
                peer.close().await;
                return Err(error);
            }
        };

        info!(conversation = %conversation, remote = %remote_uid, "Answering call");

        Ok(spawn_call(
            CallTask {
                role: Role::Receiver,
                mailbox,
                media,
                peer,
                peer_events,
                offer_watch,
                answer_watch: None,
                candidate_watch,
                claim,
                local_uid,
                remote_uid,
            },
            CallState::Waiting,
        ))
    }

    /// Declines an inbound offer without touching media or spinning up a
    /// call task.
    pub async fn decline(&self, call: &IncomingCall) -> Result<()> {
        let mailbox = CallMailbox::new(
            Arc::clone(&self.store),
            &call.offer.dm_id,
            &call.offer.to,
            &call.offer.from,
        );
        mailbox.decline().await?;
        info!(conversation = %call.offer.dm_id, "Call declined");
        Ok(())
    }
}

async fn prepare_initiator(
    mailbox: &CallMailbox,
    peer: &dyn PeerConnection,
    display_name: &str,
) -> Result<(DocumentWatcher, DocumentWatcher, DocumentWatcher)> {
    let offer = peer.create_offer().await?;
    // A stale answer or candidate under this key could complete the new
    // call with the previous session's descriptions.
    mailbox.clear_stale().await?;
    mailbox.write_offer(offer, display_name).await?;
    Ok((
        mailbox.watch_offer().await?,
        mailbox.watch_answer().await?,
        mailbox.watch_remote_candidates().await?,
    ))
}

async fn prepare_receiver(
    mailbox: &CallMailbox,
) -> Result<(DocumentWatcher, DocumentWatcher)> {
    Ok((
        mailbox.watch_offer().await?,
        mailbox.watch_remote_candidates().await?,
    ))
}

#[derive(Clone, Copy)]
enum Role {
    Initiator,
    Receiver,
}

struct CallTask {
    role: Role,
    mailbox: CallMailbox,
    media: Arc<LocalMedia>,
    peer: Arc<dyn PeerConnection>,
    peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    offer_watch: DocumentWatcher,
    answer_watch: Option<DocumentWatcher>,
    candidate_watch: DocumentWatcher,
    claim: CallClaim,
    local_uid: UserId,
    remote_uid: UserId,
}

fn spawn_call(task: CallTask, initial: CallState) -> CallHandle {
    let (state_tx, state_rx) = watch::channel(initial);
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let media = Arc::clone(&task.media);
    tokio::spawn(run_call(task, state_tx, cmd_rx));
    CallHandle {
        state_rx,
        cmd_tx,
        media,
    }
}

async fn run_call(
    mut task: CallTask,
    state_tx: watch::Sender<CallState>,
    mut cmd_rx: mpsc::UnboundedReceiver<CallCommand>,
) {
    let mut candidates: GatedQueue<IceCandidate> = GatedQueue::new();
    let mut remote_description_set = false;
    let mut answered = false;

    let reason = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                // A dropped handle closes the channel; same as hanging up.
                Some(CallCommand::Hangup) | None => {
                    debug!("Hangup requested");
                    break EndReason::HungUp;
                }
            },

            event = task.peer_events.recv() => match event {
                Some(PeerEvent::LocalCandidate(candidate)) => {
                    if let Err(error) = task.mailbox.publish_candidate(candidate).await {
                        warn!(%error, "Failed to publish local candidate");
                    }
                }
                Some(PeerEvent::StateChanged(state)) => {
                    if state.is_terminal() {
                        break EndReason::ConnectionLost;
                    }
                }
                None => break EndReason::ConnectionLost,
            },

            snapshot = task.offer_watch.next() => {
                let Some(snapshot) = snapshot else {
                    break EndReason::ConnectionLost;
                };
                if let Some(record) = mailbox::decode_offer(&snapshot) {
                    let inbound =
                        record.from == task.remote_uid && record.to == task.local_uid;
                    match task.role {
                        Role::Initiator => {
                            if inbound {
                                info!("Remote side is already calling, yielding to their offer");
                                break EndReason::AlreadyBeingCalled;
                            }
                        }
                        Role::Receiver => {
                            if !inbound || answered {
                                debug!("Ignoring redundant offer snapshot");
                            } else {
                                match answer_offer(&task, record.offer, &mut candidates).await {
                                    Ok(()) => {
                                        remote_description_set = true;
                                        answered = true;
                                        state_tx.send_replace(CallState::InCall);
                                        info!("Call connected");
                                    }
                                    Err(error) => {
                                        warn!(%error, "Failed to answer offer");
                                        break EndReason::SetupFailed;
                                    }
                                }
                            }
                        }
                    }
                }
            },

            snapshot = next_watch(task.answer_watch.as_mut()) => {
                let Some(snapshot) = snapshot else {
                    break EndReason::ConnectionLost;
                };
                match read_answer(&snapshot) {
                    Some(AnswerPayload::Sentinel(_)) => {
                        info!("Call declined by remote");
                        break EndReason::Declined;
                    }
                    Some(AnswerPayload::Session(desc)) => {
                        if remote_description_set {
                            debug!("Ignoring duplicate answer snapshot");
                        } else {
                            match apply_remote_description(&task, desc, &mut candidates).await {
                                Ok(()) => {
                                    remote_description_set = true;
                                    state_tx.send_replace(CallState::InCall);
                                    info!("Call connected");
                                }
                                Err(error) => {
                                    warn!(%error, "Failed to apply remote answer");
                                    break EndReason::SetupFailed;
                                }
                            }
                        }
                    }
                    None => {}
                }
            },

            snapshot = task.candidate_watch.next() => {
                let Some(snapshot) = snapshot else {
                    break EndReason::ConnectionLost;
                };
                if let Some(record) = mailbox::decode_candidate(&snapshot) {
                    match candidates.push(record.candidate) {
                        Some(candidate) => {
                            if let Err(error) = task.peer.add_ice_candidate(candidate).await {
                                warn!(%error, "Failed to add remote candidate");
                            }
                        }
                        None => {
                            debug!("Buffered candidate until the remote description is set");
                        }
                    }
                }
            },
        }
    };

    finish_call(task, reason, &state_tx).await;
}

async fn next_watch(watch: Option<&mut DocumentWatcher>) -> Option<DocumentSnapshot> {
    match watch {
        Some(watch) => watch.next().await,
        None => std::future::pending().await,
    }
}

fn read_answer(snapshot: &DocumentSnapshot) -> Option<AnswerPayload> {
    mailbox::decode_answer(snapshot).map(|record| record.answer)
}

/// Sets the remote description and flushes every buffered candidate in
/// arrival order. Per-candidate failures are logged, never fatal.
async fn apply_remote_description(
    task: &CallTask,
    desc: SessionDescription,
    candidates: &mut GatedQueue<IceCandidate>,
) -> Result<()> {
    task.peer.set_remote_description(desc).await?;
    for candidate in candidates.open() {
        if let Err(error) = task.peer.add_ice_candidate(candidate).await {
            warn!(%error, "Failed to add buffered candidate");
        }
    }
    Ok(())
}

async fn answer_offer(
    task: &CallTask,
    offer: SessionDescription,
    candidates: &mut GatedQueue<IceCandidate>,
) -> Result<()> {
    apply_remote_description(task, offer, candidates).await?;
    let answer = task.peer.create_answer().await?;
    task.mailbox
        .write_answer(AnswerPayload::Session(answer))
        .await?;
    Ok(())
}

async fn finish_call(task: CallTask, reason: EndReason, state_tx: &watch::Sender<CallState>) {
    info!(%reason, "Call ended");
    task.peer.close().await;

    let CallTask {
        mailbox,
        media,
        claim,
        offer_watch,
        answer_watch,
        candidate_watch,
        ..
    } = task;

    // Cancel the mailbox subscriptions before touching the documents.
    drop(offer_watch);
    drop(answer_watch);
    drop(candidate_watch);

    media.release();

    if reason == EndReason::AlreadyBeingCalled {
        // Yielding leaves the mailbox alone: clearing it would tear down
        // the inbound call that just rang.
        debug!("Yielded to inbound offer, mailbox left intact");
    } else {
        mailbox.clear_all().await;
    }

    drop(claim);
    state_tx.send_replace(CallState::Ended(reason));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::{sleep, timeout};

    use catcord_shared::constants::COLLECTION_CALLS;
    use catcord_store::LocalStore;

    use crate::audio::AudioConfig;
    use crate::error::CallError;
    use crate::mailbox::{AnswerRecord, CallKey, CandidateRecord, OfferRecord};
    use crate::peer::PeerState;

    struct FakePeer {
        ops: Mutex<Vec<String>>,
        events: mpsc::UnboundedSender<PeerEvent>,
    }

    impl FakePeer {
        fn ops(&self) -> Vec<String> {
            self.ops.lock().unwrap().clone()
        }

        fn emit(&self, event: PeerEvent) {
            let _ = self.events.send(event);
        }

        fn push(&self, op: impl Into<String>) {
            self.ops.lock().unwrap().push(op.into());
        }
    }

    #[async_trait]
    impl PeerConnection for FakePeer {
        async fn create_offer(&self) -> Result<SessionDescription> {
            self.push("create_offer");
            Ok(SessionDescription::offer("v=0 fake-offer"))
        }

        async fn create_answer(&self) -> Result<SessionDescription> {
            self.push("create_answer");
            Ok(SessionDescription::answer("v=0 fake-answer"))
        }

        async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
            self.push(format!("set_remote:{}", desc.kind));
            Ok(())
        }

        async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
            self.push(format!("add_ice:{}", candidate.candidate));
            Ok(())
        }

        async fn close(&self) {
            self.push("close");
        }
    }

    #[derive(Default)]
    struct FakePeerFactory {
        peers: Mutex<Vec<Arc<FakePeer>>>,
    }

    impl FakePeerFactory {
        fn created(&self) -> Vec<Arc<FakePeer>> {
            self.peers.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PeerFactory for FakePeerFactory {
        async fn create(
            &self,
            _media: &LocalMedia,
        ) -> Result<(Arc<dyn PeerConnection>, mpsc::UnboundedReceiver<PeerEvent>)> {
            let (tx, rx) = mpsc::unbounded_channel();
            let peer = Arc::new(FakePeer {
                ops: Mutex::new(Vec::new()),
                events: tx,
            });
            self.peers.lock().unwrap().push(Arc::clone(&peer));
            Ok((peer as Arc<dyn PeerConnection>, rx))
        }
    }

    #[derive(Default)]
    struct FakeMediaSource {
        deny: bool,
        acquired: Mutex<Vec<Arc<AtomicBool>>>,
    }

    impl FakeMediaSource {
        fn denying() -> Self {
            Self {
                deny: true,
                ..Default::default()
            }
        }

        fn acquired(&self) -> Vec<Arc<AtomicBool>> {
            self.acquired.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MediaSource for FakeMediaSource {
        async fn acquire(&self) -> Result<LocalMedia> {
            if self.deny {
                return Err(CallError::MediaAccessDenied("denied by test".to_string()));
            }
            let active = Arc::new(AtomicBool::new(true));
            let muted = Arc::new(AtomicBool::new(false));
            let (_tx, rx) = mpsc::channel(4);
            self.acquired.lock().unwrap().push(Arc::clone(&active));
            Ok(LocalMedia::new(AudioConfig::default(), active, muted, rx))
        }
    }

    struct Rig {
        negotiator: CallNegotiator,
        peers: Arc<FakePeerFactory>,
        media: Arc<FakeMediaSource>,
    }

    fn rig_on(store: Arc<dyn DocumentStore>) -> Rig {
        let peers = Arc::new(FakePeerFactory::default());
        let media = Arc::new(FakeMediaSource::default());
        let negotiator = CallNegotiator::new(
            store,
            Arc::clone(&peers) as Arc<dyn PeerFactory>,
            Arc::clone(&media) as Arc<dyn MediaSource>,
            CallRegistry::new(),
        );
        Rig {
            negotiator,
            peers,
            media,
        }
    }

    fn alice() -> Participant {
        Participant {
            uid: UserId::new("alice"),
            display_name: "Alice".to_string(),
        }
    }

    fn bob() -> Participant {
        Participant {
            uid: UserId::new("bob"),
            display_name: "Bob".to_string(),
        }
    }

    fn dm() -> ConversationId {
        ConversationId::new("dm-alice-bob")
    }

    fn call_key() -> CallKey {
        CallKey::new(&dm(), &alice().uid, &bob().uid)
    }

    async fn read_offer(store: &Arc<dyn DocumentStore>) -> (String, OfferRecord) {
        let doc = store
            .get(COLLECTION_CALLS, &call_key().offer_doc())
            .await
            .unwrap()
            .expect("offer doc should exist");
        let record = doc.decode().unwrap();
        (doc.id, record)
    }

    async fn wait_until(
        handle: &CallHandle,
        pred: impl FnMut(&CallState) -> bool,
    ) -> CallState {
        let mut rx = handle.state();
        let state = timeout(Duration::from_secs(2), rx.wait_for(pred))
            .await
            .expect("timed out waiting for call state")
            .expect("call task dropped the state channel");
        state.clone()
    }

    #[tokio::test]
    async fn caller_and_callee_reach_in_call() {
        let store: Arc<dyn DocumentStore> = Arc::new(LocalStore::open_in_memory().unwrap());
        let caller = rig_on(Arc::clone(&store));
        let callee = rig_on(Arc::clone(&store));

        let x = caller
            .negotiator
            .initiate(&dm(), &alice(), &bob().uid)
            .await
            .unwrap();
        assert_eq!(x.current_state(), CallState::Connecting);

        let (doc_id, offer) = read_offer(&store).await;
        assert_eq!(offer.from, alice().uid);
        assert_eq!(offer.to, bob().uid);
        assert_eq!(offer.from_name, "Alice");

        let y = callee
            .negotiator
            .accept(IncomingCall { doc_id, offer })
            .await
            .unwrap();

        wait_until(&y, |s| matches!(s, CallState::InCall)).await;
        wait_until(&x, |s| matches!(s, CallState::InCall)).await;

        let answer_doc = store
            .get(COLLECTION_CALLS, &call_key().answer_doc())
            .await
            .unwrap()
            .expect("answer doc should exist");
        let answer: AnswerRecord = answer_doc.decode().unwrap();
        assert_eq!(answer.from, bob().uid);
        assert!(answer.answer.session().is_some());
    }

    #[tokio::test]
    async fn decline_ends_the_caller_with_declined() {
        let store: Arc<dyn DocumentStore> = Arc::new(LocalStore::open_in_memory().unwrap());
        let caller = rig_on(Arc::clone(&store));
        let callee = rig_on(Arc::clone(&store));

        let x = caller
            .negotiator
            .initiate(&dm(), &alice(), &bob().uid)
            .await
            .unwrap();
        let (doc_id, offer) = read_offer(&store).await;
        callee
            .negotiator
            .decline(&IncomingCall { doc_id, offer })
            .await
            .unwrap();

        let ended = wait_until(&x, |s| matches!(s, CallState::Ended(_))).await;
        assert_eq!(ended, CallState::Ended(EndReason::Declined));

        // Declining touched no media and created no peer on the callee.
        assert!(callee.media.acquired().is_empty());
        assert!(callee.peers.created().is_empty());

        // The caller never applied a remote description.
        let ops = caller.peers.created()[0].ops();
        assert!(!ops.iter().any(|op| op.starts_with("set_remote")));
        assert!(ops.contains(&"close".to_string()));
    }

    #[tokio::test]
    async fn candidates_buffered_until_remote_description() {
        let store: Arc<dyn DocumentStore> = Arc::new(LocalStore::open_in_memory().unwrap());
        let callee = rig_on(Arc::clone(&store));

        // Bob accepts a ring whose offer has not reached the mailbox yet.
        let early = OfferRecord::new(
            SessionDescription::offer("v=0 early"),
            &alice().uid,
            &bob().uid,
            "Alice",
            &dm(),
        );
        let handle = callee
            .negotiator
            .accept(IncomingCall {
                doc_id: call_key().offer_doc(),
                offer: early,
            })
            .await
            .unwrap();
        assert_eq!(handle.current_state(), CallState::Waiting);

        // Three candidates arrive from Alice before her offer document.
        let remote = CallMailbox::new(Arc::clone(&store), &dm(), &alice().uid, &bob().uid);
        for name in ["c1", "c2", "c3"] {
            remote
                .publish_candidate(IceCandidate::new(name))
                .await
                .unwrap();
        }
        sleep(Duration::from_millis(50)).await;

        remote
            .write_offer(SessionDescription::offer("v=0 real"), "Alice")
            .await
            .unwrap();
        wait_until(&handle, |s| matches!(s, CallState::InCall)).await;

        // Candidates were applied after the remote description, in order.
        let ops = callee.peers.created()[0].ops();
        assert_eq!(
            ops,
            vec![
                "set_remote:offer",
                "add_ice:c1",
                "add_ice:c2",
                "add_ice:c3",
                "create_answer"
            ]
        );
    }

    #[tokio::test]
    async fn mutual_initiation_resolves_to_one_session() {
        let store: Arc<dyn DocumentStore> = Arc::new(LocalStore::open_in_memory().unwrap());
        let side_x = rig_on(Arc::clone(&store));
        let side_y = rig_on(Arc::clone(&store));

        let x = side_x
            .negotiator
            .initiate(&dm(), &alice(), &bob().uid)
            .await
            .unwrap();
        let y = side_y
            .negotiator
            .initiate(&dm(), &bob(), &alice().uid)
            .await
            .unwrap();

        // Alice yields to Bob's inbound offer: receiver role wins.
        let ended = wait_until(&x, |s| matches!(s, CallState::Ended(_))).await;
        assert_eq!(ended, CallState::Ended(EndReason::AlreadyBeingCalled));
        assert_eq!(y.current_state(), CallState::Connecting);

        // Yielding must not clear the surviving offer.
        let (doc_id, offer) = read_offer(&store).await;
        assert_eq!(offer.from, bob().uid);

        // Alice answers the ring; exactly one session reaches in-call.
        let x2 = side_x
            .negotiator
            .accept(IncomingCall { doc_id, offer })
            .await
            .unwrap();
        wait_until(&x2, |s| matches!(s, CallState::InCall)).await;
        wait_until(&y, |s| matches!(s, CallState::InCall)).await;
    }

    #[tokio::test]
    async fn second_call_in_same_conversation_is_rejected() {
        let store: Arc<dyn DocumentStore> = Arc::new(LocalStore::open_in_memory().unwrap());
        let rig = rig_on(store);

        let _x = rig
            .negotiator
            .initiate(&dm(), &alice(), &bob().uid)
            .await
            .unwrap();
        let err = rig
            .negotiator
            .initiate(&dm(), &alice(), &bob().uid)
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::AlreadyInCall));
    }

    #[tokio::test]
    async fn media_denial_fails_initiation_cleanly() {
        let store: Arc<dyn DocumentStore> = Arc::new(LocalStore::open_in_memory().unwrap());
        let registry = CallRegistry::new();
        let negotiator = CallNegotiator::new(
            Arc::clone(&store),
            Arc::new(FakePeerFactory::default()),
            Arc::new(FakeMediaSource::denying()),
            registry.clone(),
        );

        let err = negotiator
            .initiate(&dm(), &alice(), &bob().uid)
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::MediaAccessDenied(_)));

        // The claim is released and nothing reached the mailbox.
        assert!(!registry.is_active(&dm()));
        assert!(store
            .get(COLLECTION_CALLS, &call_key().offer_doc())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn hangup_releases_media_subscriptions_and_documents() {
        let local = LocalStore::open_in_memory().unwrap();
        let store: Arc<dyn DocumentStore> = Arc::new(local.clone());
        let caller = rig_on(Arc::clone(&store));
        let callee = rig_on(Arc::clone(&store));

        let x = caller
            .negotiator
            .initiate(&dm(), &alice(), &bob().uid)
            .await
            .unwrap();
        let (doc_id, offer) = read_offer(&store).await;
        let y = callee
            .negotiator
            .accept(IncomingCall { doc_id, offer })
            .await
            .unwrap();
        wait_until(&x, |s| matches!(s, CallState::InCall)).await;

        x.hangup();
        let ended = wait_until(&x, |s| matches!(s, CallState::Ended(_))).await;
        assert_eq!(ended, CallState::Ended(EndReason::HungUp));

        // Microphone released, peer closed, session documents cleared.
        assert!(!caller.media.acquired()[0].load(Ordering::Relaxed));
        assert!(caller.peers.created()[0].ops().contains(&"close".to_string()));
        let key = call_key();
        assert!(store
            .get(COLLECTION_CALLS, &key.offer_doc())
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get(COLLECTION_CALLS, &key.answer_doc())
            .await
            .unwrap()
            .is_none());

        // Dropping the other handle tears its subscriptions down too.
        drop(y);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(local.watcher_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_answer_snapshots_apply_once() {
        let store: Arc<dyn DocumentStore> = Arc::new(LocalStore::open_in_memory().unwrap());
        let caller = rig_on(Arc::clone(&store));
        let callee = rig_on(Arc::clone(&store));

        let x = caller
            .negotiator
            .initiate(&dm(), &alice(), &bob().uid)
            .await
            .unwrap();
        let (doc_id, offer) = read_offer(&store).await;
        let _y = callee
            .negotiator
            .accept(IncomingCall { doc_id, offer })
            .await
            .unwrap();
        wait_until(&x, |s| matches!(s, CallState::InCall)).await;

        // A redundant rewrite of the same answer delivers a new snapshot.
        let answer_id = call_key().answer_doc();
        let doc = store
            .get(COLLECTION_CALLS, &answer_id)
            .await
            .unwrap()
            .unwrap();
        store
            .set(COLLECTION_CALLS, &answer_id, doc.data.clone())
            .await
            .unwrap();
        sleep(Duration::from_millis(50)).await;

        let ops = caller.peers.created()[0].ops();
        assert_eq!(
            ops.iter().filter(|op| op.starts_with("set_remote")).count(),
            1
        );
        assert_eq!(x.current_state(), CallState::InCall);
    }

    #[tokio::test]
    async fn transport_failure_surfaces_connection_lost() {
        let store: Arc<dyn DocumentStore> = Arc::new(LocalStore::open_in_memory().unwrap());
        let caller = rig_on(store);

        let x = caller
            .negotiator
            .initiate(&dm(), &alice(), &bob().uid)
            .await
            .unwrap();
        caller.peers.created()[0].emit(PeerEvent::StateChanged(PeerState::Failed));

        let ended = wait_until(&x, |s| matches!(s, CallState::Ended(_))).await;
        assert_eq!(ended, CallState::Ended(EndReason::ConnectionLost));
    }

    #[tokio::test]
    async fn local_candidates_are_published_to_the_mailbox() {
        let store: Arc<dyn DocumentStore> = Arc::new(LocalStore::open_in_memory().unwrap());
        let caller = rig_on(Arc::clone(&store));

        let _x = caller
            .negotiator
            .initiate(&dm(), &alice(), &bob().uid)
            .await
            .unwrap();
        let peer = &caller.peers.created()[0];

        peer.emit(PeerEvent::LocalCandidate(IceCandidate::new("local-1")));
        sleep(Duration::from_millis(50)).await;

        let slot = call_key().candidate_doc(&alice().uid);
        let doc = store
            .get(COLLECTION_CALLS, &slot)
            .await
            .unwrap()
            .expect("candidate doc should exist");
        let record: CandidateRecord = doc.decode().unwrap();
        assert_eq!(record.candidate.candidate, "local-1");

        // The slot holds only the latest candidate.
        peer.emit(PeerEvent::LocalCandidate(IceCandidate::new("local-2")));
        sleep(Duration::from_millis(50)).await;
        let doc = store
            .get(COLLECTION_CALLS, &slot)
            .await
            .unwrap()
            .expect("candidate doc should exist");
        let record: CandidateRecord = doc.decode().unwrap();
        assert_eq!(record.candidate.candidate, "local-2");
    }
}
