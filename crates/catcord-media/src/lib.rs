//! # catcord-media
//!
//! One-to-one voice calls over the document store. The store is the only
//! signaling channel: each call session owns a handful of well-known
//! document slots (offer, answer, one candidate slot per participant) and
//! the two sides converge by watching each other's writes.
//!
//! [`CallNegotiator`] drives a call end to end; [`IncomingCallWatcher`]
//! turns offer documents addressed to the local user into ring alerts. The
//! WebRTC transport and microphone capture sit behind the [`PeerFactory`]
//! and [`MediaSource`] seams so the state machine tests run against fakes.

pub mod audio;
pub mod buffer;
pub mod codec;
pub mod mailbox;
pub mod negotiator;
pub mod notify;
pub mod peer;
pub mod registry;
pub mod webrtc_peer;

mod error;

pub use audio::{AudioConfig, CpalSource, LocalMedia, MediaSource};
pub use buffer::GatedQueue;
pub use error::{CallError, Result};
pub use mailbox::{
    AnswerPayload, AnswerRecord, CallKey, CallMailbox, CandidateRecord, IncomingCall, OfferRecord,
};
pub use negotiator::{CallHandle, CallNegotiator, CallState, EndReason, Participant};
pub use notify::{CallAlert, IncomingCallWatcher};
pub use peer::{PeerConnection, PeerEvent, PeerFactory, PeerState};
pub use registry::{CallClaim, CallRegistry};
pub use webrtc_peer::RtcPeerFactory;
