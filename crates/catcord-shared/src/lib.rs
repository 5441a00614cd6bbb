//! # catcord-shared
//!
//! Types shared by every Catcord crate: identifiers, presence, the SDP and
//! ICE wire records exchanged through the call-signaling mailbox, and the
//! collection names of the hosted document store.

pub mod constants;
pub mod signal;
pub mod types;

pub use signal::{IceCandidate, SessionDescription};
pub use types::{now_millis, ChannelId, ConversationId, PresenceStatus, ServerId, UserId};
