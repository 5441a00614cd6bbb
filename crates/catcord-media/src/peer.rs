//! Peer-connection seam between the negotiator and the WebRTC stack.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use catcord_shared::{IceCandidate, SessionDescription};

use crate::audio::LocalMedia;
use crate::error::Result;

/// Connection lifecycle states reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerState {
    /// States from which the call can never recover.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

/// Events surfaced by a live peer connection.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A locally gathered connectivity candidate, ready to publish.
    LocalCandidate(IceCandidate),
    /// The transport moved to a new lifecycle state.
    StateChanged(PeerState),
}

/// One side of a negotiated media session.
///
/// `create_offer` and `create_answer` also install the local description,
/// mirroring how the descriptions are always used in pairs.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;
    /// Closes the transport. Errors are logged, not returned; close runs on
    /// every teardown path.
    async fn close(&self);
}

/// Builds peer connections wired to a local media stream. Tests substitute
/// a scripted fake.
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(
        &self,
        media: &LocalMedia,
    ) -> Result<(Arc<dyn PeerConnection>, mpsc::UnboundedReceiver<PeerEvent>)>;
}
