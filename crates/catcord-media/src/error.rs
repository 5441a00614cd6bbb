use catcord_store::StoreError;
use thiserror::Error;

/// Errors produced while setting up or running a call.
#[derive(Error, Debug)]
pub enum CallError {
    /// A call is already claimed for this conversation.
    #[error("A call is already active for this conversation")]
    AlreadyInCall,

    /// Microphone permission was refused or the capture stream failed.
    #[error("Microphone access denied: {0}")]
    MediaAccessDenied(String),

    /// No usable audio device on this machine.
    #[error("Audio device unavailable: {0}")]
    MediaUnavailable(String),

    /// Reading or writing the signaling mailbox failed.
    #[error("Signaling error: {0}")]
    Signaling(#[from] StoreError),

    /// The peer-connection stack rejected an operation.
    #[error("WebRTC error: {0}")]
    Peer(String),

    /// A shared handle was poisoned by a panicking holder.
    #[error("Call registry lock poisoned")]
    LockPoisoned,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CallError>;
