use thiserror::Error;

use catcord_media::CallError;
use catcord_store::StoreError;

/// Errors surfaced by the application layer.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The operation needs a signed-in account.
    #[error("Not signed in")]
    NotSignedIn,

    /// The acting user lacks the role the operation requires.
    #[error("Permission denied: {0}")]
    PermissionDenied(&'static str),

    /// No profile matched a pseudo or email lookup.
    #[error("No user matches \"{0}\"")]
    UserNotFound(String),

    #[error("Cannot send a friend request to yourself")]
    SelfFriendRequest,

    #[error("Already friends with this user")]
    AlreadyFriends,

    #[error("A friend request between these users is already pending")]
    RequestAlreadyPending,

    /// The owner stays on their server until it is deleted.
    #[error("The owner cannot leave their own server")]
    OwnerCannotLeave,

    #[error("Message is empty")]
    EmptyMessage,

    /// An invite response targeted a plain message.
    #[error("Message is not an invite")]
    NotAnInvite,

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Call error: {0}")]
    Call(#[from] CallError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;
