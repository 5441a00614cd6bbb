/// Application name
pub const APP_NAME: &str = "Catcord";

/// Top-level collection holding one profile document per account
pub const COLLECTION_USERS: &str = "users";

/// Top-level collection of community servers
pub const COLLECTION_SERVERS: &str = "servers";

/// Top-level collection of channels (flat, keyed back to servers by field)
pub const COLLECTION_CHANNELS: &str = "channels";

/// Top-level collection of channel messages
pub const COLLECTION_MESSAGES: &str = "messages";

/// Top-level collection of two-member private conversations
pub const COLLECTION_DMS: &str = "privateConversations";

/// Subcollection of messages nested under each private conversation
pub const SUBCOLLECTION_DM_MESSAGES: &str = "messages";

/// Top-level collection of friend requests
pub const COLLECTION_FRIEND_REQUESTS: &str = "friendRequests";

/// Top-level collection used as the call-signaling mailbox
pub const COLLECTION_CALLS: &str = "calls";

/// Blob key prefix for user avatars (`avatars/<uid>`)
pub const BLOB_AVATARS_PREFIX: &str = "avatars";

/// Blob key prefix for server icons (`serverIcons/<serverId>/<ts>_<name>`)
pub const BLOB_SERVER_ICONS_PREFIX: &str = "serverIcons";

/// STUN servers offered to every peer connection
pub const STUN_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Number of digits in a pseudo discriminator (`name#0042`)
pub const DISCRIMINATOR_LEN: usize = 4;

/// Minimum password length accepted at sign-up
pub const MIN_PASSWORD_LEN: usize = 6;

/// Highest code point used to close prefix range queries: every string that
/// starts with `prefix` sorts below `prefix` + this character.
pub const PREFIX_RANGE_CEILING: char = '\u{f8ff}';
