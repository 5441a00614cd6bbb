use thiserror::Error;

/// Errors produced by the platform-services layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error from the embedded document backend.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (blob files, database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A document was not valid JSON or did not fit the expected shape.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The requested record does not exist.
    #[error("Record not found")]
    NotFound,

    /// Sign-up attempted with an email that already has an account.
    #[error("An account already exists for this email")]
    EmailTaken,

    /// Sign-in with an unknown email or a wrong password.
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// Password shorter than the accepted minimum.
    #[error("Password must be at least {0} characters")]
    WeakPassword(usize),

    /// Password hashing or verification failed internally.
    #[error("Password hash error: {0}")]
    PasswordHash(String),

    /// A blob key contained an empty, absolute, or parent-traversing segment.
    #[error("Invalid blob key: {0}")]
    InvalidBlobKey(String),

    /// A shared handle was poisoned by a panicking writer.
    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
