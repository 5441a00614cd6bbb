//! Authentication contract plus the self-hosted account backend.

use std::collections::HashMap;
use std::sync::Mutex;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use catcord_shared::constants::MIN_PASSWORD_LEN;
use catcord_shared::UserId;

use crate::error::{Result, StoreError};

/// A signed-in account as seen by the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub uid: UserId,
    pub email: String,
}

/// Contract of the hosted authentication service.
///
/// Session state is observable through a `watch` channel so the client can
/// swap screens when an account signs in or out, the same way the desktop
/// shell reacts to auth-state callbacks.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Create an account and sign it in.
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser>;

    /// Sign an existing account in.
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser>;

    /// Drop the current session.
    async fn sign_out(&self) -> Result<()>;

    /// The session at this instant.
    fn current_user(&self) -> Option<AuthUser>;

    /// Observe session changes; the receiver always holds the latest value.
    fn watch_session(&self) -> watch::Receiver<Option<AuthUser>>;
}

/// Self-hosted account backend keeping Argon2id hashes in memory.
pub struct LocalAuth {
    accounts: Mutex<HashMap<String, AccountRecord>>,
    session: watch::Sender<Option<AuthUser>>,
}

struct AccountRecord {
    uid: UserId,
    password_hash: String,
}

impl LocalAuth {
    pub fn new() -> Self {
        let (session, _) = watch::channel(None);
        Self {
            accounts: Mutex::new(HashMap::new()),
            session,
        }
    }
}

impl Default for LocalAuth {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthService for LocalAuth {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(StoreError::WeakPassword(MIN_PASSWORD_LEN));
        }
        let email = email.trim().to_lowercase();
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| StoreError::PasswordHash(e.to_string()))?
            .to_string();

        let mut accounts = self.accounts.lock().map_err(|_| StoreError::LockPoisoned)?;
        if accounts.contains_key(&email) {
            return Err(StoreError::EmailTaken);
        }
        let uid = UserId::new(Uuid::new_v4().simple().to_string());
        accounts.insert(
            email.clone(),
            AccountRecord {
                uid: uid.clone(),
                password_hash: hash,
            },
        );
        drop(accounts);

        let user = AuthUser { uid, email };
        info!(uid = %user.uid, "account created");
        self.session.send_replace(Some(user.clone()));
        Ok(user)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser> {
        let email = email.trim().to_lowercase();
        let accounts = self.accounts.lock().map_err(|_| StoreError::LockPoisoned)?;
        let record = accounts.get(&email).ok_or(StoreError::InvalidCredentials)?;
        let parsed = PasswordHash::new(&record.password_hash)
            .map_err(|e| StoreError::PasswordHash(e.to_string()))?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| StoreError::InvalidCredentials)?;
        let user = AuthUser {
            uid: record.uid.clone(),
            email,
        };
        drop(accounts);

        info!(uid = %user.uid, "signed in");
        self.session.send_replace(Some(user.clone()));
        Ok(user)
    }

    async fn sign_out(&self) -> Result<()> {
        self.session.send_replace(None);
        Ok(())
    }

    fn current_user(&self) -> Option<AuthUser> {
        self.session.borrow().clone()
    }

    fn watch_session(&self) -> watch::Receiver<Option<AuthUser>> {
        self.session.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_up_then_in() {
        let auth = LocalAuth::new();
        let created = auth.sign_up("Alice@Example.com", "hunter22").await.unwrap();
        assert_eq!(created.email, "alice@example.com");

        auth.sign_out().await.unwrap();
        let back = auth.sign_in("alice@example.com", "hunter22").await.unwrap();
        assert_eq!(back.uid, created.uid);
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let auth = LocalAuth::new();
        auth.sign_up("a@b.c", "secret1").await.unwrap();
        let err = auth.sign_in("a@b.c", "secret2").await;
        assert!(matches!(err, Err(StoreError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let auth = LocalAuth::new();
        auth.sign_up("a@b.c", "secret1").await.unwrap();
        let err = auth.sign_up("a@b.c", "other-pass").await;
        assert!(matches!(err, Err(StoreError::EmailTaken)));
    }

    #[tokio::test]
    async fn short_password_is_rejected() {
        let auth = LocalAuth::new();
        let err = auth.sign_up("a@b.c", "12345").await;
        assert!(matches!(err, Err(StoreError::WeakPassword(_))));
    }

    #[tokio::test]
    async fn session_watch_tracks_sign_out() {
        let auth = LocalAuth::new();
        let mut session = auth.watch_session();
        assert!(session.borrow().is_none());

        auth.sign_up("a@b.c", "secret1").await.unwrap();
        session.changed().await.unwrap();
        assert!(session.borrow().is_some());

        auth.sign_out().await.unwrap();
        session.changed().await.unwrap();
        assert!(session.borrow().is_none());
        assert!(auth.current_user().is_none());
    }
}
