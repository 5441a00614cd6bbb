//! Account lifecycle: sign-up, sign-in, sign-out.

use std::sync::Arc;

use rand::Rng;
use tokio::sync::watch;
use tracing::info;

use catcord_shared::constants::DISCRIMINATOR_LEN;
use catcord_store::{AuthService, AuthUser};

use crate::error::Result;
use crate::profile::Profiles;

/// Session management plus the profile bootstrap that goes with sign-up.
#[derive(Clone)]
pub struct Sessions {
    auth: Arc<dyn AuthService>,
    profiles: Profiles,
}

impl Sessions {
    pub fn new(auth: Arc<dyn AuthService>, profiles: Profiles) -> Self {
        Self { auth, profiles }
    }

    /// Creates the account and its initial profile document.
    ///
    /// The pseudo starts as the local part of the email address; the
    /// discriminator is drawn at random until the tag is unique.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser> {
        let user = self.auth.sign_up(email, password).await?;
        let pseudo = match user.email.split('@').next() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => user.email.clone(),
        };
        let discriminator = self.free_discriminator(&pseudo).await?;
        let profile = self.profiles.create(&user, &pseudo, &discriminator).await?;
        info!(uid = %user.uid, tag = %profile.tag(), "Account created");
        Ok(user)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser> {
        Ok(self.auth.sign_in(email, password).await?)
    }

    pub async fn sign_out(&self) -> Result<()> {
        Ok(self.auth.sign_out().await?)
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.auth.current_user()
    }

    /// Live view of the signed-in account, `None` while signed out.
    pub fn watch(&self) -> watch::Receiver<Option<AuthUser>> {
        self.auth.watch_session()
    }

    async fn free_discriminator(&self, pseudo: &str) -> Result<String> {
        loop {
            let draw: u16 = rand::thread_rng().gen_range(0..10_000);
            let candidate = format!("{draw:0width$}", width = DISCRIMINATOR_LEN);
            if !self.profiles.tag_exists(pseudo, &candidate).await? {
                return Ok(candidate);
            }
        }
    }
}
