//! TOTP two-factor authentication.
//!
//! Enrollment is a small state machine stored as one row per user:
//!
//! - no row: unset
//! - row with `enabled = false`: setup running, waiting for a first code
//! - row with `enabled = true`: active, required on every password login
//!
//! Deactivation deletes the row, so the next setup starts from a fresh secret.

use std::sync::Arc;

use serde::Serialize;
use totp_rs::{Algorithm, Secret, TOTP};

use super::error::{AuthError, AuthResult};
use crate::clock::Clock;
use crate::db::{TwoFactorSettings, TwoFactorSettingsRepository, UserRepository};

const TOTP_DIGITS: usize = 6;
const TOTP_STEP_SECS: u64 = 30;
/// Only the current time step is accepted.
const TOTP_SKEW: u8 = 0;

/// Two-factor state as reported to the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TwoFactorStatus {
    pub enabled: bool,
    pub setup_pending: bool,
}

pub struct TwoFactorService {
    settings: Arc<dyn TwoFactorSettingsRepository>,
    users: Arc<dyn UserRepository>,
    clock: Arc<dyn Clock>,
    issuer: String,
}

impl TwoFactorService {
    pub fn new(
        settings: Arc<dyn TwoFactorSettingsRepository>,
        users: Arc<dyn UserRepository>,
        clock: Arc<dyn Clock>,
        issuer: impl Into<String>,
    ) -> Self {
        Self {
            settings,
            users,
            clock,
            issuer: issuer.into(),
        }
    }

    /// Start enrollment and return the `otpauth://` provisioning URL.
    ///
    /// A pending setup is replaced by a new secret.
    #[tracing::instrument(skip(self))]
    pub async fn setup(&self, user_id: i64) -> AuthResult<String> {
        if self.find(user_id).await?.is_some_and(|s| s.enabled) {
            return Err(AuthError::TwoFactorAlreadyEnabled);
        }

        let user = self
            .users
            .find_by_id(user_id)
            .await
            .map_err(store_failure!("Failed to load user for 2FA setup", user_id = user_id))?
            .ok_or(AuthError::NotFound("user"))?;

        let secret = Secret::generate_secret().to_encoded().to_string();
        let totp = self.totp(&secret, user.username)?;

        let now = self.clock.now();
        self.settings
            .save(&TwoFactorSettings {
                user_id,
                secret,
                enabled: false,
                created_at: now,
                updated_at: now,
            })
            .await
            .map_err(store_failure!("Failed to save 2FA secret", user_id = user_id))?;

        tracing::info!(user_id, "Two-factor setup started");
        Ok(totp.get_url())
    }

    /// Confirm a pending setup with the first code from the authenticator app.
    #[tracing::instrument(skip(self, code))]
    pub async fn activate(&self, user_id: i64, code: &str) -> AuthResult<()> {
        let mut settings = self
            .find(user_id)
            .await?
            .ok_or(AuthError::TwoFactorSetupNotRunning)?;

        if settings.enabled {
            return Err(AuthError::TwoFactorAlreadyEnabled);
        }

        self.check_code(&settings, code)?;

        settings.enabled = true;
        settings.updated_at = self.clock.now();
        self.settings
            .update(&settings)
            .await
            .map_err(store_failure!("Failed to enable 2FA", user_id = user_id))?;

        tracing::info!(user_id, "Two-factor auth enabled");
        Ok(())
    }

    #[tracing::instrument(skip(self, code))]
    pub async fn deactivate(&self, user_id: i64, code: &str) -> AuthResult<()> {
        let settings = self
            .find(user_id)
            .await?
            .filter(|s| s.enabled)
            .ok_or(AuthError::TwoFactorNotEnabled)?;

        self.check_code(&settings, code)?;

        self.settings
            .delete(user_id)
            .await
            .map_err(store_failure!("Failed to delete 2FA settings", user_id = user_id))?;

        tracing::info!(user_id, "Two-factor auth disabled");
        Ok(())
    }

    /// Login gate. Passes unless two-factor auth is active for the user.
    pub async fn verify(&self, user_id: i64, code: Option<&str>) -> AuthResult<()> {
        let Some(settings) = self.find(user_id).await?.filter(|s| s.enabled) else {
            return Ok(());
        };

        let code = code
            .filter(|c| !c.is_empty())
            .ok_or(AuthError::TwoFactorRequired)?;

        self.check_code(&settings, code).inspect_err(|e| {
            if *e == AuthError::TwoFactorCodeInvalid {
                tracing::warn!(user_id, "Invalid two-factor code at login");
            }
        })
    }

    /// Current state. A user who never set anything up is simply disabled.
    pub async fn get_settings(&self, user_id: i64) -> AuthResult<TwoFactorStatus> {
        Ok(self
            .find(user_id)
            .await?
            .map(|s| TwoFactorStatus {
                enabled: s.enabled,
                setup_pending: !s.enabled,
            })
            .unwrap_or_default())
    }

    async fn find(&self, user_id: i64) -> AuthResult<Option<TwoFactorSettings>> {
        self.settings
            .find(user_id)
            .await
            .map_err(store_failure!("Failed to load 2FA settings", user_id = user_id))
    }

    fn check_code(&self, settings: &TwoFactorSettings, code: &str) -> AuthResult<()> {
        let totp = self.totp(&settings.secret, settings.user_id.to_string())?;
        let now = u64::try_from(self.clock.now().timestamp()).unwrap_or_default();

        if totp.check(code, now) {
            Ok(())
        } else {
            Err(AuthError::TwoFactorCodeInvalid)
        }
    }

    fn totp(&self, secret: &str, account_name: String) -> AuthResult<TOTP> {
        let secret = Secret::Encoded(secret.to_string()).to_bytes().map_err(|e| {
            tracing::error!(error = ?e, "Stored TOTP secret is not valid base32");
            AuthError::Unexpected
        })?;

        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW,
            TOTP_STEP_SECS,
            secret,
            Some(self.issuer.clone()),
            account_name,
        )
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to create TOTP");
            AuthError::Unexpected
        })
    }
}
