//! Password hashing and username/password login.

use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use super::error::{AuthError, AuthResult};
use super::two_factor::TwoFactorService;
use crate::db::{User, UserRepository};

/// Hash a password into an Argon2id PHC string.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// Check a password against a PHC string. Errors only if the hash is malformed.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, argon2::password_hash::Error> {
    let parsed = PasswordHash::new(hash)?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Password checked against [`PasswordAuthenticator`]'s placeholder hash.
const PLACEHOLDER_PASSWORD: &str = "placeholder password for missing accounts";

pub struct PasswordAuthenticator {
    users: Arc<dyn UserRepository>,
    two_factor: Arc<TwoFactorService>,
    /// Verified in place of a real hash when the account or its password is
    /// missing, so every failed login costs one Argon2 verification.
    placeholder_hash: Option<String>,
}

impl PasswordAuthenticator {
    pub fn new(users: Arc<dyn UserRepository>, two_factor: Arc<TwoFactorService>) -> Self {
        let placeholder_hash = hash_password(PLACEHOLDER_PASSWORD)
            .inspect_err(|e| tracing::error!(error = %e, "Failed to build placeholder password hash"))
            .ok();

        Self {
            users,
            two_factor,
            placeholder_hash,
        }
    }

    /// Check credentials and the second factor.
    ///
    /// Unknown users and wrong passwords fail identically.
    #[tracing::instrument(skip(self, password, totp_code))]
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        totp_code: Option<&str>,
    ) -> AuthResult<User> {
        let user = self
            .users
            .find_by_username(username)
            .await
            .map_err(store_failure!("Failed to look up user"))?;

        let Some(user) = user else {
            self.verify_placeholder(password);
            tracing::debug!("Login for unknown user");
            return Err(AuthError::InvalidUsernameOrPassword);
        };

        if !self.password_matches(&user, password)? {
            tracing::debug!(user_id = user.id, "Login with wrong password");
            return Err(AuthError::InvalidUsernameOrPassword);
        }

        self.two_factor.verify(user.id, totp_code).await?;

        Ok(user)
    }

    /// Re-check the password of an already authenticated user.
    pub async fn confirm_password(&self, user_id: i64, password: &str) -> AuthResult<()> {
        let user = self
            .users
            .find_by_id(user_id)
            .await
            .map_err(store_failure!("Failed to load user", user_id = user_id))?
            .ok_or(AuthError::ConfirmationPasswordInvalid)?;

        if self.password_matches(&user, password)? {
            Ok(())
        } else {
            Err(AuthError::ConfirmationPasswordInvalid)
        }
    }

    /// Users provisioned through forward auth have no password and never match.
    fn password_matches(&self, user: &User, password: &str) -> AuthResult<bool> {
        let Some(hash) = user.password_hash.as_deref() else {
            self.verify_placeholder(password);
            return Ok(false);
        };

        verify_password(password, hash).map_err(|e| {
            tracing::error!(error = %e, user_id = user.id, "Stored password hash is malformed");
            AuthError::Unexpected
        })
    }

    /// Spend the same Argon2 work as a real verification. Never matches.
    fn verify_placeholder(&self, password: &str) {
        if let Some(hash) = self.placeholder_hash.as_deref() {
            let _ = verify_password(password, hash);
        }
    }
}
