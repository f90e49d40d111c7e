//! Authentication: password hashing, JWT issue/verify, user registry
//!
//! Tokens are stateless: a signed assertion of subject, scopes and expiry.
//! Validity is fully determined by the signature and the expiry check at
//! verification time; there is no revocation path.

pub mod middleware;

use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Hash a password with bcrypt at the given cost factor.
pub fn hash_password(password: &str, cost: u32) -> Result<String> {
    bcrypt::hash(password, cost).map_err(|e| anyhow!("password hashing failed: {e}"))
}

/// Verify a password against its stored hash.
///
/// Any backend error counts as a failed verification rather than a fault.
pub fn verify_password(password: &str, hashed: &str) -> bool {
    match bcrypt::verify(password, hashed) {
        Ok(matched) => matched,
        Err(e) => {
            tracing::error!("password verification error: {e}");
            false
        }
    }
}

/// Signed token payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (username)
    pub sub: String,
    /// Granted scopes
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Expiry, unix seconds
    pub exp: i64,
}

/// Issues and verifies HS256 bearer tokens.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    default_expiry: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, expire_minutes: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            default_expiry: Duration::minutes(expire_minutes),
        }
    }

    /// Issue a token for `subject` with the given scopes.
    ///
    /// `expires_in` overrides the configured default expiry.
    pub fn issue(
        &self,
        subject: &str,
        scopes: &[String],
        expires_in: Option<Duration>,
    ) -> Result<String> {
        let expiry = Utc::now() + expires_in.unwrap_or(self.default_expiry);
        let claims = Claims {
            sub: subject.to_string(),
            scopes: scopes.to_vec(),
            exp: expiry.timestamp(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| anyhow!("token encoding failed: {e}"))
    }

    /// Verify signature and expiry, returning the claims on success.
    ///
    /// Every failure mode collapses to the same error; callers must not
    /// leak which check failed.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| anyhow!("token rejected: {e}"))?;
        Ok(data.claims)
    }
}

/// Stored account record. The hash never serializes outward.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub disabled: bool,
    pub scopes: Vec<String>,
}

/// Registration payload.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

/// In-memory account store. Process-local by design; there is no
/// persistence or cross-process sharing.
pub struct UserRegistry {
    users: DashMap<String, User>,
    bcrypt_cost: u32,
}

impl UserRegistry {
    pub fn new(bcrypt_cost: u32) -> Self {
        Self {
            users: DashMap::new(),
            bcrypt_cost,
        }
    }

    /// Create an account with the default `user` scope.
    pub fn register(&self, new_user: NewUser) -> Result<User, RegisterError> {
        let hashed = hash_password(&new_user.password, self.bcrypt_cost)
            .map_err(RegisterError::Hashing)?;

        let user = User {
            username: new_user.username.clone(),
            email: new_user.email,
            full_name: new_user.full_name,
            hashed_password: hashed,
            disabled: false,
            scopes: vec!["user".to_string()],
        };

        match self.users.entry(new_user.username) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(RegisterError::UsernameTaken),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(user.clone());
                Ok(user)
            }
        }
    }

    /// Verify credentials; `None` covers unknown users, disabled accounts
    /// and wrong passwords alike.
    pub fn authenticate(&self, username: &str, password: &str) -> Option<User> {
        let user = self.users.get(username)?;
        if user.disabled || !verify_password(password, &user.hashed_password) {
            return None;
        }
        Some(user.clone())
    }

    pub fn get(&self, username: &str) -> Option<User> {
        self.users.get(username).map(|u| u.clone())
    }

    /// Grant an extra scope to an existing account.
    pub fn grant_scope(&self, username: &str, scope: &str) -> bool {
        match self.users.get_mut(username) {
            Some(mut user) => {
                if !user.scopes.iter().any(|s| s == scope) {
                    user.scopes.push(scope.to_string());
                }
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("username already registered")]
    UsernameTaken,
    #[error(transparent)]
    Hashing(anyhow::Error),
}

/// Generate a fresh API key: 64 hex characters.
pub fn create_api_key() -> String {
    format!(
        "{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

/// Shape-check an API key.
pub fn validate_api_key(key: &str) -> bool {
    key.len() == 64 && key.chars().all(|c| c.is_ascii_hexdigit())
}
