use std::sync::Arc;

use async_trait::async_trait;
use huddle_common::types::Identity;
use thiserror::Error;
use tracing::debug;

use super::jwt::JwtIdentityService;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("No token provided")]
    MissingCredential,
    #[error("Invalid token")]
    InvalidCredential,
}

/// Turns an opaque client credential into an [`Identity`].
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<Identity, AuthError>;

    /// Identity bound to connections that join without authenticating.
    fn guest_identity(&self) -> Identity;
}

/// Resolves signed identity tokens, plus an optional literal demo credential
/// that maps straight to the guest identity.
pub struct TokenIdentityResolver {
    jwt: Arc<JwtIdentityService>,
    demo_credential: Option<String>,
    guest: Identity,
}

impl TokenIdentityResolver {
    pub fn new(
        jwt: Arc<JwtIdentityService>,
        demo_credential: Option<String>,
        guest: Identity,
    ) -> Self {
        Self { jwt, demo_credential, guest }
    }
}

#[async_trait]
impl IdentityResolver for TokenIdentityResolver {
    async fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(AuthError::MissingCredential);
        }

        if self.demo_credential.as_deref() == Some(credential) {
            return Ok(self.guest.clone());
        }

        self.jwt.validate_token(credential).map_err(|error| {
            debug!(error = %error, "identity token rejected");
            AuthError::InvalidCredential
        })
    }

    fn guest_identity(&self) -> Identity {
        self.guest.clone()
    }
}
