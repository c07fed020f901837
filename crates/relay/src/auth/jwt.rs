use anyhow::{anyhow, bail, Context};
use huddle_common::types::Identity;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub const IDENTITY_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;
const FALLBACK_DISPLAY_NAME: &str = "User";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IdentityClaims {
    sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    picture: Option<String>,
    iat: i64,
    exp: i64,
}

/// Issues and verifies HS256 identity tokens.
#[derive(Clone)]
pub struct JwtIdentityService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityService {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.len() < 32 {
            bail!("jwt secret must be at least 32 characters long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    pub fn issue_token(&self, identity: &Identity) -> anyhow::Result<String> {
        self.issue_token_at(identity, current_unix_timestamp()?)
    }

    pub(crate) fn issue_token_at(
        &self,
        identity: &Identity,
        issued_at: i64,
    ) -> anyhow::Result<String> {
        let claims = IdentityClaims {
            sub: identity.id.clone(),
            name: Some(identity.display_name.clone()),
            email: None,
            picture: identity.avatar_ref.clone(),
            iat: issued_at,
            exp: issued_at + IDENTITY_TOKEN_TTL_SECONDS,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode identity token")
    }

    pub fn validate_token(&self, token: &str) -> anyhow::Result<Identity> {
        let claims = decode::<IdentityClaims>(token, &self.decoding_key, &self.validation)
            .context("failed to decode identity token")?
            .claims;

        if claims.sub.trim().is_empty() {
            bail!("identity token subject is empty");
        }

        let display_name = display_name_from_claims(&claims);
        let identity = Identity::new(claims.sub, display_name);
        Ok(match claims.picture.filter(|picture| !picture.trim().is_empty()) {
            Some(picture) => identity.with_avatar(picture),
            None => identity,
        })
    }
}

/// Prefers the `name` claim, then the local part of `email`, then a generic label.
fn display_name_from_claims(claims: &IdentityClaims) -> String {
    if let Some(name) = claims.name.as_deref().map(str::trim).filter(|name| !name.is_empty()) {
        return name.to_string();
    }

    claims
        .email
        .as_deref()
        .and_then(|email| email.split('@').next())
        .map(str::trim)
        .filter(|local| !local.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string())
}

fn current_unix_timestamp() -> anyhow::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;

    i64::try_from(duration.as_secs()).context("unix timestamp overflow")
}
