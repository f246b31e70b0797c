//! JWT Token Handler
//! Mission: Generate and validate bearer tokens securely

use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: usize,
    pub exp: usize,
}

/// HS256 token handler. One instance shared across HTTP and websocket auth.
pub struct JwtHandler {
    secret: String,
    exp_minutes: i64,
}

impl JwtHandler {
    pub fn new(secret: String, exp_minutes: i64) -> Self {
        Self {
            secret,
            exp_minutes,
        }
    }

    /// Issue a signed token for a username.
    pub fn issue(&self, username: &str) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: username.to_string(),
            iat: now as usize,
            exp: (now + self.exp_minutes * 60) as usize,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .context("Failed to sign token")
    }

    /// Validate a token and return the subject username, or None if the
    /// token is malformed, expired, or signed with a different secret.
    pub fn verify(&self, token: &str) -> Option<String> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .ok()
        .map(|data| data.claims.sub)
    }
}
