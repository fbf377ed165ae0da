//! Access/refresh token signing and verification.
//!
//! Tokens are HS256 JWTs carrying only the user id as `sub`. Access and
//! refresh tokens are signed with separate secrets, so one kind never
//! verifies as the other. A valid signature is not enough to act on a
//! token: callers must also find a live session for the subject.
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::err::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    /// Makes tokens minted within the same second distinct.
    pub jti: String,
}

impl Claims {
    pub fn subject(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }
}

#[derive(Clone)]
struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expires_in: Duration,
}

impl KeyPair {
    fn new(secret: &str, minutes: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            expires_in: Duration::minutes(minutes),
        }
    }
}

#[derive(Clone)]
pub struct TokenService {
    access: KeyPair,
    refresh: KeyPair,
}

impl TokenService {
    pub fn new(
        access_secret: &str,
        access_minutes: i64,
        refresh_secret: &str,
        refresh_minutes: i64,
    ) -> Self {
        Self {
            access: KeyPair::new(access_secret, access_minutes),
            refresh: KeyPair::new(refresh_secret, refresh_minutes),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            &config.access_token_secret,
            config.access_token_expires_in,
            &config.refresh_token_secret,
            config.refresh_token_expires_in,
        )
    }

    fn keys(&self, role: KeyRole) -> &KeyPair {
        match role {
            KeyRole::Access => &self.access,
            KeyRole::Refresh => &self.refresh,
        }
    }

    pub fn issue_access_token(&self, user_id: Uuid) -> Result<String, Error> {
        self.issue(KeyRole::Access, user_id)
    }

    pub fn issue_refresh_token(&self, user_id: Uuid) -> Result<String, Error> {
        self.issue(KeyRole::Refresh, user_id)
    }

    fn issue(&self, role: KeyRole, user_id: Uuid) -> Result<String, Error> {
        let keys = self.keys(role);
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + keys.expires_in).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)?)
    }

    /// Returns the claims of a well-formed, correctly signed, unexpired token.
    pub fn verify(&self, token: &str, role: KeyRole) -> Option<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        match decode::<Claims>(token, &self.keys(role).decoding, &validation) {
            Ok(data) => Some(data.claims),
            Err(err) => {
                log::debug!("rejected {:?} token: {}", role, err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new("access-secret", 15, "refresh-secret", 60)
    }

    #[test]
    fn issued_tokens_verify_with_their_own_key() {
        let tokens = service();
        let user = Uuid::new_v4();
        let access = tokens.issue_access_token(user).unwrap();
        let refresh = tokens.issue_refresh_token(user).unwrap();

        let claims = tokens.verify(&access, KeyRole::Access).unwrap();
        assert_eq!(claims.subject(), Some(user));
        assert!(claims.exp > claims.iat);
        assert!(tokens.verify(&refresh, KeyRole::Refresh).is_some());

        assert!(tokens.verify(&access, KeyRole::Refresh).is_none());
        assert!(tokens.verify(&refresh, KeyRole::Access).is_none());
    }

    #[test]
    fn tokens_minted_back_to_back_differ() {
        let tokens = service();
        let user = Uuid::new_v4();
        let first = tokens.issue_access_token(user).unwrap();
        let second = tokens.issue_access_token(user).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn expired_and_garbage_tokens_fail_closed() {
        let expired = TokenService::new("access-secret", -5, "refresh-secret", -5);
        let token = expired.issue_access_token(Uuid::new_v4()).unwrap();
        assert!(expired.verify(&token, KeyRole::Access).is_none());

        let tokens = service();
        assert!(tokens.verify("not.a.token", KeyRole::Access).is_none());
        assert!(tokens.verify("", KeyRole::Refresh).is_none());

        let foreign = TokenService::new("other", 15, "other", 60)
            .issue_access_token(Uuid::new_v4())
            .unwrap();
        assert!(tokens.verify(&foreign, KeyRole::Access).is_none());
    }
}
