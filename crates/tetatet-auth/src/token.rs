use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Access tokens bind a connection; refresh tokens only mint new access
/// tokens. Mixing them up is rejected at validation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
    pub kind: TokenKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

const ACCESS_TTL_MINUTES: i64 = 15;
const REFRESH_TTL_DAYS: i64 = 7;

/// Issue a fresh access/refresh pair for a user.
pub fn issue_pair(user_id: Uuid, secret: &str) -> Result<TokenPair> {
    Ok(TokenPair {
        access: issue(user_id, secret, TokenKind::Access)?,
        refresh: issue(user_id, secret, TokenKind::Refresh)?,
    })
}

fn issue(user_id: Uuid, secret: &str, kind: TokenKind) -> Result<String> {
    let ttl = match kind {
        TokenKind::Access => Duration::minutes(ACCESS_TTL_MINUTES),
        TokenKind::Refresh => Duration::days(REFRESH_TTL_DAYS),
    };
    let claims = Claims {
        sub: user_id,
        exp: (Utc::now() + ttl).timestamp() as usize,
        kind,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}

/// Validate an access token. Signature, expiry and kind all have to hold.
pub fn verify_access(token: &str, secret: &str) -> Option<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;

    if data.claims.kind != TokenKind::Access {
        return None;
    }
    Some(data.claims)
}

/// Exchange a valid refresh token for a new access token.
pub fn refresh_access(refresh_token: &str, secret: &str) -> Option<String> {
    let data = decode::<Claims>(
        refresh_token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;

    if data.claims.kind != TokenKind::Refresh {
        return None;
    }
    issue(data.claims.sub, secret, TokenKind::Access).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn pair_round_trip() {
        let user = Uuid::new_v4();
        let pair = issue_pair(user, SECRET).unwrap();

        let claims = verify_access(&pair.access, SECRET).unwrap();
        assert_eq!(claims.sub, user);
        assert_eq!(claims.kind, TokenKind::Access);
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let pair = issue_pair(Uuid::new_v4(), SECRET).unwrap();
        assert!(verify_access(&pair.refresh, SECRET).is_none());
    }

    #[test]
    fn access_token_cannot_refresh() {
        let pair = issue_pair(Uuid::new_v4(), SECRET).unwrap();
        assert!(refresh_access(&pair.access, SECRET).is_none());
    }

    #[test]
    fn refresh_yields_usable_access_token() {
        let user = Uuid::new_v4();
        let pair = issue_pair(user, SECRET).unwrap();

        let access = refresh_access(&pair.refresh, SECRET).unwrap();
        let claims = verify_access(&access, SECRET).unwrap();
        assert_eq!(claims.sub, user);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let pair = issue_pair(Uuid::new_v4(), SECRET).unwrap();
        assert!(verify_access(&pair.access, "other-secret").is_none());
    }
}
