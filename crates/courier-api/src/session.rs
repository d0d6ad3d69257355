//! Password hashing and the access/refresh token lifecycle.
//!
//! Access tokens are short-lived HS256 JWTs naming a server-side session.
//! Refresh tokens are opaque `<sessionId>.<secret>` strings; only the SHA-256
//! of the secret is stored, and every refresh swaps it for a new one.

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use courier_gateway::Revocation;
use courier_store::models::{RotateOutcome, SessionRow, UserRow};
use courier_types::api::{Claims, TokenResponse};

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::state::{AppStateInner, AuthConfig};

const REFRESH_SECRET_BYTES: usize = 32;

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("Password hashing failed: {}", e);
            ApiError::Internal
        })
}

/// A malformed stored hash counts as a mismatch.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        warn!("Stored password hash is not a PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

pub fn encode_access_token(
    config: &AuthConfig,
    user: &UserRow,
    session_id: Uuid,
    now: DateTime<Utc>,
) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user.user_id,
        sid: session_id,
        username: user.username.clone(),
        role: user.role,
        iat: now.timestamp(),
        exp: (now + Duration::seconds(config.access_ttl_secs)).timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| {
        error!("JWT encoding failed: {}", e);
        ApiError::Internal
    })
}

/// Checks signature and expiry with no leeway.
pub fn decode_access_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| ApiError::unauthorized(format!("Invalid access token: {e}")))
}

fn new_refresh_secret() -> String {
    let mut bytes = [0u8; REFRESH_SECRET_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hex SHA-256. This is what the session file holds instead of the secret.
pub fn digest(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

pub fn format_refresh_token(session_id: Uuid, secret: &str) -> String {
    format!("{session_id}.{secret}")
}

pub fn parse_refresh_token(token: &str) -> Option<(Uuid, &str)> {
    let (sid, secret) = token.trim().split_once('.')?;
    let sid = Uuid::parse_str(sid).ok()?;
    (!secret.is_empty()).then_some((sid, secret))
}

fn token_response(
    config: &AuthConfig,
    user: &UserRow,
    session_id: Uuid,
    secret: &str,
    now: DateTime<Utc>,
) -> Result<TokenResponse, ApiError> {
    Ok(TokenResponse {
        access_token: encode_access_token(config, user, session_id, now)?,
        refresh_token: format_refresh_token(session_id, secret),
        token_type: "Bearer".into(),
        expires_in: config.access_ttl_secs,
    })
}

/// Start a new session for `user` and hand out its first token pair.
pub async fn issue(state: &AppStateInner, user: &UserRow) -> Result<TokenResponse, ApiError> {
    let now = Utc::now();
    let secret = new_refresh_secret();
    let session = SessionRow {
        session_id: Uuid::new_v4(),
        user_id: user.user_id,
        refresh_token_hash: digest(&secret),
        previous_refresh_hash: None,
        created_at: now,
        expires_at: now + Duration::seconds(state.auth.session_ttl_secs),
        revoked: false,
    };
    let session_id = session.session_id;

    state.blocking(move |db| db.insert_session(session)).await?;
    info!("{} ({}) started session {}", user.username, user.user_id, session_id);

    token_response(&state.auth, user, session_id, &secret, now)
}

/// Exchange a refresh token for a new pair. The old refresh token stops
/// working; presenting it again revokes the whole session.
pub async fn rotate(state: &AppStateInner, refresh_token: &str) -> Result<TokenResponse, ApiError> {
    let (session_id, secret) = parse_refresh_token(refresh_token)
        .ok_or_else(|| ApiError::unauthorized("Invalid refresh token"))?;

    let now = Utc::now();
    let presented = digest(secret);
    let new_secret = new_refresh_secret();
    let new_hash = digest(&new_secret);
    let new_expiry = now + Duration::seconds(state.auth.session_ttl_secs);

    let outcome = state
        .blocking(move |db| db.rotate_refresh(session_id, &presented, new_hash, new_expiry, now))
        .await?;

    let session = match outcome {
        RotateOutcome::Rotated(session) => session,
        RotateOutcome::Reused => {
            warn!("Refresh token reuse on session {}, session revoked", session_id);
            state.dispatcher.revoke(Revocation::Session(session_id));
            return Err(ApiError::unauthorized("Refresh token reuse detected"));
        }
        RotateOutcome::Invalid => return Err(ApiError::unauthorized("Invalid refresh token")),
    };

    let user_id = session.user_id;
    let user = state.blocking(move |db| db.get_user_by_id(user_id)).await?;
    let user = match user {
        Some(user) if !user.is_blocked() => user,
        _ => {
            state.blocking(move |db| db.revoke_session(session_id)).await?;
            state.dispatcher.revoke(Revocation::Session(session_id));
            return Err(ApiError::unauthorized("Account is no longer active"));
        }
    };

    token_response(&state.auth, &user, session_id, &new_secret, now)
}

/// Resolve an access token to the caller. The session it names must still be
/// live and its user must exist and not be blocked.
pub async fn authenticate(state: &AppStateInner, token: &str) -> Result<AuthUser, ApiError> {
    let claims = decode_access_token(&state.auth.jwt_secret, token)?;
    let (session_id, user_id) = (claims.sid, claims.sub);

    let (session, user) = state
        .blocking(move |db| Ok((db.get_session(session_id)?, db.get_user_by_id(user_id)?)))
        .await?;

    let now = Utc::now();
    match session {
        Some(s) if s.user_id == user_id && s.is_live(now) => {}
        _ => return Err(ApiError::unauthorized("Session expired or revoked")),
    }

    let user = user.ok_or_else(|| ApiError::unauthorized("User no longer exists"))?;
    if user.is_blocked() {
        return Err(ApiError::forbidden("User is blocked"));
    }

    Ok(AuthUser {
        user_id,
        session_id,
        username: user.username,
        role: user.role,
        token_expires_at: DateTime::from_timestamp(claims.exp, 0).unwrap_or(now),
    })
}

#[cfg(test)]
mod tests {
    use courier_types::models::{UserRole, UserStatus};

    use super::*;

    fn user() -> UserRow {
        UserRow {
            user_id: Uuid::new_v4(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            password_hash: String::new(),
            role: UserRole::User,
            status: UserStatus::Offline,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn password_round_trip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not-a-hash"));
    }

    #[test]
    fn access_token_carries_session() {
        let config = AuthConfig::new("secret");
        let user = user();
        let sid = Uuid::new_v4();

        let token = encode_access_token(&config, &user, sid, Utc::now()).unwrap();
        let claims = decode_access_token("secret", &token).unwrap();
        assert_eq!(claims.sub, user.user_id);
        assert_eq!(claims.sid, sid);
        assert_eq!(claims.exp - claims.iat, config.access_ttl_secs);

        assert!(decode_access_token("other-secret", &token).is_err());
    }

    #[test]
    fn expired_access_token_is_rejected() {
        let config = AuthConfig::new("secret");
        let issued = Utc::now() - Duration::seconds(config.access_ttl_secs + 5);

        let token = encode_access_token(&config, &user(), Uuid::new_v4(), issued).unwrap();
        let err = decode_access_token("secret", &token).unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[test]
    fn refresh_token_format() {
        let sid = Uuid::new_v4();
        let secret = new_refresh_secret();
        assert_eq!(URL_SAFE_NO_PAD.decode(&secret).unwrap().len(), REFRESH_SECRET_BYTES);

        let token = format_refresh_token(sid, &secret);
        assert_eq!(parse_refresh_token(&token), Some((sid, secret.as_str())));
        assert_eq!(parse_refresh_token("garbage"), None);
        assert_eq!(parse_refresh_token(&format!("{sid}.")), None);
    }

    #[test]
    fn digest_is_hex_sha256() {
        let d = digest("abc");
        assert_eq!(d, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
    }
}
