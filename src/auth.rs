use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::{AppConfig, Env},
    error::{ApiError, ApiResult},
    models::Role,
    policy::Principal,
    repository::RepositoryState,
};

/// Session lifetime for issued tokens.
pub const TOKEN_TTL_SECS: i64 = 60 * 60 * 24;

/// Claims
///
/// Payload carried inside the signed bearer token. Only the subject id is
/// trusted from the token; the role is re-resolved from storage on every
/// request so revoked or re-roled users take effect immediately.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user's id.
    pub sub: Uuid,
    /// Expiration time, seconds since the epoch.
    pub exp: usize,
    /// Issued-at, seconds since the epoch.
    pub iat: usize,
}

/// issue_token
///
/// Signs a session token for a freshly authenticated user. The login
/// handler is the only caller.
pub fn issue_token(user_id: Uuid, secret: &str) -> ApiResult<String> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user_id,
        exp: (now + TOKEN_TTL_SECS) as usize,
        iat: now as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("token signing failed: {e}")))
}

/// hash_password
///
/// Argon2id with default parameters; returns the PHC-formatted hash string
/// carrying its own salt.
pub fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(format!("password hashing failed: {e}")))
}

/// verify_password
///
/// A malformed stored hash counts as a mismatch rather than an error; the
/// caller only ever learns pass/fail.
pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// AuthUser
///
/// The resolved identity of an authenticated request: id plus the single
/// authoritative role, fetched from storage at extraction time. Handlers
/// receive this struct and pass `principal()` explicitly into the policy
/// engine.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
}

impl AuthUser {
    pub fn principal(&self) -> Principal {
        Principal {
            id: self.id,
            role: self.role,
        }
    }
}

/// AuthUser Extractor Implementation
///
/// Implements Axum's FromRequestParts trait, making AuthUser usable as a
/// function argument in any authenticated handler.
///
/// The process:
/// 1. Dependency resolution: Repository and AppConfig from application state.
/// 2. Local bypass: development-time access via the 'x-user-id' header,
///    guarded by the Env::Local check.
/// 3. Token validation: Bearer extraction and JWT decoding.
/// 4. Storage lookup: the principal must still have a role record; a valid
///    token whose subject has been deleted is rejected, not a crash.
///
/// Rejection: every failure surfaces as the generic Unauthenticated error.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        // Local development bypass: authenticate by user id header, but only
        // when that id maps to a real user row so the role is still loaded.
        if config.env == Env::Local {
            if let Some(user_id_header) = parts.headers.get("x-user-id") {
                if let Ok(id_str) = user_id_header.to_str() {
                    if let Ok(user_id) = Uuid::parse_str(id_str) {
                        if let Ok(Some(user)) = repo.get_user(user_id).await {
                            return Ok(AuthUser {
                                id: user.id,
                                role: user.role,
                            });
                        }
                    }
                }
            }
        }

        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::Unauthenticated)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(ApiError::Unauthenticated)?;

        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());

        let mut validation = Validation::default();
        validation.validate_exp = true;

        let token_data = match decode::<Claims>(token, &decoding_key, &validation) {
            Ok(data) => data,
            Err(e) => {
                return Err(match e.kind() {
                    // Expired tokens are the common case for otherwise valid
                    // sessions; everything else (bad signature, malformed)
                    // gets the same generic rejection.
                    ErrorKind::ExpiredSignature => ApiError::Unauthenticated,
                    _ => ApiError::Unauthenticated,
                });
            }
        };

        let user = repo
            .get_user(token_data.claims.sub)
            .await?
            .ok_or(ApiError::Unauthenticated)?;

        Ok(AuthUser {
            id: user.id,
            role: user.role,
        })
    }
}
