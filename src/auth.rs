// Authentication: password hashing, JWT tokens, API key auth, and extractors.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::convert::Infallible;
use std::sync::Arc;
use thiserror::Error;

use crate::db::{Database, User};

/// Prefix carried by every raw API token.
pub const API_TOKEN_PREFIX: &str = "zs_";

pub const SCOPE_PULLS_READ: &str = "pulls:read";
pub const SCOPE_PULLS_WRITE: &str = "pulls:write";

// ── JWT ──────────────────────────────────────────────────────────────

/// JWT secret – in production this should come from an env var.
fn jwt_secret() -> Vec<u8> {
    std::env::var("JWT_SECRET")
        .unwrap_or_else(|_| "zerosanity-dev-secret-change-in-production".to_string())
        .into_bytes()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: i64, // user id
    pub username: String,
    pub role: String,
    pub exp: usize, // expiry (unix timestamp)
    #[serde(default)]
    pub scopes: Option<String>, // None for JWT auth, Some("pulls:read,...") for API tokens
}

pub fn create_token(user_id: i64, username: &str, role: &str) -> Result<String, String> {
    let expiration = chrono::Utc::now()
        .checked_add_signed(chrono::Duration::hours(24))
        .ok_or_else(|| "Token expiry out of range".to_string())?
        .timestamp() as usize;

    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        role: role.to_string(),
        exp: expiration,
        scopes: None,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(&jwt_secret()),
    )
    .map_err(|e| format!("Failed to create token: {e}"))
}

pub fn verify_token(token: &str) -> Result<Claims, String> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(&jwt_secret()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| format!("Invalid token: {e}"))
}

/// Check whether the given claims include a required scope.
/// JWT tokens (scopes == None) have full access; API tokens must list the scope.
pub fn has_scope(claims: &Claims, required: &str) -> bool {
    match &claims.scopes {
        None => true,
        Some(scopes) => scopes.split(',').any(|s| s.trim() == required),
    }
}

// ── Password hashing ─────────────────────────────────────────────────

pub fn hash_password(password: &str) -> Result<String, String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| format!("Failed to hash password: {e}"))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, String> {
    let parsed_hash = PasswordHash::new(hash).map_err(|e| format!("Invalid password hash: {e}"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

// ── API tokens ───────────────────────────────────────────────────────

/// Generate a fresh raw API token.
pub fn generate_api_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{API_TOKEN_PREFIX}{}", hex::encode(bytes))
}

/// Hash a raw API token with SHA-256 for storage and lookup.
pub fn hash_api_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Try to authenticate via API token. Returns Claims if the token is valid.
async fn try_api_token_auth(token: &str, parts: &Parts) -> Option<Claims> {
    if !token.starts_with(API_TOKEN_PREFIX) {
        return None;
    }

    let db = parts.extensions.get::<Arc<Database>>()?;
    let token_hash = hash_api_token(token);

    let api_token = db.get_api_token_by_hash(&token_hash).await.ok()??;

    if let Err(e) = db.update_token_last_used(api_token.id).await {
        tracing::warn!("Failed to touch API token {}: {e}", api_token.id);
    }

    let user = db.get_user(api_token.user_id).await.ok()??;

    Some(Claims {
        sub: user.id,
        username: user.username,
        role: user.role,
        // API tokens don't expire via JWT, use a far-future expiry
        exp: (chrono::Utc::now().timestamp() + 86400) as usize,
        scopes: Some(api_token.scopes.clone()),
    })
}

async fn claims_from_parts(parts: &Parts) -> Result<Claims, &'static str> {
    let auth_header = parts
        .headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or("Missing Authorization header")?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or("Invalid Authorization header format")?;

    // Try JWT first
    if let Ok(claims) = verify_token(token) {
        return Ok(claims);
    }

    // Fall back to API token auth
    try_api_token_auth(token, parts)
        .await
        .ok_or("Invalid token")
}

// ── Errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Unauthenticated(&'static str),
    #[error("{0}")]
    InvalidRequest(&'static str),
    #[error("Invalid username or password")]
    BadCredentials,
    #[error("Username or email already taken")]
    Taken,
    #[error("Internal error")]
    Internal(String),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Unauthenticated(_) | AuthError::BadCredentials => StatusCode::UNAUTHORIZED,
            AuthError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AuthError::Taken => StatusCode::CONFLICT,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => AuthError::Taken,
            _ => AuthError::Internal(format!("database: {e}")),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let AuthError::Internal(detail) = &self {
            tracing::error!("Auth failure: {detail}");
        }
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

// ── Extractors ───────────────────────────────────────────────────────

/// The caller behind a JWT or a `zs_` API key; rejects with 401 otherwise.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        claims_from_parts(parts)
            .await
            .map(AuthUser)
            .map_err(AuthError::Unauthenticated)
    }
}

/// Like `AuthUser` but never rejects; headhunt handlers decide when a
/// missing caller is an error.
#[derive(Debug, Clone)]
pub struct OptionalAuthUser(pub Option<Claims>);

impl<S> FromRequestParts<S> for OptionalAuthUser
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalAuthUser(claims_from_parts(parts).await.ok()))
    }
}

// ── Account handlers ─────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    /// Shown on the headhunt leaderboard; defaults to the username.
    pub display_name: Option<String>,
}

impl RegisterRequest {
    fn validate(&self) -> Result<(), AuthError> {
        if self.username.is_empty() || self.email.is_empty() || self.password.is_empty() {
            return Err(AuthError::InvalidRequest(
                "username, email, and password are required",
            ));
        }
        if !(3..=30).contains(&self.username.chars().count()) {
            return Err(AuthError::InvalidRequest("username must be 3-30 characters"));
        }
        if self.password.len() < 8 {
            return Err(AuthError::InvalidRequest(
                "password must be at least 8 characters",
            ));
        }
        Ok(())
    }

    fn leaderboard_name(&self) -> &str {
        self.display_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.username)
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct UserPublic {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub role: String,
    pub created_at: String,
}

impl From<User> for UserPublic {
    fn from(user: User) -> Self {
        UserPublic {
            id: user.id,
            username: user.username,
            email: user.email,
            display_name: user.display_name,
            role: user.role,
            created_at: user.created_at,
        }
    }
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserPublic,
}

impl AuthResponse {
    fn issue(user: User) -> Result<Self, AuthError> {
        let token = create_token(user.id, &user.username, &user.role).map_err(AuthError::Internal)?;
        Ok(AuthResponse {
            token,
            user: user.into(),
        })
    }
}

pub async fn register(
    State(db): State<Arc<Database>>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AuthError> {
    req.validate()?;
    let password_hash = hash_password(&req.password).map_err(AuthError::Internal)?;
    let user = db
        .create_user(&req.username, &req.email, &password_hash, req.leaderboard_name())
        .await?;
    tracing::info!(user_id = user.id, "User registered");
    Ok((StatusCode::CREATED, Json(AuthResponse::issue(user)?)))
}

pub async fn login(
    State(db): State<Arc<Database>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    let user = db
        .get_user_by_username(&req.username)
        .await?
        .ok_or(AuthError::BadCredentials)?;
    let hash = user
        .password_hash
        .as_deref()
        .ok_or(AuthError::BadCredentials)?;
    if !verify_password(&req.password, hash).map_err(AuthError::Internal)? {
        return Err(AuthError::BadCredentials);
    }
    Ok(Json(AuthResponse::issue(user)?))
}

pub async fn me(
    AuthUser(claims): AuthUser,
    State(db): State<Arc<Database>>,
) -> Result<Json<UserPublic>, AuthError> {
    let user = db
        .get_user(claims.sub)
        .await?
        .ok_or(AuthError::Unauthenticated("Account no longer exists"))?;
    Ok(Json(user.into()))
}
