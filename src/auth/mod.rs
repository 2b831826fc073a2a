use axum::{extract::FromRequestParts, http::header, http::request::Parts};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{errors::ServiceError, AppState};

/// Header carrying the opaque guest identifier when no cookie is present.
pub const GUEST_ID_HEADER: &str = "x-guest-id";
/// Cookie carrying the opaque guest identifier.
pub const GUEST_ID_COOKIE: &str = "guest_id";

/// Auth configuration derived from AppConfig
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    /// Token lifetime in seconds for tokens issued by this service
    pub token_ttl_secs: i64,
}

impl AuthConfig {
    pub fn new(
        jwt_secret: String,
        issuer: Option<String>,
        audience: Option<String>,
        token_ttl_secs: i64,
    ) -> Self {
        Self {
            jwt_secret,
            issuer,
            audience,
            token_ttl_secs,
        }
    }
}

/// Bearer token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub exp: i64,
    pub iat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

/// Validates (and for first-party flows, issues) bearer tokens.
#[derive(Debug, Clone)]
pub struct AuthService {
    config: AuthConfig,
}

impl AuthService {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Validate a bearer token and return its claims.
    pub fn validate_token(&self, token: &str) -> Result<Claims, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(iss) = &self.config.issuer {
            validation.set_issuer(&[iss]);
        }
        if let Some(aud) = &self.config.audience {
            validation.set_audience(&[aud]);
        }
        // When no audience is configured, `validation.aud` stays `None`, which
        // skips audience validation entirely (jsonwebtoken 8.x default).

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| ServiceError::Unauthorized(format!("invalid bearer token: {}", e)))?;

        Ok(data.claims)
    }

    /// Issue a token for the given user. Used by first-party clients and the
    /// test harness.
    pub fn issue_token(&self, user_id: Uuid, email: Option<String>) -> Result<String, ServiceError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            email,
            exp: now + self.config.token_ttl_secs,
            iat: now,
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| ServiceError::InternalError(format!("token creation failed: {}", e)))
    }
}

/// The owner of a cart, order or address: an authenticated user or a guest
/// identified by a client-supplied opaque token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerKey {
    User(Uuid),
    Guest(String),
}

impl OwnerKey {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            OwnerKey::User(id) => Some(*id),
            OwnerKey::Guest(_) => None,
        }
    }

    pub fn guest_id(&self) -> Option<&str> {
        match self {
            OwnerKey::User(_) => None,
            OwnerKey::Guest(id) => Some(id.as_str()),
        }
    }
}

/// Resolved request identity: an authenticated user, or a guest. Exactly one
/// of the two is present; a valid bearer identity always wins over a
/// simultaneously supplied guest id.
#[derive(Debug, Clone)]
pub struct ShopperIdentity {
    pub owner: OwnerKey,
    pub email: Option<String>,
    /// Guest id that accompanied an authenticated request, kept for cart
    /// merging on login.
    pub dormant_guest_id: Option<String>,
}

impl ShopperIdentity {
    pub fn is_guest(&self) -> bool {
        matches!(self.owner, OwnerKey::Guest(_))
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

fn guest_id_from(parts: &Parts) -> Option<String> {
    if let Some(id) = parts
        .headers
        .get(GUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some(id.to_string());
    }

    let cookies = parts.headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == GUEST_ID_COOKIE && !value.is_empty()).then(|| value.to_string())
    })
}

#[axum::async_trait]
impl FromRequestParts<AppState> for ShopperIdentity {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let guest_id = guest_id_from(parts);

        // A presented bearer token must be valid; a broken token is an error,
        // not a silent fall-through to guest.
        if let Some(token) = bearer_token(parts) {
            let claims = state.auth.validate_token(token)?;
            let user_id = Uuid::parse_str(&claims.sub).map_err(|_| {
                ServiceError::Unauthorized("bearer subject is not a valid user id".to_string())
            })?;

            return Ok(ShopperIdentity {
                owner: OwnerKey::User(user_id),
                email: claims.email,
                dormant_guest_id: guest_id,
            });
        }

        match guest_id {
            Some(id) => Ok(ShopperIdentity {
                owner: OwnerKey::Guest(id),
                email: None,
                dormant_guest_id: None,
            }),
            None => Err(ServiceError::Unauthorized(
                "no active session: supply a bearer token or guest id".to_string(),
            )),
        }
    }
}

/// Extractor for routes that require an authenticated (non-guest) caller.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: Option<String>,
    /// Guest id sent alongside the token, if any (used for cart merging).
    pub guest_id: Option<String>,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let identity = ShopperIdentity::from_request_parts(parts, state).await?;
        match identity.owner {
            OwnerKey::User(user_id) => Ok(AuthenticatedUser {
                user_id,
                email: identity.email,
                guest_id: identity.dormant_guest_id,
            }),
            OwnerKey::Guest(_) => Err(ServiceError::Unauthorized(
                "authentication required".to_string(),
            )),
        }
    }
}
