/*!
 * # Authentication and Authorization
 *
 * Bearer JWT authentication for the dispatch API. Tokens are HS256-signed and
 * carry a single role, canonicalized into [`Role`] at this boundary so the rest
 * of the crate never sees raw role labels.
 *
 * Route groups are gated with [`AuthRouterExt`]: `with_auth` only requires a
 * valid token, `with_roles` additionally restricts the caller's role.
 */

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::user::Role;
use crate::errors::ServiceError;

/// Claim structure for JWT tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,          // Subject (user ID)
    pub role: String,         // Role label, canonical or legacy
    pub name: Option<String>, // Display name
    pub jti: String,          // JWT ID
    pub iat: i64,             // Issued at
    pub exp: i64,             // Expiration time
    pub nbf: i64,             // Not valid before
    pub iss: String,          // Issuer
    pub aud: String,          // Audience
}

/// Authenticated caller extracted from the JWT token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: Role,
    pub name: Option<String>,
    pub token_id: String,
}

impl AuthUser {
    pub fn has_role(&self, role: Role) -> bool {
        self.role == role
    }

    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        roles.contains(&self.role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }

    /// Turns verified claims into a caller. Unknown roles and non-UUID subjects
    /// are treated as invalid tokens.
    pub fn from_claims(claims: Claims) -> Result<Self, AuthError> {
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidSubject)?;
        let role = Role::from_str(claims.role.trim())
            .map_err(|_| AuthError::UnknownRole(claims.role.clone()))?;

        Ok(Self {
            user_id,
            role,
            name: claims.name,
            token_id: claims.jti,
        })
    }
}

/// Authentication configuration
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_audience: String,
    pub jwt_issuer: String,
    pub access_token_expiration: Duration,
}

impl AuthConfig {
    pub fn new(
        jwt_secret: String,
        jwt_audience: String,
        jwt_issuer: String,
        access_token_expiration: Duration,
    ) -> Self {
        Self {
            jwt_secret,
            jwt_audience,
            jwt_issuer,
            access_token_expiration,
        }
    }
}

impl From<&AppConfig> for AuthConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self::new(
            cfg.jwt_secret.clone(),
            cfg.jwt_audience.clone(),
            cfg.jwt_issuer.clone(),
            Duration::from_secs(cfg.jwt_expiration as u64),
        )
    }
}

/// Issues and validates bearer tokens
#[derive(Debug, Clone)]
pub struct AuthService {
    pub config: AuthConfig,
}

impl AuthService {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Signs an access token for an identity. Used by tooling; the API has no login route.
    pub fn issue_token(
        &self,
        user_id: Uuid,
        role: Role,
        name: Option<String>,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let exp = now
            + ChronoDuration::from_std(self.config.access_token_expiration)
                .map_err(|_| AuthError::TokenCreation("Invalid token duration".to_string()))?;

        let claims = Claims {
            sub: user_id.to_string(),
            role: role.to_string(),
            name,
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            nbf: now.timestamp(),
            iss: self.config.jwt_issuer.clone(),
            aud: self.config.jwt_audience.clone(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenCreation(e.to_string()))
    }

    /// Validate a JWT token and extract the claims
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.config.jwt_issuer.as_str()]);
        validation.set_audience(&[self.config.jwt_audience.as_str()]);
        validation.validate_nbf = true;

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })?;

        Ok(data.claims)
    }

    /// Validates a raw token and resolves the caller in one step.
    pub fn authenticate(&self, token: &str) -> Result<AuthUser, AuthError> {
        AuthUser::from_claims(self.validate_token(token)?)
    }
}

/// Authentication error types
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing token")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token subject is not a valid user id")]
    InvalidSubject,

    #[error("Unknown role '{0}'")]
    UnknownRole(String),

    #[error("Insufficient role for this operation")]
    InsufficientRole,

    #[error("Token creation failed: {0}")]
    TokenCreation(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ServiceError::from(self).into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| ServiceError::Unauthenticated("Authentication required".to_string()))
    }
}

/// Role middleware: lets the request through only for the listed roles
pub async fn role_middleware(
    State(allowed): State<Arc<[Role]>>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .ok_or(AuthError::MissingToken)?;

    if !user.has_any_role(&allowed) {
        debug!(user_id = %user.user_id, role = %user.role, "Role not permitted on route");
        return Err(AuthError::InsufficientRole);
    }

    Ok(next.run(request).await)
}

/// Authentication middleware that extracts and validates bearer tokens
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let auth_service = match request.extensions().get::<Arc<AuthService>>() {
        Some(service) => service.clone(),
        None => {
            return ServiceError::InternalError(
                "Authentication service not available".to_string(),
            )
            .into_response();
        }
    };

    match extract_auth_from_headers(request.headers(), &auth_service) {
        Ok(user) => {
            let span = tracing::Span::current();
            span.record("user_id", tracing::field::display(user.user_id));
            span.record("role", tracing::field::display(user.role));
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => {
            warn!(error = %e, "Rejected request at access gate");
            e.into_response()
        }
    }
}

/// Extract the bearer token from request headers and authenticate it
fn extract_auth_from_headers(
    headers: &HeaderMap,
    auth_service: &AuthService,
) -> Result<AuthUser, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    let token = value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)?;

    auth_service.authenticate(token)
}

/// Extension methods for Router to add auth middleware
pub trait AuthRouterExt {
    fn with_auth(self) -> Self;
    fn with_roles(self, roles: &[Role]) -> Self;
}

impl<S> AuthRouterExt for axum::Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_auth(self) -> Self {
        self.layer(axum::middleware::from_fn(auth_middleware))
    }

    fn with_roles(self, roles: &[Role]) -> Self {
        let allowed: Arc<[Role]> = roles.into();
        self.layer(axum::middleware::from_fn_with_state(allowed, role_middleware))
            .with_auth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;

    fn service() -> AuthService {
        AuthService::new(AuthConfig::new(
            "a-test-secret-that-is-long-enough-0123456789".to_string(),
            "dispatch-api".to_string(),
            "dispatch-auth".to_string(),
            Duration::from_secs(3600),
        ))
    }

    fn sign(svc: &AuthService, claims: &Claims) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(svc.config.jwt_secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims_for(svc: &AuthService, sub: &str, role: &str, exp_offset: i64) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            sub: sub.to_string(),
            role: role.to_string(),
            name: None,
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + exp_offset,
            nbf: now - 10,
            iss: svc.config.jwt_issuer.clone(),
            aud: svc.config.jwt_audience.clone(),
        }
    }

    #[test]
    fn issued_token_authenticates() {
        let svc = service();
        let id = Uuid::new_v4();
        let token = svc
            .issue_token(id, Role::Delivery, Some("Ravi".into()))
            .unwrap();
        let user = svc.authenticate(&token).unwrap();
        assert_eq!(user.user_id, id);
        assert_eq!(user.role, Role::Delivery);
        assert_eq!(user.name.as_deref(), Some("Ravi"));
    }

    #[rstest]
    #[case("customer", Role::Customer)]
    #[case("user", Role::Customer)]
    #[case("shop", Role::Shop)]
    #[case("delivery", Role::Delivery)]
    #[case("agent", Role::Delivery)]
    #[case("admin", Role::Admin)]
    #[case("Admin", Role::Admin)]
    fn role_labels_are_canonicalized(#[case] label: &str, #[case] expected: Role) {
        let svc = service();
        let token = sign(&svc, &claims_for(&svc, &Uuid::new_v4().to_string(), label, 600));
        assert_eq!(svc.authenticate(&token).unwrap().role, expected);
    }

    #[test]
    fn unknown_role_is_rejected() {
        let svc = service();
        let token = sign(
            &svc,
            &claims_for(&svc, &Uuid::new_v4().to_string(), "superuser", 600),
        );
        assert_matches!(svc.authenticate(&token), Err(AuthError::UnknownRole(_)));
    }

    #[test]
    fn non_uuid_subject_is_rejected() {
        let svc = service();
        let token = sign(&svc, &claims_for(&svc, "not-a-uuid", "customer", 600));
        assert_matches!(svc.authenticate(&token), Err(AuthError::InvalidSubject));
    }

    #[test]
    fn expired_token_is_rejected() {
        let svc = service();
        let token = sign(
            &svc,
            &claims_for(&svc, &Uuid::new_v4().to_string(), "customer", -3600),
        );
        assert_matches!(svc.validate_token(&token), Err(AuthError::TokenExpired));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let svc = service();
        let other = AuthService::new(AuthConfig {
            jwt_secret: "some-other-secret-that-is-long-enough-xyz".to_string(),
            ..svc.config.clone()
        });
        let token = other
            .issue_token(Uuid::new_v4(), Role::Admin, None)
            .unwrap();
        assert_matches!(svc.validate_token(&token), Err(AuthError::InvalidToken));
    }

    #[test]
    fn wrong_audience_is_rejected() {
        let svc = service();
        let mut claims = claims_for(&svc, &Uuid::new_v4().to_string(), "admin", 600);
        claims.aud = "someone-else".to_string();
        let token = sign(&svc, &claims);
        assert_matches!(svc.validate_token(&token), Err(AuthError::InvalidToken));
    }

    #[test]
    fn header_without_bearer_prefix_is_missing_token() {
        let svc = service();
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_matches!(
            extract_auth_from_headers(&headers, &svc),
            Err(AuthError::MissingToken)
        );

        let empty = HeaderMap::new();
        assert_matches!(
            extract_auth_from_headers(&empty, &svc),
            Err(AuthError::MissingToken)
        );
    }

    #[test]
    fn has_any_role_checks_membership() {
        let user = AuthUser {
            user_id: Uuid::new_v4(),
            role: Role::Shop,
            name: None,
            token_id: "t".into(),
        };
        assert!(user.has_any_role(&[Role::Admin, Role::Shop]));
        assert!(!user.has_any_role(&[Role::Customer, Role::Delivery]));
        assert!(!user.is_admin());
    }
}
