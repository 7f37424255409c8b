//! Bearer token identity.
//!
//! Access tokens are HS256 JWTs carrying the user id (`sub`), e-mail address and roles. [`AuthenticatedCaller`]
//! extracts and validates the token from the `Authorization` header and hands the engine a [`Caller`].
use std::future::{ready, Ready};

use actix_web::{dev::Payload, http::header, web, FromRequest, HttpRequest};
use billing_engine::Caller;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::*;
use serde::{Deserialize, Serialize};

use crate::{config::AuthConfig, errors::ServerError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub exp: i64,
}

impl JwtClaims {
    pub fn for_caller(caller: &Caller, expires_in: Duration) -> Self {
        Self {
            sub: caller.user_id.to_string(),
            email: caller.email.clone(),
            roles: caller.roles.clone(),
            exp: (Utc::now() + expires_in).timestamp(),
        }
    }
}

impl TryFrom<JwtClaims> for Caller {
    type Error = ServerError;

    fn try_from(claims: JwtClaims) -> Result<Self, Self::Error> {
        let user_id = claims.sub.parse::<i64>().map_err(|_| {
            debug!("💻️ Access token subject '{}' is not a user id", claims.sub);
            ServerError::Unauthorized
        })?;
        Ok(Caller { user_id, email: claims.email, roles: claims.roles })
    }
}

pub struct TokenIssuer {
    key: EncodingKey,
    lifetime: Duration,
}

impl TokenIssuer {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            key: EncodingKey::from_secret(config.jwt_secret.reveal().as_bytes()),
            lifetime: Duration::hours(config.token_lifetime_hours),
        }
    }

    /// Issues an access token for `caller`. The caller's identity is NOT checked here.
    pub fn issue_token(&self, caller: &Caller) -> Result<String, ServerError> {
        let claims = JwtClaims::for_caller(caller, self.lifetime);
        encode(&Header::new(Algorithm::HS256), &claims, &self.key)
            .map_err(|e| ServerError::CouldNotIssueAccessToken(e.to_string()))
    }
}

pub struct TokenValidator {
    key: DecodingKey,
    validation: Validation,
}

impl TokenValidator {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self { key: DecodingKey::from_secret(config.jwt_secret.reveal().as_bytes()), validation }
    }

    pub fn validate(&self, token: &str) -> Result<Caller, ServerError> {
        let data = decode::<JwtClaims>(token, &self.key, &self.validation).map_err(|e| {
            debug!("💻️ Access token rejected. {e}");
            ServerError::Unauthorized
        })?;
        Caller::try_from(data.claims)
    }
}

/// The caller behind an authenticated request. Requests without a valid bearer token are rejected with 401.
#[derive(Debug, Clone)]
pub struct AuthenticatedCaller(pub Caller);

impl FromRequest for AuthenticatedCaller {
    type Error = ServerError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authenticate(req).map(AuthenticatedCaller))
    }
}

fn authenticate(req: &HttpRequest) -> Result<Caller, ServerError> {
    let validator = req.app_data::<web::Data<TokenValidator>>().ok_or_else(|| {
        error!("💻️ No token validator has been registered with the app. All authenticated requests will fail.");
        ServerError::Unauthorized
    })?;
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            trace!("💻️ Request to {} has no bearer token", req.path());
            ServerError::Unauthorized
        })?;
    validator.validate(token)
}
