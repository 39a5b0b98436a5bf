//! JWT authentication middleware: token extraction via a configurable
//! `TokenLookup` (header/query/cookie), validation, and `Principal`
//! population on the request context.

use crate::config::AuthConfig;
use crate::context::{Context, Principal};
use crate::error::{Error, Result};
use crate::handler::{Middleware, Next};
use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub aud: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Parsed form of `AuthConfig::token_lookup` (`header:Name`, `query:Name`,
/// `cookie:Name`).
enum TokenLookup {
    Header(String),
    Query(String),
    Cookie(String),
}

fn parse_token_lookup(spec: &str) -> Result<TokenLookup> {
    let (kind, name) = spec
        .split_once(':')
        .ok_or_else(|| Error::Config(format!("invalid token_lookup spec: {spec}")))?;
    match kind {
        "header" => Ok(TokenLookup::Header(name.to_string())),
        "query" => Ok(TokenLookup::Query(name.to_string())),
        "cookie" => Ok(TokenLookup::Cookie(name.to_string())),
        other => Err(Error::Config(format!("unknown token_lookup kind: {other}"))),
    }
}

/// Parses the `Cookie` header and finds `name`: trims optional quotes,
/// rejects a missing `=`, rejects values over 8 KiB.
fn extract_cookie(cookie_header: &str, name: &str) -> Option<String> {
    for pair in cookie_header.split(';') {
        let pair = pair.trim();
        let (key, value) = pair.split_once('=')?;
        if key.trim() == name {
            let value = value.trim().trim_matches('"');
            if value.len() > 8192 {
                return None;
            }
            return Some(value.to_string());
        }
    }
    None
}

fn is_base64url_token(token: &str) -> bool {
    let parts: Vec<&str> = token.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'))
}

fn algorithm_family(alg: Algorithm) -> &'static str {
    match alg {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => "HMAC",
        Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => "RSA",
        Algorithm::ES256 | Algorithm::ES384 => "EC",
        _ => "other",
    }
}

/// A caller-supplied check run last, after the token has verified and
/// `Principal` population would otherwise succeed; returning `Err` fails
/// the request same as a bad signature would.
pub type ClaimsValidator = Box<dyn Fn(&Claims, &Context) -> Result<()> + Send + Sync>;
/// Transforms any authentication failure (missing/malformed token, bad
/// signature, expired claim, or a failed [`ClaimsValidator`]) before it is
/// returned to the caller.
pub type AuthErrorHandler = Box<dyn Fn(Error) -> Error + Send + Sync>;

pub struct Auth {
    config: AuthConfig,
    decoding_key: DecodingKey,
    validation: Validation,
    algorithm: Algorithm,
    validator: Option<ClaimsValidator>,
    error_handler: Option<AuthErrorHandler>,
}

impl Auth {
    pub fn new(config: AuthConfig, secret_or_public_key: &[u8]) -> Result<Self> {
        let algorithm = match config.algorithm.to_uppercase().as_str() {
            "HS256" => Algorithm::HS256,
            "HS384" => Algorithm::HS384,
            "HS512" => Algorithm::HS512,
            "RS256" => Algorithm::RS256,
            "RS384" => Algorithm::RS384,
            "RS512" => Algorithm::RS512,
            other => return Err(Error::Config(format!("unsupported JWT algorithm: {other}"))),
        };

        let decoding_key = match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                DecodingKey::from_secret(secret_or_public_key)
            }
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => {
                DecodingKey::from_rsa_pem(secret_or_public_key)?
            }
            _ => unreachable!("matched above"),
        };

        let mut validation = Validation::new(algorithm);
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }
        if let Some(audience) = &config.audience {
            validation.set_audience(&[audience]);
        }

        Ok(Self {
            config,
            decoding_key,
            validation,
            algorithm,
            validator: None,
            error_handler: None,
        })
    }

    /// Registers a check run after the token verifies, before the request
    /// is admitted. Runs last in the authentication chain.
    pub fn with_validator(mut self, f: impl Fn(&Claims, &Context) -> Result<()> + Send + Sync + 'static) -> Self {
        self.validator = Some(Box::new(f));
        self
    }

    /// Registers a handler that transforms any authentication failure
    /// before it reaches the caller (e.g. to fold several internal error
    /// variants into one public-facing error shape).
    pub fn with_error_handler(mut self, f: impl Fn(Error) -> Error + Send + Sync + 'static) -> Self {
        self.error_handler = Some(Box::new(f));
        self
    }

    fn extract_token(&self, ctx: &Context) -> Result<String> {
        let lookup = parse_token_lookup(&self.config.token_lookup)?;
        match lookup {
            TokenLookup::Header(name) => {
                let raw = ctx
                    .request
                    .header(&name)
                    .ok_or_else(|| Error::Unauthorized("missing auth header".into()))?;
                if name.eq_ignore_ascii_case("Authorization") {
                    raw.strip_prefix("Bearer ")
                        .map(str::to_string)
                        .ok_or_else(|| Error::Unauthorized("malformed Authorization header".into()))
                } else {
                    Ok(raw.to_string())
                }
            }
            TokenLookup::Query(name) => ctx
                .request
                .query(&name)
                .map(str::to_string)
                .ok_or_else(|| Error::Unauthorized("missing auth query parameter".into())),
            TokenLookup::Cookie(name) => {
                let cookie_header = ctx
                    .request
                    .header("Cookie")
                    .ok_or_else(|| Error::Unauthorized("missing Cookie header".into()))?;
                extract_cookie(cookie_header, &name)
                    .ok_or_else(|| Error::Unauthorized("auth cookie not found".into()))
            }
        }
    }

    fn validate(&self, token: &str) -> Result<Claims> {
        if !is_base64url_token(token) {
            return Err(Error::Unauthorized("malformed token".into()));
        }

        let header = jsonwebtoken::decode_header(token)?;
        if algorithm_family(header.alg) != algorithm_family(self.algorithm) {
            return Err(Error::Unauthorized("token algorithm family mismatch".into()));
        }

        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }
}

impl Auth {
    /// Extracts and verifies the token, populates `ctx`'s identity fields,
    /// then runs the caller-supplied [`ClaimsValidator`] (if any) last.
    fn authenticate(&self, ctx: &mut Context) -> Result<()> {
        let token = self.extract_token(ctx)?;
        let claims = self.validate(&token)?;

        let tenant_id = claims
            .extra
            .get(&self.config.tenant_claim)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| claims.tenant_id.clone())
            .unwrap_or_default();

        ctx.user_id = claims.sub.clone();
        ctx.tenant_id = tenant_id.clone();
        ctx.claims = claims.extra.clone();
        ctx.claims.insert("sub".to_string(), Value::String(claims.sub.clone()));

        ctx.principal = Some(Principal {
            user_id: claims.sub.clone(),
            tenant_id,
            account_id: claims.account_id.clone(),
            roles: claims.roles.clone(),
            scopes: claims.scopes.clone(),
            auth_method: Some(self.config.algorithm.clone()),
            issued_at: claims.iat,
            ip: ctx.request.client_ip().map(str::to_string),
            user_agent: ctx.request.header("User-Agent").map(str::to_string),
            request_id: Some(ctx.request_id.as_str().to_string()),
        });

        if let Some(validator) = &self.validator {
            validator(&claims, ctx)?;
        }

        Ok(())
    }
}

#[async_trait]
impl Middleware for Auth {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<()> {
        if let Err(err) = self.authenticate(ctx) {
            return Err(match &self.error_handler {
                Some(handler) => handler(err),
                None => err,
            });
        }

        next.run(ctx).await
    }
}
