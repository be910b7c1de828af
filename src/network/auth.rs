//! Handshake Authentication
//!
//! Resolves the display name a connection acts under. Tokens are issued by
//! the account service; this server only validates them. The display name
//! is the `name` claim, falling back to `sub`.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Query parameter carrying the bearer token.
pub const TOKEN_PARAM: &str = "access_token";

/// Query parameter carrying a plain nickname (development mode only).
pub const NICKNAME_PARAM: &str = "nickname";

/// Authentication configuration.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Expected issuer claim ("iss"). If None, any issuer accepted.
    pub issuer: Option<String>,
    /// Expected audience claim ("aud"). If None, any audience accepted.
    pub audience: Option<String>,
    /// RS256 public key in PEM format.
    pub public_key_pem: Option<String>,
    /// HS256 shared secret.
    pub secret: Option<String>,
    /// Skip expiry validation (testing only).
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Create config from `AUTH_*` environment variables.
    pub fn from_env() -> Self {
        let flag = |name: &str| {
            std::env::var(name)
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false)
        };

        Self {
            issuer: std::env::var("AUTH_ISSUER").ok(),
            audience: std::env::var("AUTH_AUDIENCE").ok(),
            public_key_pem: std::env::var("AUTH_PUBLIC_KEY_PEM").ok(),
            secret: std::env::var("AUTH_SECRET").ok(),
            skip_expiry: flag("AUTH_SKIP_EXPIRY"),
        }
    }

    /// Whether a verification key is configured.
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }
}

/// Claims read from an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (account id).
    pub sub: String,
    /// Account display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Expiry timestamp (Unix seconds).
    #[serde(default)]
    pub exp: u64,
    /// Issued at timestamp.
    #[serde(default)]
    pub iat: u64,
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience.
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
}

impl TokenClaims {
    /// Name the connection acts under.
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.sub,
        }
    }
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No verification key configured.
    #[error("authentication not configured")]
    NotConfigured,
    /// Neither a token nor an accepted nickname was supplied.
    #[error("missing credentials")]
    MissingCredentials,
    /// Token format is invalid.
    #[error("invalid token format")]
    InvalidFormat,
    /// Token signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token has expired.
    #[error("token expired")]
    Expired,
    /// Issuer claim mismatch.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Audience claim mismatch.
    #[error("invalid audience")]
    InvalidAudience,
    /// Required claim is missing.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// Other decoding failure.
    #[error("decode error: {0}")]
    DecodeError(String),
}

/// Validate a token and extract its claims.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    let (key, algorithm) = if let Some(ref pem) = config.public_key_pem {
        let key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| AuthError::DecodeError(format!("invalid public key: {}", e)))?;
        (key, Algorithm::RS256)
    } else if let Some(ref secret) = config.secret {
        (DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256)
    } else {
        return Err(AuthError::NotConfigured);
    };

    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims = std::collections::HashSet::new();
    if let Some(ref issuer) = config.issuer {
        validation.set_issuer(&[issuer]);
    }
    match config.audience {
        Some(ref audience) => validation.set_audience(&[audience]),
        None => validation.validate_aud = false,
    }
    if config.skip_expiry {
        validation.validate_exp = false;
    }

    let claims = decode::<TokenClaims>(token, &key, &validation)
        .map_err(map_jwt_error)?
        .claims;

    if claims.sub.is_empty() {
        return Err(AuthError::MissingClaim("sub".into()));
    }

    // jsonwebtoken applies leeway; enforce the hard deadline too
    if !config.skip_expiry && claims.exp > 0 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if now > claims.exp {
            return Err(AuthError::Expired);
        }
    }

    Ok(claims)
}

/// Resolve the display name from a handshake query string.
///
/// A token wins over a nickname. Nicknames are honoured only while no
/// verification key is configured (development mode).
pub fn resolve_display_name(query: Option<&str>, config: &AuthConfig) -> Result<String, AuthError> {
    let token = query_param(query, TOKEN_PARAM);
    let nickname = query_param(query, NICKNAME_PARAM);

    match (token, nickname) {
        (Some(token), _) => validate_token(&token, config).map(|c| c.display_name().to_string()),
        (None, Some(nickname)) if !config.is_configured() && !nickname.trim().is_empty() => {
            Ok(nickname)
        }
        _ => Err(AuthError::MissingCredentials),
    }
}

/// First value of `key` in a `a=1&b=2` query string, percent-decoded.
pub fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    form_urlencoded::parse(query?.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => AuthError::InvalidFormat,
        _ => AuthError::DecodeError(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "duel-test-secret-256-bits-long!!";

    fn sign(claims: &TokenClaims) -> String {
        encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(SECRET.as_bytes()))
            .unwrap()
    }

    fn claims(name: Option<&str>) -> TokenClaims {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        TokenClaims {
            sub: "acct-42".into(),
            name: name.map(String::from),
            exp: now + 3600,
            iat: now,
            iss: Some("accounts".into()),
            aud: None,
        }
    }

    fn config() -> AuthConfig {
        AuthConfig {
            secret: Some(SECRET.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_name_claim_preferred() {
        let token = sign(&claims(Some("Alice")));
        let validated = validate_token(&token, &config()).unwrap();
        assert_eq!(validated.display_name(), "Alice");

        let token = sign(&claims(None));
        assert_eq!(validate_token(&token, &config()).unwrap().display_name(), "acct-42");

        let token = sign(&claims(Some("  ")));
        assert_eq!(validate_token(&token, &config()).unwrap().display_name(), "acct-42");
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut c = claims(None);
        c.exp = 1;
        let result = validate_token(&sign(&c), &config());
        assert!(matches!(result, Err(AuthError::Expired)));

        let relaxed = AuthConfig { skip_expiry: true, ..config() };
        assert!(validate_token(&sign(&c), &relaxed).is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let wrong = AuthConfig {
            secret: Some("another-secret-entirely-here!!!!".into()),
            ..Default::default()
        };
        let result = validate_token(&sign(&claims(None)), &wrong);
        assert!(matches!(result, Err(AuthError::InvalidSignature)));
    }

    #[test]
    fn test_issuer_and_subject_checked() {
        let strict = AuthConfig { issuer: Some("elsewhere".into()), ..config() };
        assert!(matches!(
            validate_token(&sign(&claims(None)), &strict),
            Err(AuthError::InvalidIssuer)
        ));

        let mut c = claims(None);
        c.sub = String::new();
        assert!(matches!(validate_token(&sign(&c), &config()), Err(AuthError::MissingClaim(_))));
    }

    #[test]
    fn test_not_configured() {
        let result = validate_token("a.b.c", &AuthConfig::default());
        assert!(matches!(result, Err(AuthError::NotConfigured)));
    }

    #[test]
    fn test_resolve_from_query() {
        let token = sign(&claims(Some("Alice")));
        let query = format!("access_token={}&nickname=Mallory", token);
        assert_eq!(resolve_display_name(Some(&query), &config()).unwrap(), "Alice");

        assert!(matches!(
            resolve_display_name(Some("nickname=Bob"), &config()),
            Err(AuthError::MissingCredentials)
        ));
        assert!(matches!(resolve_display_name(None, &config()), Err(AuthError::MissingCredentials)));

        let dev = AuthConfig::default();
        assert_eq!(resolve_display_name(Some("nickname=Bob%20the+Great"), &dev).unwrap(), "Bob the Great");
        assert!(resolve_display_name(Some("nickname="), &dev).is_err());
    }

    #[test]
    fn test_query_param_decoding() {
        assert_eq!(query_param(Some("a=1&b=%D0%AF"), "b").as_deref(), Some("Я"));
        assert_eq!(query_param(Some("a=100%"), "a").as_deref(), Some("100%"));
        assert_eq!(query_param(Some("a=1"), "b"), None);
    }
}
