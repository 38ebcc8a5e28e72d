//! Bearer token verification.
//!
//! Identity lives outside this service; a signed token carries the actor's
//! role and scope, and [`TokenVerifier`] turns it back into an [`Actor`].

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SecurityConfig;
use crate::error::{Error, Result};
use crate::models::incident::location_key;
use crate::models::{Actor, Permission, Role, Scope};

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    pub name: String,
    pub role: String,
    pub institution: String,
    /// Spatial keys; empty means institution-wide
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    /// Expiration time (Unix timestamp)
    pub exp: usize,
    /// Issued at (Unix timestamp)
    pub iat: usize,
}

impl Claims {
    pub fn user_id(&self) -> std::result::Result<Uuid, uuid::Error> {
        Uuid::parse_str(&self.sub)
    }
}

pub struct TokenVerifier {
    config: SecurityConfig,
}

impl TokenVerifier {
    pub fn new(config: SecurityConfig) -> Self {
        Self { config }
    }

    /// Sign a token for `actor`; used by operators and tests
    pub fn issue(&self, actor: &Actor, ttl: Duration) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: actor.id.to_string(),
            name: actor.name.clone(),
            role: actor.role.to_string(),
            institution: actor.scope.institution.clone(),
            locations: actor.scope.locations.clone(),
            permissions: actor.permissions.clone(),
            exp: (now + ttl).timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| Error::Internal(format!("Failed to generate JWT token: {}", e)))
    }

    /// Validate a token and rebuild the actor it describes
    pub fn verify(&self, token: &str) -> Result<Actor> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| Error::Authorization(format!("Invalid token: {}", e)))?;
        let claims = data.claims;

        let id = claims
            .user_id()
            .map_err(|e| Error::Authorization(format!("Invalid user ID in token: {}", e)))?;
        let role = Role::parse(&claims.role)
            .ok_or_else(|| Error::Authorization(format!("Unknown role in token: {}", claims.role)))?;

        Ok(Actor {
            id,
            name: claims.name,
            role,
            scope: Scope {
                institution: claims.institution,
                locations: claims.locations.iter().map(|l| location_key(l)).collect(),
            },
            permissions: claims.permissions,
        })
    }

    /// Strip the `Bearer ` prefix of an Authorization header value
    pub fn bearer(header: &str) -> Option<&str> {
        header.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier(secret: &str) -> TokenVerifier {
        TokenVerifier::new(SecurityConfig {
            jwt_secret: secret.to_string(),
        })
    }

    #[test]
    fn issued_tokens_restore_the_actor() -> anyhow::Result<()> {
        let actor = Actor::new("Bola", Role::Manager, Scope::with_locations("unilag", &["block-b"]))
            .with_permission(Permission::UnlockEvidence);
        let verifier = verifier("s3cret");

        let token = verifier.issue(&actor, Duration::minutes(5))?;
        assert_eq!(verifier.verify(&token)?, actor);
        Ok(())
    }

    #[test]
    fn foreign_and_expired_tokens_are_refused() -> anyhow::Result<()> {
        let actor = Actor::new("Dayo", Role::Admin, Scope::institution("unilag"));
        let token = verifier("other").issue(&actor, Duration::minutes(5))?;
        assert!(matches!(verifier("s3cret").verify(&token), Err(Error::Authorization(_))));

        let expired = verifier("s3cret").issue(&actor, Duration::hours(-2))?;
        assert!(verifier("s3cret").verify(&expired).is_err());
        Ok(())
    }

    #[test]
    fn token_locations_are_keyed() -> anyhow::Result<()> {
        let mut actor = Actor::new("Emeka", Role::Manager, Scope::institution("unilag"));
        actor.scope.locations = vec!["Main Library (2nd floor)".to_string()];
        let verifier = verifier("s3cret");

        let restored = verifier.verify(&verifier.issue(&actor, Duration::minutes(5))?)?;
        assert_eq!(restored.scope.locations, vec!["main-library".to_string()]);
        Ok(())
    }

    #[test]
    fn bearer_prefix_is_required() {
        assert_eq!(TokenVerifier::bearer("Bearer abc"), Some("abc"));
        assert_eq!(TokenVerifier::bearer("abc"), None);
        assert_eq!(TokenVerifier::bearer("Bearer "), None);
    }
}
