use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AppError, AppResult};

/// Issuer stamped into every token this plane signs and required of every
/// token it accepts.
pub const TOKEN_ISSUER: &str = "api-control-plane";

/// Clear-text prefix length kept alongside the key hash for identification.
const KEY_PREFIX_LEN: usize = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
}

/// Signs and verifies bearer tokens with a process-wide HMAC secret.
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_ttl: Duration,
}

impl JwtManager {
    pub fn new(secret: &str, token_ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            token_ttl,
        }
    }

    pub fn generate(&self, user_id: &str, scopes: Vec<String>) -> AppResult<String> {
        let now = Utc::now();
        let claims = Claims {
            user_id: user_id.to_string(),
            scopes,
            exp: (now + self.token_ttl).timestamp(),
            iat: now.timestamp(),
            iss: TOKEN_ISSUER.to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        Ok(token)
    }

    /// Verifies signature, expiry, and issuer.
    pub fn verify(&self, token: &str) -> AppResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[TOKEN_ISSUER]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation)?;
        Ok(data.claims)
    }
}

/// Generates an opaque API key.
///
/// Returns `(raw_key, key_hash, prefix)`. The raw key is shown to the caller
/// exactly once and never persisted; only the SHA-256 hex hash and the short
/// clear prefix are stored.
pub fn generate_api_key() -> (String, String, String) {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);

    let raw_key = URL_SAFE.encode(bytes);
    let prefix = raw_key[..KEY_PREFIX_LEN].to_string();
    let key_hash = hash_api_key(&raw_key);

    (raw_key, key_hash, prefix)
}

/// SHA-256 hex digest of a raw key. Lookup and storage use this form only.
pub fn hash_api_key(raw_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_key.as_bytes());
    let digest = hasher.finalize();

    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn hash_password(password: &str) -> AppResult<String> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .map_err(|e| AppError::internal(format!("bcrypt hash failed: {}", e)))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}
