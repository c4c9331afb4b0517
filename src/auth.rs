use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use axum::http::{header::AUTHORIZATION, HeaderMap};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::AppError;

const HASH_SCHEME: &str = "sha256";

/// Bearer tokens issued by `/users/token`, held in memory until they expire.
#[derive(Debug)]
pub struct TokenRegistry {
    ttl: Duration,
    tokens: Mutex<HashMap<String, IssuedToken>>,
}

#[derive(Debug, Clone)]
struct IssuedToken {
    user_id: i64,
    expires_at: Instant,
}

impl TokenRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub async fn issue(&self, user_id: i64) -> String {
        let token = format!("tok_{}", Uuid::new_v4().simple());
        let now = Instant::now();
        let mut tokens = self.tokens.lock().await;
        tokens.retain(|_, issued| issued.expires_at > now);
        tokens.insert(
            token.clone(),
            IssuedToken {
                user_id,
                expires_at: now + self.ttl,
            },
        );
        token
    }

    /// Resolves the `Authorization: Bearer` header to a user id.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<i64, AppError> {
        let token = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| {
                value
                    .strip_prefix("Bearer ")
                    .or_else(|| value.strip_prefix("bearer "))
            })
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AppError::Unauthorized("Not authenticated".to_owned()))?;

        let mut tokens = self.tokens.lock().await;
        match tokens.get(token).cloned() {
            Some(issued) if issued.expires_at > Instant::now() => Ok(issued.user_id),
            Some(_) => {
                tokens.remove(token);
                Err(AppError::Unauthorized("Token has expired".to_owned()))
            }
            None => Err(AppError::Unauthorized(
                "Could not validate credentials".to_owned(),
            )),
        }
    }
}

/// Salted digest stored as `sha256$<salt>$<hex>`.
pub fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    let digest = salted_digest(&salt, password);
    format!("{HASH_SCHEME}${salt}${digest}")
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(HASH_SCHEME), Some(salt), Some(digest)) => salted_digest(salt, password) == digest,
        _ => false,
    }
}

fn salted_digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex_digest(hasher.finalize().as_ref())
}

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

fn hex_digest(bytes: &[u8]) -> String {
    bytes
        .iter()
        .flat_map(|byte| [byte >> 4, byte & 0x0f])
        .map(|nibble| char::from(HEX_DIGITS[usize::from(nibble)]))
        .collect()
}
