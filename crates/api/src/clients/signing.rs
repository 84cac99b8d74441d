//! HMAC-signed task keys and log URLs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use spool_core::types::DbId;
use spool_engine::ports::{CredentialIssuer, LogStorage};
use spool_engine::EngineResult;

type HmacSha256 = Hmac<Sha256>;

/// Signs messages with a shared secret, stamping an expiry `ttl` from now.
#[derive(Clone)]
pub struct Signer {
    secret: Arc<[u8]>,
    ttl: Duration,
}

impl Signer {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            secret: Arc::from(secret.as_bytes()),
            ttl,
        }
    }

    /// Unix time at which a signature made now expires.
    pub fn expires_at(&self) -> i64 {
        Utc::now().timestamp() + self.ttl.as_secs() as i64
    }

    /// Lowercase hex HMAC-SHA256 of `message`.
    pub fn sign(&self, message: &str) -> String {
        // HMAC accepts keys of any length, so this never fails.
        let mut mac = match HmacSha256::new_from_slice(&self.secret) {
            Ok(mac) => mac,
            Err(_) => return String::new(),
        };
        mac.update(message.as_bytes());
        format!("{:x}", mac.finalize().into_bytes())
    }

    pub fn verify(&self, message: &str, signature: &str) -> bool {
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.secret) else {
            return false;
        };
        mac.update(message.as_bytes());
        let Some(bytes) = decode_hex(signature) else {
            return false;
        };
        mac.verify_slice(&bytes).is_ok()
    }
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

// ---------------------------------------------------------------------------
// Task keys
// ---------------------------------------------------------------------------

/// Issues `<role>.<project>.<expires>.<signature>` keys.
pub struct HmacCredentialIssuer {
    signer: Signer,
}

impl HmacCredentialIssuer {
    pub fn new(signer: Signer) -> Self {
        Self { signer }
    }
}

#[async_trait]
impl CredentialIssuer for HmacCredentialIssuer {
    async fn signing_key(&self, project_id: DbId, role: &str) -> EngineResult<String> {
        let claims = format!("{role}.{project_id}.{}", self.signer.expires_at());
        let signature = self.signer.sign(&claims);
        Ok(format!("{claims}.{signature}"))
    }
}

// ---------------------------------------------------------------------------
// Log storage
// ---------------------------------------------------------------------------

/// Presigned `PUT` URLs under a log storage base URL.
pub struct SignedLogStorage {
    base_url: String,
    signer: Signer,
}

impl SignedLogStorage {
    pub fn new(base_url: &str, signer: Signer) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            signer,
        }
    }
}

#[async_trait]
impl LogStorage for SignedLogStorage {
    async fn signed_url(&self, path: &str) -> EngineResult<String> {
        let path = path.trim_start_matches('/');
        let expires = self.signer.expires_at();
        let signature = self.signer.sign(&format!("PUT\n/{path}\n{expires}"));
        Ok(format!(
            "{}/{path}?expires={expires}&signature={signature}",
            self.base_url
        ))
    }
}
