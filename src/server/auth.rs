/**
 * API-Key Authentication
 *
 * Keys are `lore_sk_` + 32 random hex characters. The server stores only
 * the SHA-256 hex digest plus a 12-character display prefix; the secret
 * leaves the server exactly once, in the creation response.
 *
 * A process-local cache keyed by digest dampens hot-path database load
 * with a short TTL; revocation invalidates its entry eagerly, so a
 * revoked key stops working immediately rather than at TTL expiry.
 */

use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Characters of the secret kept for display ("lore_sk_" + 4 hex).
pub const KEY_PREFIX_LEN: usize = 12;

pub struct GeneratedKey {
    /// Full secret, shown once.
    pub secret: String,
    /// SHA-256 hex digest, the stored credential.
    pub hash: String,
    /// Display prefix for key listings.
    pub prefix: String,
}

/// Mint a fresh API key.
pub fn generate_key() -> GeneratedKey {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let secret = format!("lore_sk_{}", hex::encode(bytes));
    GeneratedKey {
        hash: hash_key(&secret),
        prefix: secret[..KEY_PREFIX_LEN].to_string(),
        secret,
    }
}

/// Digest a presented secret for lookup; constant shape, no salting, so
/// the digest itself is the index key.
pub fn hash_key(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// The resolved identity behind a request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub key_id: Uuid,
    pub org_id: Uuid,
    /// Some = the key only sees this project; lessons outside it behave
    /// as absent.
    pub project: Option<String>,
    pub is_root: bool,
}

struct CacheEntry {
    context: AuthContext,
    inserted_at: Instant,
}

/// TTL cache keyed by key digest.
pub struct AuthCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl AuthCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, hash: &str) -> Option<AuthContext> {
        let entries = self.entries.read().unwrap();
        entries
            .get(hash)
            .filter(|entry| entry.inserted_at.elapsed() < self.ttl)
            .map(|entry| entry.context.clone())
    }

    pub fn insert(&self, hash: String, context: AuthContext) {
        let mut entries = self.entries.write().unwrap();
        entries.insert(
            hash,
            CacheEntry {
                context,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Eager invalidation on key revocation.
    pub fn invalidate(&self, hash: &str) {
        self.entries.write().unwrap().remove(hash);
    }
}

/// Extract the bearer token from an Authorization header value.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    header
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> AuthContext {
        AuthContext {
            key_id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            project: None,
            is_root: false,
        }
    }

    #[test]
    fn test_key_format() {
        let key = generate_key();
        assert!(key.secret.starts_with("lore_sk_"));
        assert_eq!(key.secret.len(), "lore_sk_".len() + 32);
        assert!(key.secret["lore_sk_".len()..]
            .chars()
            .all(|c| c.is_ascii_hexdigit()));

        assert_eq!(key.prefix.len(), KEY_PREFIX_LEN);
        assert!(key.secret.starts_with(&key.prefix));
        assert_eq!(key.hash, hash_key(&key.secret));
        assert_eq!(key.hash.len(), 64);
    }

    #[test]
    fn test_keys_are_unique() {
        let a = generate_key();
        let b = generate_key();
        assert_ne!(a.secret, b.secret);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash_key("lore_sk_abc"), hash_key("lore_sk_abc"));
        assert_ne!(hash_key("lore_sk_abc"), hash_key("lore_sk_abd"));
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(Some("Bearer lore_sk_x")), Some("lore_sk_x"));
        assert_eq!(bearer_token(Some("Basic dXNlcg==")), None);
        assert_eq!(bearer_token(Some("Bearer ")), None);
        assert_eq!(bearer_token(None), None);
    }

    #[test]
    fn test_cache_hit_and_ttl_expiry() {
        let cache = AuthCache::new(Duration::from_millis(40));
        cache.insert("h".to_string(), context());
        assert!(cache.get("h").is_some());

        std::thread::sleep(Duration::from_millis(60));
        assert!(cache.get("h").is_none());
    }

    #[test]
    fn test_cache_invalidation() {
        let cache = AuthCache::new(Duration::from_secs(60));
        cache.insert("h".to_string(), context());
        cache.invalidate("h");
        assert!(cache.get("h").is_none());
    }
}
