//! Single-use, TTL-bounded nonces.
//!
//! Two independent namespaces share the store without sharing a key space:
//! login challenges (5 minute TTL) and payment anti-replay nonces (1 hour
//! TTL). `consume` is atomic: under concurrent attempts on the same token,
//! exactly one caller wins.

use async_trait::async_trait;
use rand::RngCore;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

/// The two nonce key spaces. TTLs are fixed per namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceNamespace {
    Login,
    Payment,
}

impl NonceNamespace {
    fn prefix(&self) -> &'static str {
        match self {
            NonceNamespace::Login => "nonce:login:",
            NonceNamespace::Payment => "nonce:payment:",
        }
    }

    fn ttl_seconds(&self) -> u64 {
        match self {
            NonceNamespace::Login => 5 * 60,
            NonceNamespace::Payment => 60 * 60,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NonceError {
    #[error("nonce store unavailable: {0}")]
    Store(#[from] redis::RedisError),
}

/// One-shot token store. `generate` mints a pending token; `consume` flips
/// it to used and reports whether this caller made the transition.
#[async_trait]
pub trait NonceStore: Send + Sync {
    async fn generate(&self, namespace: NonceNamespace) -> Result<String, NonceError>;
    async fn consume(&self, namespace: NonceNamespace, token: &str) -> Result<bool, NonceError>;
    async fn is_valid(&self, namespace: NonceNamespace, token: &str) -> Result<bool, NonceError>;
    async fn invalidate(&self, namespace: NonceNamespace, token: &str) -> Result<(), NonceError>;
    async fn count_active(&self, namespace: NonceNamespace) -> Result<usize, NonceError>;
}

/// 32 bytes of CSPRNG output, 0x-prefixed hex. Doubles as an EIP-3009
/// `bytes32` nonce in the payment namespace.
pub fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    format!("0x{}", hex::encode(bytes))
}

/// Redis-backed store. Expiry is enforced by the store (`SET .. EX`), and
/// the pending→used transition rides on `GETDEL`'s atomicity.
#[derive(Clone)]
pub struct RedisNonceStore {
    connection: ConnectionManager,
}

impl RedisNonceStore {
    pub async fn connect(url: &str) -> Result<Self, NonceError> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self { connection })
    }

    fn key(namespace: NonceNamespace, token: &str) -> String {
        format!("{}{}", namespace.prefix(), token)
    }
}

#[async_trait]
impl NonceStore for RedisNonceStore {
    async fn generate(&self, namespace: NonceNamespace) -> Result<String, NonceError> {
        let mut connection = self.connection.clone();
        // Collisions over 256 bits are not a practical concern, but NX keeps
        // the invariant honest.
        loop {
            let token = random_token();
            let key = Self::key(namespace, &token);
            let set: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg("pending")
                .arg("EX")
                .arg(namespace.ttl_seconds())
                .arg("NX")
                .query_async(&mut connection)
                .await?;
            if set.is_some() {
                return Ok(token);
            }
        }
    }

    async fn consume(&self, namespace: NonceNamespace, token: &str) -> Result<bool, NonceError> {
        let mut connection = self.connection.clone();
        let key = Self::key(namespace, token);
        let taken: Option<String> = redis::cmd("GETDEL")
            .arg(&key)
            .query_async(&mut connection)
            .await?;
        Ok(taken.is_some())
    }

    async fn is_valid(&self, namespace: NonceNamespace, token: &str) -> Result<bool, NonceError> {
        let mut connection = self.connection.clone();
        let key = Self::key(namespace, token);
        let exists: bool = connection.exists(&key).await?;
        Ok(exists)
    }

    async fn invalidate(&self, namespace: NonceNamespace, token: &str) -> Result<(), NonceError> {
        let mut connection = self.connection.clone();
        let key = Self::key(namespace, token);
        let _: u64 = connection.del(&key).await?;
        Ok(())
    }

    async fn count_active(&self, namespace: NonceNamespace) -> Result<usize, NonceError> {
        let mut connection = self.connection.clone();
        let pattern = format!("{}*", namespace.prefix());
        let mut iter = connection.scan_match::<_, String>(&pattern).await?;
        let mut count = 0usize;
        while iter.next_item().await.is_some() {
            count += 1;
        }
        Ok(count)
    }
}

/// In-memory store with the same semantics, for tests and single-process
/// development runs.
#[derive(Default)]
pub struct MemoryNonceStore {
    entries: tokio::sync::Mutex<std::collections::HashMap<String, std::time::Instant>>,
}

impl MemoryNonceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NonceStore for MemoryNonceStore {
    async fn generate(&self, namespace: NonceNamespace) -> Result<String, NonceError> {
        let token = random_token();
        let key = format!("{}{}", namespace.prefix(), token);
        let expires = std::time::Instant::now()
            + std::time::Duration::from_secs(namespace.ttl_seconds());
        self.entries.lock().await.insert(key, expires);
        Ok(token)
    }

    async fn consume(&self, namespace: NonceNamespace, token: &str) -> Result<bool, NonceError> {
        let key = format!("{}{}", namespace.prefix(), token);
        let mut entries = self.entries.lock().await;
        match entries.remove(&key) {
            Some(expires) => Ok(expires > std::time::Instant::now()),
            None => Ok(false),
        }
    }

    async fn is_valid(&self, namespace: NonceNamespace, token: &str) -> Result<bool, NonceError> {
        let key = format!("{}{}", namespace.prefix(), token);
        let entries = self.entries.lock().await;
        Ok(entries
            .get(&key)
            .is_some_and(|expires| *expires > std::time::Instant::now()))
    }

    async fn invalidate(&self, namespace: NonceNamespace, token: &str) -> Result<(), NonceError> {
        let key = format!("{}{}", namespace.prefix(), token);
        self.entries.lock().await.remove(&key);
        Ok(())
    }

    async fn count_active(&self, namespace: NonceNamespace) -> Result<usize, NonceError> {
        let entries = self.entries.lock().await;
        let now = std::time::Instant::now();
        Ok(entries
            .iter()
            .filter(|(key, expires)| key.starts_with(namespace.prefix()) && **expires > now)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn tokens_are_32_bytes_of_hex() {
        let token = random_token();
        assert_eq!(token.len(), 2 + 64);
        assert!(crate::types::BYTES32_REGEX.is_match(&token));
        assert_ne!(random_token(), random_token());
    }

    #[test]
    fn namespaces_do_not_share_a_key_space() {
        assert_ne!(
            NonceNamespace::Login.prefix(),
            NonceNamespace::Payment.prefix()
        );
        assert_eq!(NonceNamespace::Login.ttl_seconds(), 300);
        assert_eq!(NonceNamespace::Payment.ttl_seconds(), 3600);
    }

    #[tokio::test]
    async fn consume_is_single_use() {
        let store = MemoryNonceStore::new();
        let token = store.generate(NonceNamespace::Login).await.unwrap();
        assert!(store.is_valid(NonceNamespace::Login, &token).await.unwrap());
        assert!(store.consume(NonceNamespace::Login, &token).await.unwrap());
        assert!(!store.consume(NonceNamespace::Login, &token).await.unwrap());
        assert!(!store.is_valid(NonceNamespace::Login, &token).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_consumers_race_to_exactly_one_winner() {
        let store = Arc::new(MemoryNonceStore::new());
        let token = store.generate(NonceNamespace::Payment).await.unwrap();
        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                store.consume(NonceNamespace::Payment, &token).await.unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let store = MemoryNonceStore::new();
        let token = store.generate(NonceNamespace::Login).await.unwrap();
        assert!(!store.consume(NonceNamespace::Payment, &token).await.unwrap());
        assert!(store.consume(NonceNamespace::Login, &token).await.unwrap());
        assert_eq!(store.count_active(NonceNamespace::Login).await.unwrap(), 0);
    }
}
