/*!
 * # Security Store
 *
 * Key/value store with per-key expiry that holds the abuse-resistance state of
 * the token authority: blacklist entries, per-token request counters and
 * failed-attempt counters.
 *
 * Two backends are provided:
 *
 * - `InMemorySecurityStore`: a `DashMap` local to the process. State is not
 *   shared between instances, so a token blacklisted on one instance stays
 *   usable on another until that instance blacklists it too.
 * - `RedisSecurityStore`: shared across instances, expiry handled natively
 *   by Redis.
 *
 * The store is injected into the token authority at construction.
 */

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SecurityStoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Corrupt counter at {key}: {value}")]
    CorruptCounter { key: String, value: String },
}

#[async_trait]
pub trait SecurityStore: Send + Sync {
    /// Returns the live value for `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, SecurityStoreError>;

    /// Upserts `key`, replacing any previous value and expiry.
    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), SecurityStoreError>;

    /// Stores `key` only when no live value exists. Returns whether it was written.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, SecurityStoreError>;

    /// Atomically increments the counter at `key`.
    ///
    /// A counter that does not exist (or has expired) starts at 1 and gets
    /// `ttl_on_create` as its lifetime; later increments keep the original expiry.
    async fn increment(
        &self,
        key: &str,
        ttl_on_create: Option<Duration>,
    ) -> Result<i64, SecurityStoreError>;

    /// Sets an absolute expiry on `key`. Returns false when the key does not exist.
    async fn expire_at(&self, key: &str, at: DateTime<Utc>) -> Result<bool, SecurityStoreError>;

    async fn delete(&self, key: &str) -> Result<(), SecurityStoreError>;

    /// Counts live keys starting with `prefix`.
    async fn count_prefix(&self, prefix: &str) -> Result<u64, SecurityStoreError>;

    /// Drops expired keys starting with `prefix`, returning how many were removed.
    async fn purge_expired(&self, prefix: &str) -> Result<u64, SecurityStoreError>;
}

#[derive(Debug, Clone)]
struct StoreEntry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl StoreEntry {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Utc::now() + to_chrono(ttl)),
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

fn to_chrono(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}

/// Process-local store backed by a concurrent map
#[derive(Debug, Clone, Default)]
pub struct InMemorySecurityStore {
    entries: Arc<DashMap<String, StoreEntry>>,
}

impl InMemorySecurityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SecurityStore for InMemorySecurityStore {
    async fn get(&self, key: &str) -> Result<Option<String>, SecurityStoreError> {
        let now = Utc::now();
        let value = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => None,
            None => return Ok(None),
        };
        if value.is_none() {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), SecurityStoreError> {
        self.entries
            .insert(key.to_string(), StoreEntry::new(value.to_string(), ttl));
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, SecurityStoreError> {
        let now = Utc::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(StoreEntry::new(value.to_string(), ttl));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoreEntry::new(value.to_string(), ttl));
                Ok(true)
            }
        }
    }

    async fn increment(
        &self,
        key: &str,
        ttl_on_create: Option<Duration>,
    ) -> Result<i64, SecurityStoreError> {
        let now = Utc::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(StoreEntry::new("1".to_string(), ttl_on_create));
                    return Ok(1);
                }
                let entry = occupied.get_mut();
                let current: i64 =
                    entry
                        .value
                        .parse()
                        .map_err(|_| SecurityStoreError::CorruptCounter {
                            key: key.to_string(),
                            value: entry.value.clone(),
                        })?;
                let next = current + 1;
                entry.value = next.to_string();
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoreEntry::new("1".to_string(), ttl_on_create));
                Ok(1)
            }
        }
    }

    async fn expire_at(&self, key: &str, at: DateTime<Utc>) -> Result<bool, SecurityStoreError> {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.expires_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), SecurityStoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn count_prefix(&self, prefix: &str) -> Result<u64, SecurityStoreError> {
        let now = Utc::now();
        let count = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && !entry.value().is_expired(now))
            .count();
        Ok(count as u64)
    }

    async fn purge_expired(&self, prefix: &str) -> Result<u64, SecurityStoreError> {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries
            .retain(|key, entry| !(key.starts_with(prefix) && entry.is_expired(now)));
        let removed = before.saturating_sub(self.entries.len()) as u64;
        debug!(prefix, removed, "purged expired security store entries");
        Ok(removed)
    }
}

/// Store shared by every instance through Redis
#[derive(Clone)]
pub struct RedisSecurityStore {
    client: Arc<redis::Client>,
}

impl RedisSecurityStore {
    pub fn new(client: Arc<redis::Client>) -> Self {
        Self { client }
    }

    async fn connection(&self) -> Result<redis::aio::Connection, SecurityStoreError> {
        Ok(self.client.get_async_connection().await?)
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl SecurityStore for RedisSecurityStore {
    async fn get(&self, key: &str) -> Result<Option<String>, SecurityStoreError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), SecurityStoreError> {
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, SecurityStoreError> {
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let written: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(written.is_some())
    }

    async fn increment(
        &self,
        key: &str,
        ttl_on_create: Option<Duration>,
    ) -> Result<i64, SecurityStoreError> {
        let mut conn = self.connection().await?;
        let count: i64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        if count == 1 {
            if let Some(ttl) = ttl_on_create {
                let _: i64 = redis::cmd("PEXPIRE")
                    .arg(key)
                    .arg(ttl_millis(ttl))
                    .query_async(&mut conn)
                    .await?;
            }
        }
        Ok(count)
    }

    async fn expire_at(&self, key: &str, at: DateTime<Utc>) -> Result<bool, SecurityStoreError> {
        let mut conn = self.connection().await?;
        let applied: i64 = redis::cmd("PEXPIREAT")
            .arg(key)
            .arg(at.timestamp_millis())
            .query_async(&mut conn)
            .await?;
        Ok(applied == 1)
    }

    async fn delete(&self, key: &str) -> Result<(), SecurityStoreError> {
        let mut conn = self.connection().await?;
        let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }

    async fn count_prefix(&self, prefix: &str) -> Result<u64, SecurityStoreError> {
        use redis::AsyncCommands;

        let mut conn = self.connection().await?;
        let mut keys: redis::AsyncIter<'_, String> =
            conn.scan_match(format!("{}*", prefix)).await?;
        let mut count = 0u64;
        while keys.next_item().await.is_some() {
            count += 1;
        }
        Ok(count)
    }

    async fn purge_expired(&self, _prefix: &str) -> Result<u64, SecurityStoreError> {
        // Redis evicts expired keys itself.
        Ok(0)
    }
}
