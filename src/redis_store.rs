//! Redis attribute store implementation.

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::session::{RecordDelta, SessionRecord};
use crate::traits::{AttributeStore, Codec, JsonCodec};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

const FIELD_CREATION: &str = "ct";
const FIELD_LAST_ACCESSED: &str = "lat";
const FIELD_MAX_INACTIVE: &str = "mii";
const ATTR_PREFIX: &str = "attr:";

/// Redis-backed [`AttributeStore`].
///
/// Each session is a hash under `{namespace}:{id}` with timestamp fields
/// (`ct`, `lat`, `mii`: millis, millis, seconds with `-1` for "never
/// expires") and one `attr:{name}` field per attribute, encoded through
/// the injected [`Codec`]. The hash layout is what makes the repository's
/// partial-update strategy cheap: a delta maps to `HSET`/`HDEL` of just
/// the changed fields.
///
/// Expiry is native (`EXPIRE` refreshed on every write), so the sweeper
/// has nothing to do here; wire keyspace eviction notifications to
/// [`SessionRepository::handle_evicted`] to keep the principal index and
/// event consumers informed.
///
/// The principal index is a set per principal under
/// `{namespace}:index:{principal}`, mutated with `SADD`/`SREM` so
/// concurrent saves never lose members.
///
/// [`SessionRepository::handle_evicted`]: crate::repository::SessionRepository::handle_evicted
///
/// # Examples
///
/// ```no_run
/// use tessera::{RedisAttributeStore, SessionConfig, SessionRepository};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), tessera::SessionError> {
/// let config = SessionConfig::new().with_namespace("myapp:session");
/// let store = RedisAttributeStore::new("redis://localhost:6379", config.clone()).await?;
/// let repository = SessionRepository::new(Arc::new(store)).with_config(config);
/// # Ok(())
/// # }
/// ```
pub struct RedisAttributeStore {
    conn: ConnectionManager,
    config: SessionConfig,
    codec: Arc<dyn Codec>,
}

impl RedisAttributeStore {
    /// Connect to Redis.
    ///
    /// The URL must use the `redis://` or `rediss://` scheme.
    pub async fn new(url: &str, config: SessionConfig) -> SessionResult<Self> {
        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(SessionError::InvalidUrl(
                "Redis URL must start with redis:// or rediss://".to_string(),
            ));
        }

        let client = redis::Client::open(url)
            .map_err(|e| SessionError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;

        Ok(Self {
            conn,
            config,
            codec: Arc::new(JsonCodec),
        })
    }

    /// Replace the attribute codec.
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    fn session_key(&self, id: &str) -> String {
        self.config.session_key(id)
    }

    fn index_key(&self, principal: &str) -> String {
        format!("{}:index:{}", self.config.namespace, principal)
    }

    fn timestamp_field(instant: DateTime<Utc>) -> Vec<u8> {
        instant.timestamp_millis().to_string().into_bytes()
    }

    fn interval_field(interval: Option<Duration>) -> Vec<u8> {
        interval
            .map(|i| i.as_secs() as i64)
            .unwrap_or(-1)
            .to_string()
            .into_bytes()
    }

    fn parse_i64(map: &HashMap<String, Vec<u8>>, field: &str) -> SessionResult<i64> {
        let bytes = map.get(field).ok_or_else(|| {
            SessionError::Deserialization(format!("missing session field '{field}'"))
        })?;
        std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                SessionError::Deserialization(format!("invalid session field '{field}'"))
            })
    }

    fn parse_instant(map: &HashMap<String, Vec<u8>>, field: &str) -> SessionResult<DateTime<Utc>> {
        DateTime::from_timestamp_millis(Self::parse_i64(map, field)?).ok_or_else(|| {
            SessionError::Deserialization(format!("session field '{field}' out of range"))
        })
    }
}

#[async_trait]
impl AttributeStore for RedisAttributeStore {
    async fn load(&self, id: &str) -> SessionResult<Option<SessionRecord>> {
        let key = self.session_key(id);
        let mut conn = self.conn.clone();

        let map: HashMap<String, Vec<u8>> = conn.hgetall(&key).await?;
        if map.is_empty() {
            return Ok(None);
        }

        let creation_time = Self::parse_instant(&map, FIELD_CREATION)?;
        let last_accessed_time = Self::parse_instant(&map, FIELD_LAST_ACCESSED)?;
        let max_inactive = Self::parse_i64(&map, FIELD_MAX_INACTIVE)?;

        let mut attributes = HashMap::new();
        for (field, bytes) in &map {
            if let Some(name) = field.strip_prefix(ATTR_PREFIX) {
                attributes.insert(name.to_string(), self.codec.decode(bytes)?);
            }
        }

        Ok(Some(SessionRecord {
            id: id.to_string(),
            creation_time,
            last_accessed_time,
            max_inactive_interval: (max_inactive >= 0)
                .then(|| Duration::from_secs(max_inactive as u64)),
            attributes,
        }))
    }

    async fn insert(&self, record: &SessionRecord, ttl: Option<Duration>) -> SessionResult<()> {
        let key = self.session_key(&record.id);

        let mut fields: Vec<(String, Vec<u8>)> = vec![
            (
                FIELD_CREATION.to_string(),
                Self::timestamp_field(record.creation_time),
            ),
            (
                FIELD_LAST_ACCESSED.to_string(),
                Self::timestamp_field(record.last_accessed_time),
            ),
            (
                FIELD_MAX_INACTIVE.to_string(),
                Self::interval_field(record.max_inactive_interval),
            ),
        ];
        for (name, value) in &record.attributes {
            fields.push((format!("{ATTR_PREFIX}{name}"), self.codec.encode(value)?));
        }

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(&key).ignore();
        pipe.hset_multiple(&key, &fields).ignore();
        if let Some(ttl) = ttl {
            pipe.expire(&key, ttl.as_secs().max(1) as i64).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;

        Ok(())
    }

    async fn update(
        &self,
        id: &str,
        delta: &RecordDelta,
        ttl: Option<Duration>,
    ) -> SessionResult<()> {
        let key = self.session_key(id);

        let mut sets: Vec<(String, Vec<u8>)> = Vec::new();
        let mut dels: Vec<String> = Vec::new();

        if let Some(last_accessed) = delta.last_accessed_time {
            sets.push((
                FIELD_LAST_ACCESSED.to_string(),
                Self::timestamp_field(last_accessed),
            ));
        }
        if let Some(interval) = delta.max_inactive_interval {
            sets.push((
                FIELD_MAX_INACTIVE.to_string(),
                Self::interval_field(interval),
            ));
        }
        for (name, value) in &delta.attributes {
            match value {
                Some(value) => {
                    sets.push((format!("{ATTR_PREFIX}{name}"), self.codec.encode(value)?));
                }
                None => dels.push(format!("{ATTR_PREFIX}{name}")),
            }
        }

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        if !sets.is_empty() {
            pipe.hset_multiple(&key, &sets).ignore();
        }
        if !dels.is_empty() {
            pipe.hdel(&key, dels).ignore();
        }
        match ttl {
            Some(ttl) => {
                pipe.expire(&key, ttl.as_secs().max(1) as i64).ignore();
            }
            None => {
                pipe.persist(&key).ignore();
            }
        }
        let _: () = pipe.query_async(&mut conn).await?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> SessionResult<bool> {
        let key = self.session_key(id);
        let mut conn = self.conn.clone();

        let removed: i64 = conn.del(&key).await?;
        Ok(removed > 0)
    }

    async fn index_add(&self, principal: &str, id: &str) -> SessionResult<()> {
        let key = self.index_key(principal);
        let mut conn = self.conn.clone();

        let _: () = conn.sadd(&key, id).await?;
        Ok(())
    }

    async fn index_remove(&self, principal: &str, id: &str) -> SessionResult<()> {
        let key = self.index_key(principal);
        let mut conn = self.conn.clone();

        let _: () = conn.srem(&key, id).await?;
        Ok(())
    }

    async fn index_members(&self, principal: &str) -> SessionResult<HashSet<String>> {
        let key = self.index_key(principal);
        let mut conn = self.conn.clone();

        let members: HashSet<String> = conn.smembers(&key).await?;
        Ok(members)
    }

    /// Redis evicts expired hashes itself; the sweep has nothing to scan.
    async fn expired_before(&self, _cutoff: DateTime<Utc>) -> SessionResult<Vec<String>> {
        Ok(Vec::new())
    }

    fn supports_native_ttl(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::SessionRepository;

    #[test]
    fn test_key_layout() {
        let config = SessionConfig::new().with_namespace("myapp:session");
        assert_eq!(config.session_key("abc"), "myapp:session:abc");
    }

    #[test]
    fn test_interval_field_encoding() {
        assert_eq!(
            RedisAttributeStore::interval_field(Some(Duration::from_secs(1800))),
            b"1800".to_vec()
        );
        assert_eq!(RedisAttributeStore::interval_field(None), b"-1".to_vec());
    }

    // Requires a local Redis; run with: cargo test -- --ignored

    #[tokio::test]
    #[ignore]
    async fn test_record_round_trip() {
        let config = SessionConfig::new().with_namespace("tessera:test");
        let store = RedisAttributeStore::new("redis://localhost:6379", config)
            .await
            .unwrap();

        let mut attributes = HashMap::new();
        attributes.insert("user".to_string(), serde_json::json!("alice"));
        let record = SessionRecord {
            id: "round-trip".to_string(),
            creation_time: Utc::now(),
            last_accessed_time: Utc::now(),
            max_inactive_interval: Some(Duration::from_secs(1800)),
            attributes,
        };

        store.insert(&record, Some(Duration::from_secs(60))).await.unwrap();
        let loaded = store.load("round-trip").await.unwrap().unwrap();
        assert_eq!(loaded.attributes.get("user"), Some(&serde_json::json!("alice")));
        assert_eq!(loaded.max_inactive_interval, Some(Duration::from_secs(1800)));

        assert!(store.delete("round-trip").await.unwrap());
        assert!(!store.delete("round-trip").await.unwrap());
    }

    #[tokio::test]
    #[ignore]
    async fn test_repository_lifecycle_against_redis() {
        let config = SessionConfig::new().with_namespace("tessera:test");
        let store = RedisAttributeStore::new("redis://localhost:6379", config.clone())
            .await
            .unwrap();
        let repository = SessionRepository::new(std::sync::Arc::new(store)).with_config(config);

        let mut session = repository.create();
        session.set("user_id", 42).unwrap();
        assert_eq!(session.max_inactive_interval(), Some(Duration::from_secs(1800)));
        repository.save(&mut session).await.unwrap();

        let mut found = repository.find_by_id(session.id()).await.unwrap().unwrap();
        assert_eq!(found.get::<i32>("user_id"), Some(42));
        assert_eq!(found.max_inactive_interval(), Some(Duration::from_secs(1800)));

        found.remove("user_id");
        repository.save(&mut found).await.unwrap();
        let reloaded = repository.find_by_id(session.id()).await.unwrap().unwrap();
        assert!(!reloaded.contains("user_id"));
        assert_eq!(reloaded.creation_time().timestamp_millis(),
            session.creation_time().timestamp_millis());

        repository.delete_by_id(session.id()).await.unwrap();
        assert!(repository.find_by_id(session.id()).await.unwrap().is_none());
    }
}
