//! Store, clock, codec, and principal-resolution traits.
//!
//! The session lifecycle (delta tracking, save/flush policy, expiration,
//! principal indexing) is implemented exactly once, in
//! [`SessionRepository`](crate::repository::SessionRepository), on top of
//! the narrow [`AttributeStore`] capability interface below. A concrete
//! backend implements only this interface and never re-derives the policy
//! logic.

use crate::error::{SessionError, SessionResult};
use crate::session::{RecordDelta, SessionRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Dedicated attribute checked first when resolving a session's principal.
pub const PRINCIPAL_NAME_ATTRIBUTE: &str = "principal_name";

/// Fallback attribute holding a security context with an embedded
/// identity at `principal.name`.
pub const SECURITY_CONTEXT_ATTRIBUTE: &str = "security_context";

/// Physical session storage backend.
///
/// The record operations treat a session as an opaque unit keyed by id;
/// the index operations maintain the principal-name secondary index.
/// Records are the source of truth: the repository always writes or
/// deletes the record before touching the index, and index entries without
/// a backing record are pruned on lookup rather than reported as errors.
#[async_trait]
pub trait AttributeStore: Send + Sync {
    /// Load the record for a session id, or `None` if absent.
    async fn load(&self, id: &str) -> SessionResult<Option<SessionRecord>>;

    /// Write a complete record, replacing whatever was stored under its
    /// id. `ttl` is the remaining lifetime for stores with native
    /// expiry; stores without it ignore the hint.
    async fn insert(&self, record: &SessionRecord, ttl: Option<Duration>) -> SessionResult<()>;

    /// Apply a partial update to an existing record. Updating an id with
    /// no record is a silent no-op.
    async fn update(&self, id: &str, delta: &RecordDelta, ttl: Option<Duration>)
    -> SessionResult<()>;

    /// Delete a record.
    ///
    /// Returns whether a record was actually removed. Callers publishing
    /// expiry events key off this so that two racing deleters produce
    /// exactly one event.
    async fn delete(&self, id: &str) -> SessionResult<bool>;

    /// Add a session id to a principal's index set.
    async fn index_add(&self, principal: &str, id: &str) -> SessionResult<()>;

    /// Remove a session id from a principal's index set. Removing an
    /// absent member is a no-op.
    async fn index_remove(&self, principal: &str, id: &str) -> SessionResult<()>;

    /// All session ids indexed under a principal.
    async fn index_members(&self, principal: &str) -> SessionResult<HashSet<String>>;

    /// Ids of records whose expiry instant is at or before `cutoff`.
    ///
    /// Stores with native TTL may return nothing; their entries expire
    /// without a sweep.
    async fn expired_before(&self, cutoff: DateTime<Utc>) -> SessionResult<Vec<String>>;

    /// Whether the store evicts expired records itself.
    fn supports_native_ttl(&self) -> bool {
        false
    }
}

/// Injectable time source.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock [`Clock`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Codec turning an attribute value into opaque bytes and back.
///
/// Byte-oriented backends (Redis) run every attribute through this at the
/// store boundary; the core never interprets the bytes.
pub trait Codec: Send + Sync {
    /// Encode a value to bytes.
    fn encode(&self, value: &Value) -> SessionResult<Vec<u8>>;

    /// Decode bytes back to a value.
    fn decode(&self, bytes: &[u8]) -> SessionResult<Value>;
}

/// JSON [`Codec`], the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, value: &Value) -> SessionResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| SessionError::Serialization(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> SessionResult<Value> {
        serde_json::from_slice(bytes).map_err(|e| SessionError::Deserialization(e.to_string()))
    }
}

/// Resolves the principal (user) name a session belongs to from its
/// attributes, or `None` when the session has no principal.
///
/// Supplied by the caller; the core has no built-in notion of any
/// particular security framework's context object.
pub trait PrincipalNameResolver: Send + Sync {
    /// Resolve the principal name from a session's attributes.
    fn resolve(&self, attributes: &HashMap<String, Value>) -> Option<String>;
}

/// Default resolver: the dedicated [`PRINCIPAL_NAME_ATTRIBUTE`] string
/// first, then the identity embedded in [`SECURITY_CONTEXT_ATTRIBUTE`]
/// at `principal.name`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPrincipalResolver;

impl PrincipalNameResolver for DefaultPrincipalResolver {
    fn resolve(&self, attributes: &HashMap<String, Value>) -> Option<String> {
        if let Some(Value::String(name)) = attributes.get(PRINCIPAL_NAME_ATTRIBUTE) {
            return Some(name.clone());
        }
        attributes
            .get(SECURITY_CONTEXT_ATTRIBUTE)
            .and_then(|ctx| ctx.pointer("/principal/name"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Generate a new unique session ID.
pub fn generate_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
