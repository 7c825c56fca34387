//! Session entity and change tracking.
//!
//! A [`Session`] is the in-memory representation of one session: identity,
//! timestamps, attributes, and the dirty state the repository consults to
//! decide what to persist. The persisted form is a [`SessionRecord`];
//! the wire form of a partial write is a [`RecordDelta`].

use crate::config::SaveMode;
use crate::error::{SessionError, SessionResult};
use crate::traits::generate_session_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Whether a session idle since `last_accessed` with the given
/// max-inactive `interval` is expired at `now`.
///
/// `None` means the session never expires. Intervals too large for the
/// chrono range are treated the same way.
pub(crate) fn is_idle_expired(
    last_accessed: DateTime<Utc>,
    interval: Option<Duration>,
    now: DateTime<Utc>,
) -> bool {
    match interval {
        None => false,
        Some(interval) => match chrono::Duration::from_std(interval) {
            Ok(interval) => now.signed_duration_since(last_accessed) >= interval,
            Err(_) => false,
        },
    }
}

/// The persisted form of a session.
///
/// This is what an [`AttributeStore`] loads and stores: identity,
/// timestamps, and the attribute map, with none of the in-memory dirty
/// state.
///
/// [`AttributeStore`]: crate::traits::AttributeStore
#[derive(Debug, Clone)]
pub struct SessionRecord {
    /// Unique session identifier
    pub id: String,
    /// Creation timestamp, immutable after creation
    pub creation_time: DateTime<Utc>,
    /// Last access timestamp
    pub last_accessed_time: DateTime<Utc>,
    /// Max-inactive interval; `None` means the session never expires
    pub max_inactive_interval: Option<Duration>,
    /// Session attributes
    pub attributes: HashMap<String, Value>,
}

impl SessionRecord {
    /// Check whether this record is expired at `now`.
    ///
    /// Pure function of the record and the supplied instant; expiry
    /// handling (deletion, index cleanup, events) is the repository's job.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        is_idle_expired(self.last_accessed_time, self.max_inactive_interval, now)
    }

    /// The instant at which this record expires, if it ever does.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let interval = chrono::Duration::from_std(self.max_inactive_interval?).ok()?;
        self.last_accessed_time.checked_add_signed(interval)
    }
}

/// Attribute changes and flag changes accumulated since the last
/// successful persist. A `None` value is a tombstone (explicit removal).
#[derive(Debug, Clone, Default)]
pub(crate) struct Delta {
    pub attributes: HashMap<String, Option<Value>>,
    pub last_accessed_changed: bool,
    pub max_inactive_changed: bool,
}

impl Delta {
    fn clear(&mut self) {
        self.attributes.clear();
        self.last_accessed_changed = false;
        self.max_inactive_changed = false;
    }
}

/// The wire form of a partial update handed to
/// [`AttributeStore::update`]: only the changed fields, with `None`
/// attribute values marking removals.
///
/// [`AttributeStore::update`]: crate::traits::AttributeStore::update
#[derive(Debug, Clone, Default)]
pub struct RecordDelta {
    /// New last-accessed time, if it changed
    pub last_accessed_time: Option<DateTime<Utc>>,
    /// New max-inactive interval, if it changed (the inner `None` means
    /// "never expires")
    pub max_inactive_interval: Option<Option<Duration>>,
    /// Attribute upserts and tombstones
    pub attributes: HashMap<String, Option<Value>>,
}

impl RecordDelta {
    /// Whether this delta carries no changes at all.
    pub fn is_empty(&self) -> bool {
        self.last_accessed_time.is_none()
            && self.max_inactive_interval.is_none()
            && self.attributes.is_empty()
    }
}

/// In-memory representation of one session.
///
/// Sessions are created and retrieved through a
/// [`SessionRepository`](crate::repository::SessionRepository); mutations
/// accumulate a delta which the repository turns into the cheapest write
/// that covers them. Reads mark attributes dirty or not depending on the
/// session's [`SaveMode`].
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    creation_time: DateTime<Utc>,
    last_accessed_time: DateTime<Utc>,
    max_inactive_interval: Option<Duration>,
    attributes: HashMap<String, Value>,
    save_mode: SaveMode,
    delta: Delta,
    is_new: bool,
    /// Id at the last successful persist; differs from `id` after
    /// `change_id` until the next save.
    original_id: String,
    /// Principal name the index holds for this session, as of the last
    /// successful persist.
    pub(crate) last_indexed_principal: Option<String>,
}

impl Session {
    /// Create a new, unsaved session.
    pub(crate) fn new(
        now: DateTime<Utc>,
        max_inactive_interval: Option<Duration>,
        save_mode: SaveMode,
    ) -> Self {
        let id = generate_session_id();
        Self {
            original_id: id.clone(),
            id,
            creation_time: now,
            last_accessed_time: now,
            max_inactive_interval,
            attributes: HashMap::new(),
            save_mode,
            delta: Delta::default(),
            is_new: true,
            last_indexed_principal: None,
        }
    }

    /// Wrap a loaded record in a live session with an empty delta.
    pub(crate) fn from_record(record: SessionRecord, save_mode: SaveMode) -> Self {
        Self {
            original_id: record.id.clone(),
            id: record.id,
            creation_time: record.creation_time,
            last_accessed_time: record.last_accessed_time,
            max_inactive_interval: record.max_inactive_interval,
            attributes: record.attributes,
            save_mode,
            delta: Delta::default(),
            is_new: false,
            last_indexed_principal: None,
        }
    }

    /// The session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The creation timestamp.
    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    /// The last access timestamp.
    pub fn last_accessed_time(&self) -> DateTime<Utc> {
        self.last_accessed_time
    }

    /// The max-inactive interval; `None` means the session never expires.
    pub fn max_inactive_interval(&self) -> Option<Duration> {
        self.max_inactive_interval
    }

    /// Whether this session has never been persisted.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Get a typed value from the session.
    ///
    /// Under [`SaveMode::Always`] or [`SaveMode::OnGetAttribute`] the read
    /// marks the attribute dirty, so it rides along on the next save even
    /// if its value never changes.
    pub fn get<T: for<'de> Deserialize<'de>>(&mut self, name: &str) -> Option<T> {
        if self.save_mode.records_reads() {
            if let Some(value) = self.attributes.get(name) {
                self.delta
                    .attributes
                    .insert(name.to_string(), Some(value.clone()));
            }
        }
        self.peek(name)
    }

    /// Get a typed value without touching the delta, regardless of
    /// [`SaveMode`].
    pub fn peek<T: for<'de> Deserialize<'de>>(&self, name: &str) -> Option<T> {
        self.attributes
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Set a typed value in the session.
    ///
    /// Always marks the attribute dirty, even when the new value equals
    /// the stored one. A value that serializes to JSON null removes the
    /// attribute instead of storing a null.
    pub fn set<T: Serialize>(&mut self, name: &str, value: T) -> SessionResult<()> {
        let json = serde_json::to_value(value)
            .map_err(|e| SessionError::Serialization(e.to_string()))?;
        self.set_value(name, json);
        Ok(())
    }

    /// Set a raw JSON value. Null removes the attribute.
    pub fn set_value(&mut self, name: &str, value: Value) {
        if value.is_null() {
            self.remove(name);
            return;
        }
        self.attributes.insert(name.to_string(), value.clone());
        self.delta.attributes.insert(name.to_string(), Some(value));
    }

    /// Remove an attribute, recording a tombstone in the delta.
    pub fn remove(&mut self, name: &str) {
        self.attributes.remove(name);
        self.delta.attributes.insert(name.to_string(), None);
    }

    /// Whether the session has an attribute with this name.
    pub fn contains(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// All attribute names.
    pub fn attribute_names(&self) -> Vec<&String> {
        self.attributes.keys().collect()
    }

    /// The full attribute map.
    pub fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }

    /// Update the last access timestamp.
    pub fn set_last_accessed_time(&mut self, instant: DateTime<Utc>) {
        self.last_accessed_time = instant;
        self.delta.last_accessed_changed = true;
    }

    /// Change the max-inactive interval. `None` means never expire.
    pub fn set_max_inactive_interval(&mut self, interval: Option<Duration>) {
        self.max_inactive_interval = interval;
        self.delta.max_inactive_changed = true;
    }

    /// Regenerate the session id, keeping all attributes.
    ///
    /// The change takes effect in the store on the next save, which
    /// replaces the old record with one under the new id.
    pub fn change_id(&mut self) -> &str {
        self.id = generate_session_id();
        &self.id
    }

    /// Whether the id differs from the one under which this session was
    /// last persisted.
    pub fn id_changed(&self) -> bool {
        self.id != self.original_id
    }

    /// Id at the last successful persist.
    pub(crate) fn original_id(&self) -> &str {
        &self.original_id
    }

    /// Whether any delta or flag change is pending.
    pub fn has_changes(&self) -> bool {
        !self.delta.attributes.is_empty()
            || self.delta.last_accessed_changed
            || self.delta.max_inactive_changed
    }

    /// Check whether the session is expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        is_idle_expired(self.last_accessed_time, self.max_inactive_interval, now)
    }

    /// Check whether the session is expired at the current wall clock.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Snapshot the persisted form of this session.
    pub fn to_record(&self) -> SessionRecord {
        SessionRecord {
            id: self.id.clone(),
            creation_time: self.creation_time,
            last_accessed_time: self.last_accessed_time,
            max_inactive_interval: self.max_inactive_interval,
            attributes: self.attributes.clone(),
        }
    }

    /// Build the wire delta for a partial update.
    pub(crate) fn record_delta(&self) -> RecordDelta {
        RecordDelta {
            last_accessed_time: self
                .delta
                .last_accessed_changed
                .then_some(self.last_accessed_time),
            max_inactive_interval: self
                .delta
                .max_inactive_changed
                .then_some(self.max_inactive_interval),
            attributes: self.delta.attributes.clone(),
        }
    }

    /// Clear dirty state after a successful persist.
    pub(crate) fn mark_persisted(&mut self) {
        self.is_new = false;
        self.original_id = self.id.clone();
        self.delta.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn new_session(mode: SaveMode) -> Session {
        Session::new(at(0), Some(Duration::from_secs(1800)), mode)
    }

    #[test]
    fn test_expiry_boundary() {
        let session = new_session(SaveMode::OnSetAttribute);
        assert!(!session.is_expired_at(at(1799)));
        assert!(session.is_expired_at(at(1800)));
        assert!(session.is_expired_at(at(1801)));
    }

    #[test]
    fn test_no_interval_never_expires() {
        let session = Session::new(at(0), None, SaveMode::OnSetAttribute);
        // A century idle.
        assert!(!session.is_expired_at(at(100 * 365 * 24 * 3600)));
    }

    #[test]
    fn test_set_marks_dirty() {
        let mut session = new_session(SaveMode::OnSetAttribute);
        session.set("a", 1).unwrap();
        assert!(session.has_changes());
        let delta = session.record_delta();
        assert_eq!(delta.attributes.get("a"), Some(&Some(Value::from(1))));
    }

    #[test]
    fn test_redundant_set_still_dirty() {
        let mut session = new_session(SaveMode::OnSetAttribute);
        session.set("a", "same").unwrap();
        session.mark_persisted();
        assert!(!session.has_changes());

        session.set("a", "same").unwrap();
        assert!(session.has_changes());
    }

    #[test]
    fn test_get_does_not_mark_under_on_set() {
        let mut session = new_session(SaveMode::OnSetAttribute);
        session.set("a", 1).unwrap();
        session.mark_persisted();

        let _: Option<i32> = session.get("a");
        assert!(!session.has_changes());
    }

    #[test]
    fn test_get_marks_under_always() {
        let mut session = new_session(SaveMode::Always);
        session.set("a", 1).unwrap();
        session.mark_persisted();

        let _: Option<i32> = session.get("a");
        assert!(session.has_changes());
        assert!(session.record_delta().attributes.contains_key("a"));
    }

    #[test]
    fn test_get_marks_under_on_get() {
        let mut session = new_session(SaveMode::OnGetAttribute);
        session.set("a", 1).unwrap();
        session.mark_persisted();

        let _: Option<i32> = session.get("a");
        assert!(session.has_changes());
    }

    #[test]
    fn test_get_missing_does_not_mark() {
        let mut session = new_session(SaveMode::Always);
        let _: Option<i32> = session.get("missing");
        assert!(!session.has_changes());
    }

    #[test]
    fn test_null_set_is_remove() {
        let mut session = new_session(SaveMode::OnSetAttribute);
        session.set("x", "value").unwrap();
        session.set_value("x", Value::Null);

        assert!(!session.contains("x"));
        assert!(!session.attribute_names().contains(&&"x".to_string()));
        assert_eq!(session.record_delta().attributes.get("x"), Some(&None));
    }

    #[test]
    fn test_remove_records_tombstone() {
        let mut session = new_session(SaveMode::OnSetAttribute);
        session.set("a", 1).unwrap();
        session.mark_persisted();

        session.remove("a");
        assert!(!session.contains("a"));
        assert_eq!(session.record_delta().attributes.get("a"), Some(&None));
    }

    #[test]
    fn test_touch_sets_flag_only() {
        let mut session = new_session(SaveMode::OnSetAttribute);
        session.mark_persisted();
        session.set_last_accessed_time(at(60));

        assert!(session.has_changes());
        let delta = session.record_delta();
        assert_eq!(delta.last_accessed_time, Some(at(60)));
        assert!(delta.attributes.is_empty());
    }

    #[test]
    fn test_change_id_keeps_attributes() {
        let mut session = new_session(SaveMode::OnSetAttribute);
        session.set("a", 1).unwrap();
        session.mark_persisted();

        let old_id = session.id().to_string();
        session.change_id();

        assert_ne!(session.id(), old_id);
        assert!(session.id_changed());
        assert_eq!(session.original_id(), old_id);
        assert_eq!(session.peek::<i32>("a"), Some(1));
    }

    #[test]
    fn test_mark_persisted_clears_everything() {
        let mut session = new_session(SaveMode::OnSetAttribute);
        session.set("a", 1).unwrap();
        session.set_last_accessed_time(at(5));
        session.set_max_inactive_interval(None);
        session.change_id();

        session.mark_persisted();
        assert!(!session.is_new());
        assert!(!session.id_changed());
        assert!(!session.has_changes());
    }

    #[test]
    fn test_record_round_trip() {
        let mut session = new_session(SaveMode::OnSetAttribute);
        session.set("user", "alice").unwrap();

        let record = session.to_record();
        assert_eq!(record.id, session.id());
        assert_eq!(record.attributes.get("user"), Some(&Value::from("alice")));

        let restored = Session::from_record(record, SaveMode::OnSetAttribute);
        assert!(!restored.is_new());
        assert!(!restored.has_changes());
        assert_eq!(restored.peek::<String>("user"), Some("alice".to_string()));
    }
}
