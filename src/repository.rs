//! Session repository: creation, retrieval, save dispatch, deletion,
//! expiration, and principal-index maintenance.

use crate::config::{FlushMode, SessionConfig};
use crate::error::{SessionError, SessionResult};
use crate::events::{EventPublisher, NullEventPublisher, SessionEvent};
use crate::session::{Session, SessionRecord};
use crate::traits::{AttributeStore, Clock, DefaultPrincipalResolver, PrincipalNameResolver, SystemClock};
use chrono::{DateTime, DurationRound, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Orchestrates the session lifecycle over an [`AttributeStore`].
///
/// The repository owns the policy layer: which write strategy a save
/// uses (full insert, partial delta update, or nothing), when sessions
/// are discovered expired, how the principal index is kept consistent,
/// and which lifecycle events are published. Backends supply only the
/// narrow store interface.
///
/// Record writes always precede index writes, so a crash between the two
/// leaves the index merely stale (healed on the next lookup), never the
/// record missing while the index is its sole reference.
///
/// # Examples
///
/// ```
/// use tessera::{InMemoryStore, SessionRepository};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), tessera::SessionError> {
///     let repository = SessionRepository::new(Arc::new(InMemoryStore::new()));
///
///     let mut session = repository.create();
///     session.set("user_id", 123)?;
///     repository.save(&mut session).await?;
///
///     if let Some(mut session) = repository.find_by_id(session.id()).await? {
///         let user_id: Option<i32> = session.get("user_id");
///         assert_eq!(user_id, Some(123));
///     }
///     Ok(())
/// }
/// ```
pub struct SessionRepository<S: AttributeStore> {
    store: Arc<S>,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventPublisher>,
    resolver: Arc<dyn PrincipalNameResolver>,
}

impl<S: AttributeStore> SessionRepository<S> {
    /// Create a repository with default configuration, the system clock,
    /// a null event publisher, and the default principal resolver.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            config: SessionConfig::default(),
            clock: Arc::new(SystemClock),
            events: Arc::new(NullEventPublisher),
            resolver: Arc::new(DefaultPrincipalResolver),
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the event publisher.
    pub fn with_event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }

    /// Replace the principal-name resolver.
    pub fn with_principal_resolver(mut self, resolver: Arc<dyn PrincipalNameResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// The active configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create a new session.
    ///
    /// Performs no I/O; the session reaches the store on its first save.
    pub fn create(&self) -> Session {
        let now = self.clock.now();
        Session::new(now, self.config.default_max_inactive, self.config.save_mode)
    }

    /// Find a session by id.
    ///
    /// A session that does not exist returns `None`. A session found to
    /// be expired also returns `None`, after running the same removal,
    /// index-cleanup, and `Expired`-event path as the sweeper, even when
    /// the store has not yet physically evicted the entry. Otherwise the
    /// returned session's last-accessed time is touched to now, so the
    /// next save persists the keep-alive.
    pub async fn find_by_id(&self, id: &str) -> SessionResult<Option<Session>> {
        let Some(record) = self.timed(self.store.load(id)).await? else {
            return Ok(None);
        };

        let now = self.clock.now();
        if record.is_expired_at(now) {
            self.expire_session(id, Some(record)).await?;
            return Ok(None);
        }

        let mut session = Session::from_record(record, self.config.save_mode);
        session.last_indexed_principal = self.resolver.resolve(session.attributes());
        session.set_last_accessed_time(now);
        Ok(Some(session))
    }

    /// Persist a session's pending changes.
    ///
    /// Dispatches on session state, highest priority first:
    ///
    /// 1. never persisted: full insert, principal-index add, `Created`
    ///    event;
    /// 2. id changed: full insert under the new id **before** deleting
    ///    the old record, then index fix-up (a failure in between shows a
    ///    brief duplicate rather than a vanished session; exactly-once
    ///    replacement would need store-level compare-and-swap, which the
    ///    store contract does not require);
    /// 3. pending delta: partial update of only the changed fields, with
    ///    the index touched only when the resolved principal actually
    ///    changed;
    /// 4. nothing pending: no I/O and no events.
    ///
    /// The delta is cleared only after the store accepted the write, so a
    /// failed or timed-out save retries the same changes.
    pub async fn save(&self, session: &mut Session) -> SessionResult<()> {
        if session.is_new() {
            return self.save_new(session).await;
        }
        if session.id_changed() {
            return self.save_id_change(session).await;
        }
        if session.has_changes() {
            return self.save_delta(session).await;
        }
        Ok(())
    }

    async fn save_new(&self, session: &mut Session) -> SessionResult<()> {
        let record = session.to_record();
        let ttl = self.remaining_ttl(&record);
        self.timed(self.store.insert(&record, ttl)).await?;
        debug!("Inserted session {}", record.id);

        let principal = self.resolver.resolve(&record.attributes);
        if let Some(principal) = &principal {
            self.timed(self.store.index_add(principal, &record.id)).await?;
        }
        session.last_indexed_principal = principal;
        session.mark_persisted();

        self.events
            .publish(SessionEvent::Created {
                session: session.clone(),
            })
            .await;
        Ok(())
    }

    async fn save_id_change(&self, session: &mut Session) -> SessionResult<()> {
        let old_id = session.original_id().to_string();
        let old_principal = session.last_indexed_principal.clone();

        let record = session.to_record();
        let ttl = self.remaining_ttl(&record);
        self.timed(self.store.insert(&record, ttl)).await?;
        self.timed(self.store.delete(&old_id)).await?;
        debug!("Replaced session {} with {}", old_id, record.id);

        let principal = self.resolver.resolve(&record.attributes);
        if let Some(old_principal) = &old_principal {
            self.timed(self.store.index_remove(old_principal, &old_id))
                .await?;
        }
        if let Some(principal) = &principal {
            self.timed(self.store.index_add(principal, &record.id)).await?;
        }
        session.last_indexed_principal = principal;
        session.mark_persisted();
        Ok(())
    }

    async fn save_delta(&self, session: &mut Session) -> SessionResult<()> {
        let delta = session.record_delta();
        let ttl = self.ttl_for(session.last_accessed_time(), session.max_inactive_interval());
        self.timed(self.store.update(session.id(), &delta, ttl)).await?;
        debug!("Updated session {}", session.id());

        let principal = self.resolver.resolve(session.attributes());
        if principal != session.last_indexed_principal {
            // Remove before add: an observer may see a momentary absence,
            // never the same id under two principals at once.
            if let Some(old) = &session.last_indexed_principal {
                self.timed(self.store.index_remove(old, session.id())).await?;
            }
            if let Some(new) = &principal {
                self.timed(self.store.index_add(new, session.id())).await?;
            }
            session.last_indexed_principal = principal;
        }
        session.mark_persisted();
        Ok(())
    }

    /// Set an attribute through the repository, flushing immediately when
    /// the configured [`FlushMode`] asks for it.
    pub async fn set_attribute<T: Serialize + Send>(
        &self,
        session: &mut Session,
        name: &str,
        value: T,
    ) -> SessionResult<()> {
        session.set(name, value)?;
        self.flush_if_immediate(session).await
    }

    /// Remove an attribute through the repository, flushing immediately
    /// when the configured [`FlushMode`] asks for it.
    pub async fn remove_attribute(&self, session: &mut Session, name: &str) -> SessionResult<()> {
        session.remove(name);
        self.flush_if_immediate(session).await
    }

    async fn flush_if_immediate(&self, session: &mut Session) -> SessionResult<()> {
        match self.config.flush_mode {
            FlushMode::Immediate => self.save(session).await,
            FlushMode::OnSave => Ok(()),
        }
    }

    /// Delete a session by id and publish a `Deleted` event.
    ///
    /// Deleting an id with no record is a no-op, not an error, and
    /// publishes nothing.
    pub async fn delete_by_id(&self, id: &str) -> SessionResult<()> {
        let Some(record) = self.timed(self.store.load(id)).await? else {
            return Ok(());
        };

        let removed = self.timed(self.store.delete(id)).await?;
        if let Some(principal) = self.resolver.resolve(&record.attributes) {
            self.timed(self.store.index_remove(&principal, id)).await?;
        }

        if removed {
            debug!("Deleted session {}", id);
            self.events
                .publish(SessionEvent::Deleted {
                    id: id.to_string(),
                    session: Some(Session::from_record(record, self.config.save_mode)),
                })
                .await;
        }
        Ok(())
    }

    /// All live sessions belonging to a principal, keyed by id.
    ///
    /// Self-healing: index entries with no backing record are pruned
    /// silently, and entries whose record turns out to be expired run the
    /// usual expiry path. Neither condition fails the lookup.
    pub async fn find_by_principal_name(
        &self,
        principal: &str,
    ) -> SessionResult<HashMap<String, Session>> {
        let ids: Vec<String> = self
            .timed(self.store.index_members(principal))
            .await?
            .into_iter()
            .collect();

        let records = self
            .timed(try_join_all(ids.iter().map(|id| self.store.load(id))))
            .await?;

        let now = self.clock.now();
        let mut sessions = HashMap::new();
        for (id, record) in ids.into_iter().zip(records) {
            match record {
                None => {
                    warn!("Pruning stale index entry {} for {}", id, principal);
                    self.timed(self.store.index_remove(principal, &id)).await?;
                }
                Some(record) if record.is_expired_at(now) => {
                    self.expire_session(&id, Some(record)).await?;
                }
                Some(record) => {
                    let mut session = Session::from_record(record, self.config.save_mode);
                    session.last_indexed_principal = Some(principal.to_string());
                    sessions.insert(id, session);
                }
            }
        }
        Ok(sessions)
    }

    /// Delete every session whose expiry instant has passed, publishing
    /// an `Expired` event per removal.
    ///
    /// The cutoff is now truncated to the minute, so a record is only
    /// swept once a full granule has passed; records a caller is about
    /// to touch are left to lazy expiration. Returns the number of
    /// sessions expired. Racing lazy expiration is harmless: whoever
    /// deletes the record first publishes the one event.
    pub async fn sweep(&self) -> SessionResult<usize> {
        let now = self.clock.now();
        let cutoff = now
            .duration_trunc(chrono::Duration::minutes(1))
            .unwrap_or(now);

        let ids = self.timed(self.store.expired_before(cutoff)).await?;
        let mut expired = 0;
        for id in ids {
            match self.timed(self.store.load(&id)).await? {
                // Gone already, or touched since the scan.
                None => {}
                Some(record) if !record.is_expired_at(self.clock.now()) => {}
                Some(record) => {
                    if self.expire_session(&id, Some(record)).await? {
                        expired += 1;
                    }
                }
            }
        }
        if expired > 0 {
            debug!("Sweep expired {} sessions", expired);
        }
        Ok(expired)
    }

    /// React to a native store eviction notice.
    ///
    /// Stores with native TTL delete the record themselves but know
    /// nothing about the principal index or lifecycle events; backends
    /// wiring up eviction notifications call this per evicted id. When
    /// the record is already gone the principal cannot be resolved: the
    /// `Expired` event is published without a session, and any leftover
    /// index entry is healed by the next principal lookup.
    pub async fn handle_evicted(&self, id: &str) -> SessionResult<()> {
        let record = self.timed(self.store.load(id)).await?;
        self.timed(self.store.delete(id)).await?;

        if let Some(record) = &record {
            if let Some(principal) = self.resolver.resolve(&record.attributes) {
                self.timed(self.store.index_remove(&principal, id)).await?;
            }
        }

        self.events
            .publish(SessionEvent::Expired {
                id: id.to_string(),
                session: record
                    .map(|r| Session::from_record(r, self.config.save_mode)),
            })
            .await;
        Ok(())
    }

    /// Shared expiry path for lazy expiration, the sweeper, and stale
    /// principal lookups. Returns whether this call actually removed the
    /// record; only then is the `Expired` event published, so racing
    /// paths produce exactly one event.
    async fn expire_session(
        &self,
        id: &str,
        record: Option<SessionRecord>,
    ) -> SessionResult<bool> {
        let removed = self.timed(self.store.delete(id)).await?;

        if let Some(record) = &record {
            if let Some(principal) = self.resolver.resolve(&record.attributes) {
                self.timed(self.store.index_remove(&principal, id)).await?;
            }
        }

        if removed {
            debug!("Expired session {}", id);
            self.events
                .publish(SessionEvent::Expired {
                    id: id.to_string(),
                    session: record
                        .map(|r| Session::from_record(r, self.config.save_mode)),
                })
                .await;
        }
        Ok(removed)
    }

    /// Remaining lifetime of a record, for stores with native expiry.
    fn remaining_ttl(&self, record: &SessionRecord) -> Option<Duration> {
        self.ttl_for(record.last_accessed_time, record.max_inactive_interval)
    }

    fn ttl_for(
        &self,
        last_accessed: DateTime<Utc>,
        max_inactive: Option<Duration>,
    ) -> Option<Duration> {
        let interval = chrono::Duration::from_std(max_inactive?).ok()?;
        let expires_at = last_accessed.checked_add_signed(interval)?;
        Some(
            (expires_at - self.clock.now())
                .to_std()
                .unwrap_or(Duration::ZERO),
        )
    }

    async fn timed<T>(
        &self,
        fut: impl Future<Output = SessionResult<T>>,
    ) -> SessionResult<T> {
        match self.config.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| SessionError::Timeout)?,
            None => fut.await,
        }
    }
}
