//! Session lifecycle events and the publisher contract.

use crate::session::Session;
use async_trait::async_trait;
use tracing::debug;

/// A session lifecycle notification.
///
/// `Deleted` and `Expired` may carry no session when the backend's
/// optimized removal path avoids a round-trip fetch of the full record
/// before deletion; consumers must handle the absence.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A new session was persisted for the first time.
    Created {
        /// The session as persisted
        session: Session,
    },
    /// A session was explicitly deleted.
    Deleted {
        /// Id of the deleted session
        id: String,
        /// The session as last stored, when it was fetched before removal
        session: Option<Session>,
    },
    /// A session exceeded its max-inactive interval and was removed,
    /// whether by lazy expiration, the sweeper, or native store eviction.
    Expired {
        /// Id of the expired session
        id: String,
        /// The session as last stored, when it was fetched before removal
        session: Option<Session>,
    },
}

impl SessionEvent {
    /// Id of the session this event concerns.
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::Created { session } => session.id(),
            SessionEvent::Deleted { id, .. } | SessionEvent::Expired { id, .. } => id,
        }
    }
}

/// Fire-and-forget sink for session lifecycle events.
///
/// Supplied to the repository at construction. Publishers must not fail
/// the session operation that triggered the event; errors are theirs to
/// handle internally.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Deliver an event.
    async fn publish(&self, event: SessionEvent);
}

/// Publisher that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventPublisher;

#[async_trait]
impl EventPublisher for NullEventPublisher {
    async fn publish(&self, event: SessionEvent) {
        debug!("Dropping session event for {}", event.session_id());
    }
}
