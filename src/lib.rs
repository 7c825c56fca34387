//! Backend-agnostic session lifecycle management.
//!
//! Tessera implements the session-lifecycle protocol once (change
//! tracking to minimize writes, independently configurable save/flush
//! policies, expiration that works with or without native store TTL, a
//! principal-name secondary index, and lifecycle event publication) and
//! leaves concrete storage to implementations of a narrow
//! [`AttributeStore`] interface. A backend supplies
//! get/put/delete/partial-update plus three index operations; it never
//! re-derives the policy logic.
//!
//! # Core pieces
//!
//! - [`Session`] - one session's identity, timestamps, attributes, and
//!   the delta accumulated since its last persist
//! - [`SaveMode`] / [`FlushMode`] - when an attribute access becomes part
//!   of the delta, and when the delta is sent to the store
//! - [`SessionRepository`] - create/find/save/delete orchestration,
//!   principal-index maintenance, and event publication
//! - [`ExpirationSweeper`] - periodic cleanup for stores without native
//!   TTL, publishing the same `Expired` events as lazy expiration
//! - [`InMemoryStore`] / [`RedisAttributeStore`] - reference and Redis
//!   backends
//!
//! # Features
//!
//! - `redis` - Redis attribute store (enabled by default)
//!
//! # Examples
//!
//! ```
//! use tessera::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SessionError> {
//!     let config = SessionConfig::new()
//!         .with_namespace("myapp:session")
//!         .with_default_max_inactive(Some(Duration::from_secs(3600)));
//!
//!     let repository = Arc::new(
//!         SessionRepository::new(Arc::new(InMemoryStore::new())).with_config(config),
//!     );
//!
//!     // Create a new session
//!     let mut session = repository.create();
//!     session.set("user_id", 123)?;
//!     session.set("username", "alice")?;
//!     repository.save(&mut session).await?;
//!
//!     // Retrieve it later
//!     if let Some(mut session) = repository.find_by_id(session.id()).await? {
//!         let user_id: Option<i32> = session.get("user_id");
//!         println!("User ID: {:?}", user_id);
//!     }
//!
//!     // Proactive cleanup for stores without native TTL
//!     let mut sweeper = ExpirationSweeper::new(repository.clone());
//!     sweeper.start().await?;
//!
//!     // Delete the session (logout)
//!     repository.delete_by_id(session.id()).await?;
//!
//!     sweeper.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod memory_store;
pub mod repository;
pub mod session;
pub mod sweeper;
pub mod traits;

#[cfg(feature = "redis")]
pub mod redis_store;

pub use config::{FlushMode, SaveMode, SessionConfig};
pub use error::{SessionError, SessionResult};
pub use events::{EventPublisher, NullEventPublisher, SessionEvent};
pub use memory_store::InMemoryStore;
pub use repository::SessionRepository;
pub use session::{RecordDelta, Session, SessionRecord};
pub use sweeper::ExpirationSweeper;
pub use traits::{
    AttributeStore, Clock, Codec, DefaultPrincipalResolver, JsonCodec, PrincipalNameResolver,
    SystemClock, generate_session_id, PRINCIPAL_NAME_ATTRIBUTE, SECURITY_CONTEXT_ATTRIBUTE,
};

#[cfg(feature = "redis")]
pub use redis_store::RedisAttributeStore;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{FlushMode, SaveMode, SessionConfig};
    pub use crate::error::{SessionError, SessionResult};
    pub use crate::events::{EventPublisher, NullEventPublisher, SessionEvent};
    pub use crate::memory_store::InMemoryStore;
    pub use crate::repository::SessionRepository;
    pub use crate::session::Session;
    pub use crate::sweeper::ExpirationSweeper;
    pub use crate::traits::{
        AttributeStore, Clock, Codec, PrincipalNameResolver, SystemClock, generate_session_id,
    };

    #[cfg(feature = "redis")]
    pub use crate::redis_store::RedisAttributeStore;
}
