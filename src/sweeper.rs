//! Background expiration sweeper.
//!
//! For stores without native TTL, expired sessions linger until someone
//! looks them up. The sweeper is the proactive half of the contract: a
//! periodic task that walks expired records through the same removal,
//! index-cleanup, and event path as lazy expiration, so downstream
//! consumers see identical `Expired` events no matter which mechanism
//! caught the session first.

use crate::error::{SessionError, SessionResult};
use crate::repository::SessionRepository;
use crate::traits::AttributeStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Periodic expiration sweep with an explicit start/stop lifecycle.
///
/// Runs independently of request handling and holds no lock that blocks
/// request-path operations; collisions with lazy expiration are resolved
/// by the repository's idempotent expiry path, not by mutual exclusion.
///
/// # Examples
///
/// ```no_run
/// use tessera::{ExpirationSweeper, InMemoryStore, SessionRepository};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), tessera::SessionError> {
/// let repository = Arc::new(SessionRepository::new(Arc::new(InMemoryStore::new())));
///
/// let mut sweeper = ExpirationSweeper::new(repository);
/// sweeper.start().await?;
/// // ... serve traffic ...
/// sweeper.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct ExpirationSweeper<S: AttributeStore + 'static> {
    repository: Arc<SessionRepository<S>>,
    interval: Duration,
    running: Arc<RwLock<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl<S: AttributeStore + 'static> ExpirationSweeper<S> {
    /// Create a sweeper ticking at the repository's configured sweep
    /// interval.
    pub fn new(repository: Arc<SessionRepository<S>>) -> Self {
        let interval = repository.config().sweep_interval;
        Self {
            repository,
            interval,
            running: Arc::new(RwLock::new(false)),
            handle: None,
        }
    }

    /// Override the tick interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start the background sweep task.
    pub async fn start(&mut self) -> SessionResult<()> {
        let mut running = self.running.write().await;
        if *running {
            return Err(SessionError::SweeperAlreadyRunning);
        }
        *running = true;
        drop(running);

        info!("Expiration sweeper started, interval {:?}", self.interval);

        let repository = self.repository.clone();
        let running = self.running.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            while *running.read().await {
                if let Err(e) = repository.sweep().await {
                    error!("Expiration sweep failed: {}", e);
                }
                tokio::time::sleep(interval).await;
            }
        });

        self.handle = Some(handle);
        Ok(())
    }

    /// Stop the background sweep task.
    pub async fn stop(&mut self) -> SessionResult<()> {
        let mut running = self.running.write().await;
        if !*running {
            return Err(SessionError::SweeperNotRunning);
        }
        *running = false;
        drop(running);

        if let Some(handle) = self.handle.take() {
            handle.abort();
        }

        info!("Expiration sweeper stopped");
        Ok(())
    }

    /// Whether the sweeper is running.
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

impl<S: AttributeStore + 'static> Drop for ExpirationSweeper<S> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
