//! Session configuration and write-policy enums.

use std::time::Duration;

/// Policy controlling which attribute accesses mark an attribute dirty.
///
/// Applied on every attribute read and write. Whatever ends up dirty is
/// what the next partial save sends to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveMode {
    /// Reads and writes both mark the attribute dirty. Every attribute the
    /// caller touches rides along on the next save, whether or not its
    /// value changed.
    Always,
    /// Only writes mark the attribute dirty. Reads never grow the delta.
    #[default]
    OnSetAttribute,
    /// Reads and writes both mark the attribute dirty.
    OnGetAttribute,
}

impl SaveMode {
    /// Whether reading an attribute records it in the delta.
    pub fn records_reads(&self) -> bool {
        matches!(self, SaveMode::Always | SaveMode::OnGetAttribute)
    }
}

/// Policy controlling when dirty state is sent to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// The delta accumulates until an explicit `save()`.
    #[default]
    OnSave,
    /// Every mutation made through the repository's convenience mutators
    /// triggers a persist of the current delta.
    Immediate,
}

/// Session configuration.
///
/// Backend-agnostic knobs consumed by [`SessionRepository`] and the
/// [`ExpirationSweeper`]. Backend connection details (URLs, credentials)
/// belong to the individual `AttributeStore` implementations.
///
/// [`SessionRepository`]: crate::repository::SessionRepository
/// [`ExpirationSweeper`]: crate::sweeper::ExpirationSweeper
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Key namespace/prefix for store-side records
    pub namespace: String,
    /// Default max-inactive interval for new sessions; `None` means
    /// sessions never expire
    pub default_max_inactive: Option<Duration>,
    /// Dirty-marking policy
    pub save_mode: SaveMode,
    /// Persist policy
    pub flush_mode: FlushMode,
    /// Interval between expiration sweeps
    pub sweep_interval: Duration,
    /// Per-operation store timeout; `None` disables the bound
    pub operation_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            namespace: "session".to_string(),
            default_max_inactive: Some(Duration::from_secs(1800)), // 30 minutes
            save_mode: SaveMode::default(),
            flush_mode: FlushMode::default(),
            sweep_interval: Duration::from_secs(60),
            operation_timeout: None,
        }
    }
}

impl SessionConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the key namespace/prefix.
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    /// Set the default max-inactive interval for new sessions.
    ///
    /// `None` creates sessions that never expire.
    pub fn with_default_max_inactive(mut self, interval: Option<Duration>) -> Self {
        self.default_max_inactive = interval;
        self
    }

    /// Set the dirty-marking policy.
    pub fn with_save_mode(mut self, mode: SaveMode) -> Self {
        self.save_mode = mode;
        self
    }

    /// Set the persist policy.
    pub fn with_flush_mode(mut self, mode: FlushMode) -> Self {
        self.flush_mode = mode;
        self
    }

    /// Set the interval between expiration sweeps.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Bound every store operation with a timeout.
    ///
    /// A timed-out save fails with [`SessionError::Timeout`] and leaves
    /// the session's delta intact, so a retry re-attempts the same write.
    ///
    /// [`SessionError::Timeout`]: crate::error::SessionError::Timeout
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Build the store key for a session id with the configured namespace.
    pub fn session_key(&self, session_id: &str) -> String {
        format!("{}:{}", self.namespace, session_id)
    }
}
