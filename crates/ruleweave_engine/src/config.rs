//! Session configuration.

/// Default kill-switch threshold for one `fire` call.
pub const DEFAULT_MAX_FIRES: usize = 10_000;

/// Configuration for a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Activations one `fire` call may fire before it fails with
    /// `LimitExceeded`.
    pub max_fires: usize,

    /// Events kept in the session's event log (0 = no recording).
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_fires: DEFAULT_MAX_FIRES,
            event_capacity: 0,
        }
    }
}

impl SessionConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration that records the most recent events.
    #[must_use]
    pub fn recording(capacity: usize) -> Self {
        Self {
            event_capacity: capacity,
            ..Self::default()
        }
    }

    /// Builder method to set the kill-switch threshold.
    #[must_use]
    pub fn with_max_fires(mut self, max_fires: usize) -> Self {
        self.max_fires = max_fires;
        self
    }

    /// Builder method to set the event log capacity.
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}
