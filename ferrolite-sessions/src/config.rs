//! Session store configuration.

use ferrolite_protocol::DurationMs;
use serde::{Deserialize, Serialize};

/// Settings for a [`SessionStore`](crate::SessionStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a removed kernel may stay gone before its sessions are
    /// reaped. A restart that brings the id back inside this window is
    /// invisible to sessions.
    pub restart_grace: DurationMs,
    /// `type` of sessions started without one.
    pub default_type: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            restart_grace: DurationMs::from_millis(100),
            default_type: "notebook".to_string(),
        }
    }
}
