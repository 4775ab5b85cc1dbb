//! Runtime configuration.

use ferrolite_protocol::message::PROTOCOL_VERSION;
use serde::{Deserialize, Serialize};

/// Settings for a [`KernelRuntime`](crate::KernelRuntime).
///
/// Only messages the runtime fabricates itself (interrupt replies and
/// their status updates) are stamped with these values; backend output
/// passes through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// `header.username` of runtime-generated messages.
    pub username: String,
    /// `header.version` of runtime-generated messages.
    pub protocol_version: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            username: "ferrolite".to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
        }
    }
}
