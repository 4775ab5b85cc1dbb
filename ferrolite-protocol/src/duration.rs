//! Millisecond durations for configuration files.
//!
//! [`DurationMs`] serializes as a bare integer so that a config value such
//! as the restart grace window reads `"restart_grace": 100` rather than
//! serde's `{"secs": 0, "nanos": 100000000}`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Duration in whole milliseconds with a plain-integer serde format.
///
/// ```
/// use ferrolite_protocol::DurationMs;
///
/// let grace = DurationMs::from_millis(100);
/// assert_eq!(serde_json::to_string(&grace).unwrap(), "100");
/// assert_eq!(grace.to_std(), std::time::Duration::from_millis(100));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DurationMs(u64);

impl DurationMs {
    /// Zero duration.
    pub const ZERO: Self = Self(0);

    /// Create from milliseconds.
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Create from seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    /// The value in milliseconds.
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Convert to `std::time::Duration`.
    pub fn to_std(&self) -> Duration {
        Duration::from_millis(self.0)
    }
}

impl From<Duration> for DurationMs {
    fn from(d: Duration) -> Self {
        Self(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

impl From<DurationMs> for Duration {
    fn from(d: DurationMs) -> Self {
        d.to_std()
    }
}

impl Default for DurationMs {
    fn default() -> Self {
        Self::ZERO
    }
}

impl std::fmt::Display for DurationMs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
