// ============================================================================
// File: src/status.rs
// ----------------------------------------------------------------------------
// Normalized instance status snapshot shared by all backends.
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

/// Normalized lifecycle phase of an instance.
///
/// Every backend reports state in its own vocabulary; drivers map those
/// strings onto this enum. States a driver does not recognize normalize to
/// `Transitional` so callers can retry instead of misreading reality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// No instance with the bound name exists in the backend.
    Absent,
    /// The instance exists but is not running.
    Stopped,
    /// The instance is running and reachable.
    Running,
    /// The instance is frozen by the backend.
    Paused,
    /// The backend reported an in-between or unrecognized state.
    Transitional,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Absent => "absent",
            Phase::Stopped => "stopped",
            Phase::Running => "running",
            Phase::Paused => "paused",
            Phase::Transitional => "transitional",
        };
        f.write_str(name)
    }
}

/// Snapshot of backend-reported state for one bound instance.
///
/// Recomputed on every query. The backend owns the truth; nothing here is
/// ever cached between calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Normalized lifecycle phase.
    pub phase: Phase,

    /// Backend-native identity. Empty exactly when no instance exists.
    pub id: String,
}

impl Status {
    /// Status for an instance that does not exist in the backend.
    pub fn absent() -> Self {
        Self {
            phase: Phase::Absent,
            id: String::new(),
        }
    }

    /// Status for an existing instance with the given identity and phase.
    pub fn existing<I: Into<String>>(phase: Phase, id: I) -> Self {
        Self {
            phase,
            id: id.into(),
        }
    }

    /// Whether an instance currently exists in the backend.
    pub fn exists(&self) -> bool {
        !self.id.is_empty()
    }

    /// Whether the instance is in the `Running` phase.
    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }
}

/// Externally reachable address of an instance's access service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessAddress {
    /// Host to connect to. Loopback for local-only backends.
    pub host: String,

    /// Host-side port mapped to the instance's access port.
    pub port: u16,
}

impl fmt::Display for AccessAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_status_has_empty_identity() {
        let status = Status::absent();
        assert_eq!(status.phase, Phase::Absent);
        assert!(!status.exists());
        assert!(!status.is_running());
    }

    #[test]
    fn existing_status() {
        let status = Status::existing(Phase::Running, "abc123");
        assert!(status.exists());
        assert!(status.is_running());
    }

    #[test]
    fn access_address_display() {
        let addr = AccessAddress {
            host: "127.0.0.1".to_string(),
            port: 32022,
        };
        assert_eq!(addr.to_string(), "127.0.0.1:32022");
    }
}
