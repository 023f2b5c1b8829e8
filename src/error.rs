// ============================================================================
// File: src/error.rs
// ----------------------------------------------------------------------------
// Lifecycle error taxonomy shared by drivers and the instance manager.
// ============================================================================

use crate::status::Phase;

/// Errors surfaced by lifecycle operations.
///
/// Drivers never swallow backend failures; every variant carries the
/// operation and bound instance context so the boundary can log it.
/// `BackendUnavailable`, `ImagePullFailed` and `CredentialInjectionFailed`
/// are recoverable and may be retried by the caller. `InvalidState` and
/// `InvalidIdentity` mean the caller must re-query status and decide.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LifecycleError {
    /// The backend could not be reached.
    #[error("backend {backend} unavailable: {reason}")]
    BackendUnavailable {
        backend: &'static str,
        reason: String,
    },

    /// The required image could not be fetched.
    #[error("failed to pull image '{image}': {reason}")]
    ImagePullFailed { image: String, reason: String },

    /// The operation was attempted from a phase outside its source set.
    #[error("cannot {operation} instance '{instance}' while {phase}")]
    InvalidState {
        operation: &'static str,
        instance: String,
        phase: Phase,
    },

    /// The operation targets an instance that does not exist.
    #[error("cannot {operation} instance '{instance}': no such instance")]
    InvalidIdentity {
        operation: &'static str,
        instance: String,
    },

    /// The remote command writing the access credential failed.
    #[error("credential injection into instance '{instance}' failed: {reason}")]
    CredentialInjectionFailed { instance: String, reason: String },

    /// Readiness polling exceeded its deadline.
    #[error("instance '{instance}' not running after {waited_secs}s")]
    ProvisioningTimeout { instance: String, waited_secs: u64 },

    /// A lifecycle operation was invoked before `bind`.
    #[error("cannot {operation}: driver has no bound template")]
    Unbound { operation: &'static str },

    /// Internal error with no recovery guidance.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl LifecycleError {
    /// Convenience constructor for `BackendUnavailable`.
    pub fn backend_unavailable<R: Into<String>>(backend: &'static str, reason: R) -> Self {
        Self::BackendUnavailable {
            backend,
            reason: reason.into(),
        }
    }

    /// Convenience constructor for `Internal`.
    pub fn internal<M: Into<String>>(message: M) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Result type for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;
