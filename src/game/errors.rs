use thiserror::Error;

/// Errors raised by world-store operations. All failures are local and
/// synchronous; retry policy belongs to the caller.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Unknown bonfire, agent, quest, room, NPC, or object.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad input shape or value (reward < 1, negative cooldown, expired quest).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Duplicate claim, or re-registration bound to a different wallet.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Ownership checks, cooldown windows, quota exhaustion.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Snapshot file IO. Propagates as fatal while the lock is held so a
    /// wedged write is visible immediately instead of silently losing a
    /// mutation.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot serialization.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
