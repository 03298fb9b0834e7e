use thiserror::Error;

/// Error taxonomy for engine operations.
///
/// A failed anti-cheat verdict is deliberately NOT represented here: an
/// invalid result is a stored business outcome (`TestResult::is_valid ==
/// false`), not an error path. Callers only see an `Err` when a flow has to
/// be restarted (NotFound), was never allowed (Forbidden), or the store
/// itself failed.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("user {0} not found")]
    UserNotFound(i64),

    /// The session no longer exists (finalized, cancelled, or replaced).
    /// The caller must start a new session.
    #[error("session {0} not found or expired")]
    SessionNotFound(i64),

    #[error("result {0} not found")]
    ResultNotFound(i64),

    /// Ownership mismatch on delete. Never collapsed into NotFound so the
    /// distinction stays visible to callers and audit logs.
    #[error("result {result_id} is not owned by user {user_id}")]
    Forbidden { result_id: i64, user_id: i64 },

    #[error("unknown IANA timezone: {0}")]
    UnknownTimezone(String),

    #[error(transparent)]
    Store(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
