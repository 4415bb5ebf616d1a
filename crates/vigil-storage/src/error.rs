use rusqlite::ErrorCode;

/// Categorical errors surfaced by the time-series store.
///
/// Callers branch on the category, not the payload: `Transient` is worth
/// one retry, `Malformed` never is, and `BackendUnavailable` means the
/// surrounding loop should degrade rather than block.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store: transient failure: {0}")]
    Transient(String),

    #[error("store: malformed input: {0}")]
    Malformed(String),

    #[error("store: backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(
                    e.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) =>
            {
                StoreError::Transient(err.to_string())
            }
            _ => StoreError::BackendUnavailable(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Malformed(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::BackendUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
