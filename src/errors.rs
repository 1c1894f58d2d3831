use thiserror::Error;

/// Every failure a sync run can hit. Unmatched tracks and failed playlist
/// batches are not errors; they are carried in the `SyncReport`.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("config error: {0}")]
    Config(String),
    #[error("fetch failure: {0}")]
    FetchFailure(String),
    #[error("corrupt checkpoint: {0}")]
    CorruptCheckpoint(String),
    #[error("checkpoint {0} is locked by another run")]
    CheckpointLocked(String),
    #[error("scan exceeded page limit of {0} without reaching the watermark")]
    ScanExceededPageLimit(u32),
    #[error("run cancelled")]
    Cancelled,
    #[error("Spotify API error: {0}")]
    Spotify(#[from] rspotify::ClientError),
    #[error("auth error: {0}")]
    Auth(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::FetchFailure(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Parse(e.to_string())
    }
}
