use thiserror::Error;

/// Failures of one backfill invocation.
///
/// Tolerated statuses (unknown patch, spoiler not generated yet) are not errors;
/// the provider reports them as [`super::provider::PatchLookup::NotFound`] and `Ok(None)`.
#[derive(Error, Debug)]
pub enum SeedError {
    #[error("{endpoint}: http {status}: {body}")]
    RemoteUnavailable {
        endpoint: &'static str,
        status: u16,
        body: String,
    },
    /// Transport failure, with the request URL (and its `key=`) stripped.
    #[error("network: {0}")]
    Net(#[source] reqwest::Error),
    #[error("parse: {0}")]
    Parse(String),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("db: {0}")]
    Db(#[from] sqlx::Error),
    #[error("store: {0}")]
    Store(String),
    #[error("no file stem available for seed {0}")]
    MissingFileStem(u64),
    #[error("no correlation keys supplied; pass at least one or use artifact-only mode")]
    NoCorrelationKeys,
}

impl SeedError {
    pub fn parse(msg: impl Into<String>) -> Self {
        SeedError::Parse(msg.into())
    }

    /// Persistence-side failures (filesystem or store).
    pub fn is_persistence(&self) -> bool {
        matches!(self, SeedError::Io(_) | SeedError::Db(_) | SeedError::Store(_))
    }

    /// Remote-side failures that aborted the invocation.
    pub fn is_remote(&self) -> bool {
        matches!(self, SeedError::RemoteUnavailable { .. } | SeedError::Net(_))
    }
}

impl From<reqwest::Error> for SeedError {
    fn from(e: reqwest::Error) -> Self {
        SeedError::Net(e.without_url())
    }
}

pub type SeedResult<T> = std::result::Result<T, SeedError>;
