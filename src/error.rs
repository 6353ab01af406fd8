pub type RopwatchResult<T> = Result<T, RopwatchError>;

#[derive(thiserror::Error, Debug)]
pub enum RopwatchError {
    /// The render process could not be launched. The only error surfaced to
    /// the user as a blocking failure; everything else is absorbed by the
    /// monitor and reported, at most, as informational output.
    #[error("spawn error: {0}")]
    Spawn(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("probe error: {0}")]
    Probe(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RopwatchError {
    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::Spawn(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn probe(msg: impl Into<String>) -> Self {
        Self::Probe(msg.into())
    }
}
