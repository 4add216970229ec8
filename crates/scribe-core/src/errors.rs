/// Failures raised by the upstream agent runtime, either when a query is
/// started or while its event stream is being consumed.
#[derive(Clone, Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to start runtime: {0}")]
    Spawn(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("malformed event: {0}")]
    Decode(String),
    #[error("runtime exited with status {0}")]
    Exited(i32),
}

impl RuntimeError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Spawn(_) => "spawn",
            Self::Io(_) => "io",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::Decode(_) => "decode",
            Self::Exited(_) => "exited",
        }
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(e: std::io::Error) -> Self {
        RuntimeError::Io(e.to_string())
    }
}
