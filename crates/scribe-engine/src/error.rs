use scribe_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("session busy: {0}")]
    SessionBusy(String),

    /// The caller cancelled the run. Reported to the client as the terminal
    /// error message.
    #[error("request cancelled")]
    Aborted,
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_not_found())
    }
}
