use thiserror::Error;

/// Per-call failures of the extraction and scoring clients.
#[derive(Debug, Error)]
pub(crate) enum ServiceError {
    #[error("{0}")]
    Configuration(&'static str),
    #[error("{service} request timed out")]
    Timeout { service: &'static str },
    #[error("{service} request failed: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{service} error: {message}")]
    Protocol { service: &'static str, message: String },
    #[error("no text recognized in image")]
    NothingRecognized,
}

impl ServiceError {
    pub(crate) fn transport(service: &'static str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { service }
        } else {
            Self::Transport { service, source }
        }
    }

    pub(crate) fn protocol(service: &'static str, message: impl Into<String>) -> Self {
        Self::Protocol { service, message: message.into() }
    }
}
