use reqwest::StatusCode;

/// Errors raised while talking to the tracker API.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// The token endpoint refused the refresh-token exchange. Fatal for the run.
    #[error("Token exchange failed with status {status}: {body}")]
    Auth { status: StatusCode, body: String },
    /// Any non-200 response from a resource or gateway call.
    #[error("Request to {url} returned {status}: {body}")]
    Transport {
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TrackerError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            TrackerError::Auth { status, .. } | TrackerError::Transport { status, .. } => {
                Some(*status)
            }
            TrackerError::Http(e) => e.status(),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, TrackerError::Transport { status, .. } if *status == StatusCode::UNAUTHORIZED)
    }
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

/// Outcome of a pagination loop.
///
/// When `error` is set the loop was cut short by a failed page and `items`
/// holds only what had been accumulated before it. Callers must not treat a
/// partial result as authoritative.
#[derive(Debug)]
pub struct PartialResult<T> {
    pub items: Vec<T>,
    pub error: Option<TrackerError>,
}

impl<T> PartialResult<T> {
    pub fn complete(items: Vec<T>) -> Self {
        Self { items, error: None }
    }

    pub fn partial(items: Vec<T>, error: TrackerError) -> Self {
        Self {
            items,
            error: Some(error),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// Converts into a strict result, discarding accumulated items on failure.
    pub fn into_result(self) -> TrackerResult<Vec<T>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.items),
        }
    }
}
