use thiserror::Error;

use crate::relay::frames;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Failed to reach upstream provider: {0}")]
    UpstreamConnection(String),

    #[error("Upstream provider returned status {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("Error reading streaming response: {0}")]
    UpstreamRead(String),

    #[error("Malformed upstream payload: {0}")]
    MalformedPayload(String),

    #[error("Downstream client disconnected")]
    DownstreamDisconnected,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl RelayError {
    /// Renders the `event: error` frame the client sees for this failure.
    ///
    /// Status failures forward the upstream body verbatim; everything else
    /// carries the error message.
    #[must_use]
    pub fn to_error_frame(&self) -> String {
        match self {
            Self::UpstreamStatus { status, body } => frames::status_error_frame(*status, body),
            other => frames::message_error_frame(&other.to_string()),
        }
    }

    /// Upstream failures are the only ones surfaced to the client.
    #[must_use]
    pub const fn is_upstream_failure(&self) -> bool {
        matches!(
            self,
            Self::UpstreamConnection(_) | Self::UpstreamStatus { .. } | Self::UpstreamRead(_)
        )
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_body() || error.is_decode() {
            RelayError::UpstreamRead(error.to_string())
        } else {
            RelayError::UpstreamConnection(error.to_string())
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(error: serde_json::Error) -> Self {
        RelayError::MalformedPayload(error.to_string())
    }
}
