use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Errors returned by the OpenAI API, either as a failed status or inside an event stream
#[derive(Debug, Error)]
pub enum OpenAIApiError {
    #[error("Invalid request (400): {message}")]
    InvalidRequest { message: String },

    #[error("Authentication error (401): {message}")]
    Authentication { message: String },

    #[error("Permission error (403): {message}")]
    Permission { message: String },

    #[error("Not found (404): {message}")]
    NotFound { message: String },

    #[error("Rate limit exceeded (429): {message}")]
    RateLimit { message: String },

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Error event in response stream ({error_type}): {message}")]
    Stream { error_type: String, message: String },

    /// Catch-all for unexpected status codes
    #[error("Unexpected API error ({status}): {message}")]
    Unexpected { status: u16, message: String },
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
}

impl OpenAIApiError {
    /// Maps a failed status to an error, taking the message from the error body if it has one
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorEnvelope>(body)
            .map(|envelope| envelope.error.message)
            .unwrap_or_else(|_| body.to_string());

        match status.as_u16() {
            400 => Self::InvalidRequest { message },
            401 => Self::Authentication { message },
            403 => Self::Permission { message },
            404 => Self::NotFound { message },
            429 => Self::RateLimit { message },
            status @ 500..=599 => Self::Server { status, message },
            status => Self::Unexpected { status, message },
        }
    }

    pub(crate) fn from_stream_error(body: ErrorBody) -> Self {
        Self::Stream {
            error_type: body.error_type.unwrap_or_else(|| "unknown".into()),
            message: body.message,
        }
    }
}

pub(crate) async fn error_from_response(res: reqwest::Response) -> OpenAIApiError {
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    OpenAIApiError::from_response(status, &body)
}
