use sawt_core::{BackendError, CardId};
use thiserror::Error;

/// Errors returned by the HTTP clients.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or TLS failure from the underlying HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-2xx status and an error envelope.
    #[error("API error {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("card not found: {0}")]
    NotFound(CardId),

    /// The response body could not be deserialized into the expected type.
    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

impl From<ClientError> for BackendError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::NotFound(id) => BackendError::NotFound(id),
            ClientError::Api { status, message, .. } if status == 400 => {
                BackendError::Validation(message)
            }
            ClientError::Api {
                status, message, ..
            } => BackendError::Rejected { status, message },
            ClientError::Http(e) => match e.status() {
                Some(status) => BackendError::Rejected {
                    status: status.as_u16(),
                    message: e.to_string(),
                },
                None => BackendError::Transport(e.to_string()),
            },
            other @ (ClientError::Deserialize { .. } | ClientError::InvalidBaseUrl { .. }) => {
                BackendError::Rejected {
                    status: 0,
                    message: other.to_string(),
                }
            }
        }
    }
}
