use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use sawt_core::{AnswerRequest, AnswerService, BackendError};

use crate::error::ClientError;

/// Posts answer requests to the external answer-generation service.
///
/// The service replies asynchronously by updating the card, so only the
/// status of the dispatch itself is checked.
#[derive(Debug, Clone)]
pub struct AnswerClient {
    client: Client,
    endpoint: Url,
}

impl AnswerClient {
    /// # Errors
    ///
    /// Returns [`ClientError::Http`] if the `reqwest::Client` cannot be built,
    /// or [`ClientError::InvalidBaseUrl`] if `endpoint` does not parse.
    pub fn new(endpoint: &str, timeout_secs: u64) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        let endpoint = Url::parse(endpoint).map_err(|e| ClientError::InvalidBaseUrl {
            url: endpoint.to_owned(),
            reason: e.to_string(),
        })?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl AnswerService for AnswerClient {
    async fn request_answer(&self, request: &AnswerRequest) -> Result<(), BackendError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(ClientError::from)?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(card_id = %request.card_id, "answer request accepted");
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        Err(ClientError::Api {
            status: status.as_u16(),
            code: "answer_service".to_owned(),
            message,
        }
        .into())
    }
}
