//! HTTP client for the Sawt card API.
//!
//! Every route answers with `{data, meta}` on success and
//! `{error: {code, message}, meta}` otherwise. Reads are retried on transient
//! failures; writes are sent once.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::StreamExt;
use reqwest::{header, Client, Response, StatusCode, Url};
use sawt_core::{
    BackendError, BiasReport, Card, CardApi, CardChange, CardId, CardSource, ChangeFeed,
    ClientConfig, NewCard, Subscription,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ClientError;
use crate::retry::retry_with_backoff;
use crate::sse::SseDecoder;

const USER_AGENT: &str = "sawt/0.1 (results-feed)";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CHANGE_EVENT: &str = "change";
const SUBSCRIPTION_BUFFER: usize = 16;

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct CreatedCard {
    card: Card,
}

#[derive(Debug, Serialize)]
struct LikeRequest<'a> {
    card_id: &'a CardId,
}

#[derive(Debug, Deserialize)]
struct LikeResponse {
    likes: u32,
}

/// Client for the card API.
///
/// Use [`SawtClient::new`] with a loaded [`ClientConfig`], or
/// [`SawtClient::with_base_url`] to point at a mock server in tests.
#[derive(Debug, Clone)]
pub struct SawtClient {
    client: Client,
    /// No total timeout: change streams stay open indefinitely.
    stream_client: Client,
    base_url: Url,
    max_retries: u32,
    retry_backoff_base_ms: u64,
}

impl SawtClient {
    /// # Errors
    ///
    /// Returns [`ClientError::Http`] if a `reqwest::Client` cannot be built,
    /// or [`ClientError::InvalidBaseUrl`] for an unusable base URL.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        Ok(
            Self::with_base_url(&config.api_base_url, config.request_timeout_secs)?
                .with_retry(config.max_retries, config.retry_backoff_base_ms),
        )
    }

    /// Creates a client with a custom base URL and no retries.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Http`] if a `reqwest::Client` cannot be built,
    /// or [`ClientError::InvalidBaseUrl`] if `base_url` does not parse or
    /// cannot carry a path.
    pub fn with_base_url(base_url: &str, timeout_secs: u64) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        let stream_client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;

        let normalised = format!("{}/", base_url.trim_end_matches('/'));
        let invalid = |reason: String| ClientError::InvalidBaseUrl {
            url: base_url.to_owned(),
            reason,
        };
        let parsed = Url::parse(&normalised).map_err(|e| invalid(e.to_string()))?;
        if parsed.cannot_be_a_base() {
            return Err(invalid("URL cannot carry a path".to_owned()));
        }

        Ok(Self {
            client,
            stream_client,
            base_url: parsed,
            max_retries: 0,
            retry_backoff_base_ms: 0,
        })
    }

    #[must_use]
    pub fn with_retry(mut self, max_retries: u32, retry_backoff_base_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff_base_ms = retry_backoff_base_ms;
        self
    }

    /// `<base>/api/v1/<segments...>`, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ClientError::InvalidBaseUrl {
                url: self.base_url.to_string(),
                reason: "URL cannot carry a path".to_owned(),
            })?
            .pop_if_empty()
            .extend(["api", "v1"])
            .extend(segments);
        Ok(url)
    }

    async fn list_once(
        &self,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Card>, ClientError> {
        let mut url = self.endpoint(&["cards"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &limit.to_string());
            if let Some(before) = before {
                query.append_pair("before", &before.to_rfc3339_opts(SecondsFormat::Micros, true));
            }
        }
        let response = self.client.get(url).send().await?;
        decode(response, "list_public_cards").await
    }

    async fn fetch_once(&self, id: &CardId) -> Result<Card, ClientError> {
        let url = self.endpoint(&["cards", id.as_str()])?;
        let response = self.client.get(url).send().await?;
        decode(response, "fetch_card")
            .await
            .map_err(|e| not_found_as(e, id))
    }
}

/// Unwraps `{data}` from a success response or turns the error envelope into
/// [`ClientError::Api`].
async fn decode<T: DeserializeOwned>(response: Response, context: &str) -> Result<T, ClientError> {
    let status = response.status();
    let body = response.bytes().await?;

    if !status.is_success() {
        let (code, message) = match serde_json::from_slice::<ErrorEnvelope>(&body) {
            Ok(envelope) => (envelope.error.code, envelope.error.message),
            Err(_) => (
                "http_error".to_owned(),
                String::from_utf8_lossy(&body).into_owned(),
            ),
        };
        return Err(ClientError::Api {
            status: status.as_u16(),
            code,
            message,
        });
    }

    let envelope: DataEnvelope<T> =
        serde_json::from_slice(&body).map_err(|e| ClientError::Deserialize {
            context: context.to_owned(),
            source: e,
        })?;
    Ok(envelope.data)
}

fn not_found_as(err: ClientError, id: &CardId) -> ClientError {
    match err {
        ClientError::Api { status: 404, .. } => ClientError::NotFound(id.clone()),
        other => other,
    }
}

#[async_trait]
impl CardSource for SawtClient {
    async fn list_public_cards(
        &self,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Card>, BackendError> {
        let cards = retry_with_backoff(self.max_retries, self.retry_backoff_base_ms, || {
            self.list_once(before, limit)
        })
        .await?;
        tracing::debug!(count = cards.len(), ?before, "fetched page of cards");
        Ok(cards)
    }

    async fn fetch_card(&self, id: &CardId) -> Result<Card, BackendError> {
        Ok(
            retry_with_backoff(self.max_retries, self.retry_backoff_base_ms, || {
                self.fetch_once(id)
            })
            .await?,
        )
    }
}

#[async_trait]
impl CardApi for SawtClient {
    async fn create_card(&self, new_card: &NewCard) -> Result<Card, BackendError> {
        let url = self.endpoint(&["cards"])?;
        let response = self
            .client
            .post(url)
            .json(new_card)
            .send()
            .await
            .map_err(ClientError::from)?;
        let created: CreatedCard = decode(response, "create_card").await?;
        Ok(created.card)
    }

    async fn like_card(&self, id: &CardId) -> Result<u32, BackendError> {
        let url = self.endpoint(&["cards", "like"])?;
        let response = self
            .client
            .post(url)
            .json(&LikeRequest { card_id: id })
            .send()
            .await
            .map_err(ClientError::from)?;
        let liked: LikeResponse = decode(response, "like_card")
            .await
            .map_err(|e| not_found_as(e, id))?;
        Ok(liked.likes)
    }

    async fn report_bias(&self, id: &CardId, report: &BiasReport) -> Result<(), BackendError> {
        let url = self.endpoint(&["cards", id.as_str(), "bias"])?;
        let response = self
            .client
            .post(url)
            .json(report)
            .send()
            .await
            .map_err(ClientError::from)?;
        decode::<serde_json::Value>(response, "report_bias")
            .await
            .map_err(|e| not_found_as(e, id))?;
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for SawtClient {
    async fn subscribe(&self, id: &CardId) -> Result<Subscription, BackendError> {
        let url = self.endpoint(&["cards", id.as_str(), "events"])?;
        let response = self
            .stream_client
            .get(url)
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(ClientError::from)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound(id.clone()));
        }
        if !status.is_success() {
            let err = decode::<serde_json::Value>(response, "subscribe")
                .await
                .err()
                .unwrap_or(ClientError::Api {
                    status: status.as_u16(),
                    code: "http_error".to_owned(),
                    message: "unexpected response".to_owned(),
                });
            return Err(err.into());
        }

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let card_id = id.clone();
        let mut body = response.bytes_stream();

        let producer = tokio::spawn(async move {
            let mut decoder = SseDecoder::new();
            while let Some(chunk) = body.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(card_id = %card_id, error = %e, "change stream failed");
                        return;
                    }
                };
                for event in decoder.push(&bytes) {
                    if event.event != CHANGE_EVENT {
                        continue;
                    }
                    match serde_json::from_str::<CardChange>(&event.data) {
                        Ok(change) => {
                            if tx.send(change).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(card_id = %card_id, error = %e, "ignoring malformed change event");
                        }
                    }
                }
            }
            tracing::debug!(card_id = %card_id, "change stream ended");
        });

        Ok(Subscription::new(rx, producer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_appends_segments_to_base_path() {
        let client = SawtClient::with_base_url("http://localhost:3000/feed/", 5).unwrap();
        let url = client.endpoint(&["cards", "a b", "events"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:3000/feed/api/v1/cards/a%20b/events"
        );
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let err = SawtClient::with_base_url("not a url", 5).unwrap_err();
        assert!(matches!(err, ClientError::InvalidBaseUrl { .. }));
    }

    #[test]
    fn not_found_as_keeps_other_errors() {
        let id = CardId::from("x");
        let err = not_found_as(
            ClientError::Api {
                status: 500,
                code: "internal_error".to_owned(),
                message: String::new(),
            },
            &id,
        );
        assert!(matches!(err, ClientError::Api { status: 500, .. }));
        assert!(matches!(
            not_found_as(
                ClientError::Api {
                    status: 404,
                    code: "not_found".to_owned(),
                    message: String::new(),
                },
                &id
            ),
            ClientError::NotFound(_)
        ));
    }
}
