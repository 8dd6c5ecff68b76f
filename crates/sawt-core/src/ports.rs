//! Collaborator seams: the card source, the write API, the change feed and
//! the answer-generation service.
//!
//! Every implementation reports failures as [`BackendError`] so the feed can
//! decide between retry, rollback and "leave pending" without knowing which
//! transport produced the error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::card::{AnswerRequest, BiasReport, Card, CardChange, CardId, NewCard};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("card not found: {0}")]
    NotFound(CardId),

    #[error("validation failed: {0}")]
    Validation(String),

    /// Network, timeout or 5xx-class failure. Safe to retry.
    #[error("transport error: {0}")]
    Transport(String),

    /// The collaborator answered but refused the request.
    #[error("request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("subscription error: {0}")]
    Subscription(String),
}

impl BackendError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Transport(_) => true,
            BackendError::Rejected { status, .. } => *status == 429 || *status >= 500,
            BackendError::NotFound(_)
            | BackendError::Validation(_)
            | BackendError::Subscription(_) => false,
        }
    }
}

/// Read access to cards.
#[async_trait]
pub trait CardSource: Send + Sync {
    /// Public cards created strictly before `before` (all when `None`),
    /// newest first, at most `limit` of them.
    async fn list_public_cards(
        &self,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Card>, BackendError>;

    /// One card by id, whatever its status.
    async fn fetch_card(&self, id: &CardId) -> Result<Card, BackendError>;
}

/// Writes that go through the same-origin API routes.
#[async_trait]
pub trait CardApi: Send + Sync {
    /// Inserts a card with server defaults (`status = new`, `likes = 0`).
    async fn create_card(&self, new_card: &NewCard) -> Result<Card, BackendError>;

    /// Atomically increments `likes` and returns the authoritative count.
    async fn like_card(&self, id: &CardId) -> Result<u32, BackendError>;

    async fn report_bias(&self, id: &CardId, report: &BiasReport) -> Result<(), BackendError>;
}

/// Server-side store: reads, writes and a health check.
#[async_trait]
pub trait CardStore: CardSource + CardApi {
    async fn health_check(&self) -> Result<(), BackendError>;
}

/// Push notifications of field changes for a single card.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, id: &CardId) -> Result<Subscription, BackendError>;
}

/// Fire-and-forget request asking the external service to answer a card.
#[async_trait]
pub trait AnswerService: Send + Sync {
    async fn request_answer(&self, request: &AnswerRequest) -> Result<(), BackendError>;
}

/// An open change subscription: a receiver fed by a producer task.
#[derive(Debug)]
pub struct Subscription {
    changes: mpsc::Receiver<CardChange>,
    producer: Option<JoinHandle<()>>,
}

impl Subscription {
    #[must_use]
    pub fn new(changes: mpsc::Receiver<CardChange>, producer: JoinHandle<()>) -> Self {
        Self {
            changes,
            producer: Some(producer),
        }
    }

    /// A subscription with no producer task, fed directly by the caller.
    #[must_use]
    pub fn from_receiver(changes: mpsc::Receiver<CardChange>) -> Self {
        Self {
            changes,
            producer: None,
        }
    }

    /// Next change, or `None` once the producer has gone away.
    pub async fn next(&mut self) -> Option<CardChange> {
        self.changes.recv().await
    }

    /// Stops the producer and waits for it to finish.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Subscription`] if the producer task panicked.
    pub async fn close(mut self) -> Result<(), BackendError> {
        self.changes.close();
        let Some(producer) = self.producer.take() else {
            return Ok(());
        };
        producer.abort();
        match producer.await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(BackendError::Subscription(e.to_string())),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}
