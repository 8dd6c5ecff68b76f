//! Fan-out of card updates published by the `cards_notify_change` trigger.
//!
//! One `PgListener` connection serves every subscriber: each notification
//! carries only the card id, the hub reloads the row and broadcasts a
//! [`CardChange`]. Per-card subscriptions filter that broadcast.

use std::time::Duration;

use async_trait::async_trait;
use sawt_core::{BackendError, CardChange, CardId, ChangeFeed, Subscription};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cards::get_card;
use crate::DbError;

pub const CARD_CHANGES_CHANNEL: &str = "card_changes";

const DEFAULT_CAPACITY: usize = 256;
const SUBSCRIPTION_BUFFER: usize = 16;
const LISTENER_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Broadcasts card changes to any number of per-card subscriptions.
#[derive(Debug, Clone)]
pub struct ChangeHub {
    tx: broadcast::Sender<CardChange>,
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChangeHub {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Broadcasts a change. Returns how many subscribers received it.
    pub fn publish(&self, change: CardChange) -> usize {
        self.tx.send(change).unwrap_or(0)
    }

    /// Starts listening on [`CARD_CHANGES_CHANNEL`] and feeding the hub.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlx`] if the listener connection or the `LISTEN`
    /// command fails.
    pub async fn listen(&self, pool: PgPool) -> Result<JoinHandle<()>, DbError> {
        let mut listener = PgListener::connect_with(&pool).await?;
        listener.listen(CARD_CHANGES_CHANNEL).await?;
        tracing::info!(channel = CARD_CHANGES_CHANNEL, "listening for card changes");

        let hub = self.clone();
        Ok(tokio::spawn(async move {
            hub.run_listener(listener, pool).await;
        }))
    }

    async fn run_listener(self, mut listener: PgListener, pool: PgPool) {
        loop {
            match listener.recv().await {
                Ok(notification) => self.handle_notification(&pool, notification.payload()).await,
                Err(e) => {
                    tracing::warn!(error = %e, "card change listener error; retrying");
                    tokio::time::sleep(LISTENER_RETRY_DELAY).await;
                }
            }
        }
    }

    async fn handle_notification(&self, pool: &PgPool, payload: &str) {
        let Ok(id) = Uuid::parse_str(payload.trim()) else {
            tracing::warn!(payload, "ignoring card change with malformed id");
            return;
        };

        let card = match get_card(pool, id).await {
            Ok(Some(row)) => row.into_card(),
            Ok(None) => {
                tracing::debug!(card_id = %id, "changed card no longer exists");
                return;
            }
            Err(e) => Err(e),
        };

        match card {
            Ok(card) => {
                let delivered = self.publish(CardChange::from_card(&card));
                tracing::debug!(card_id = %id, delivered, "card change broadcast");
            }
            Err(e) => tracing::warn!(card_id = %id, error = %e, "failed to load changed card"),
        }
    }
}

#[async_trait]
impl ChangeFeed for ChangeHub {
    async fn subscribe(&self, id: &CardId) -> Result<Subscription, BackendError> {
        let mut all = self.tx.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let id = id.clone();

        let producer = tokio::spawn(async move {
            loop {
                match all.recv().await {
                    Ok(change) if change.card_id == id => {
                        if tx.send(change).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(card_id = %id, skipped, "change subscription lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(rx, producer))
    }
}
