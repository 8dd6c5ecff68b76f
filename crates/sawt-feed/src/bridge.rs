//! Keeps one card in the [`Feed`] in step with the server.
//!
//! A mounted bridge runs two producers against the same card: a push task
//! draining a [`ChangeFeed`] subscription and a poll task that starts only if
//! the card is still unanswered after the answer-wait window. Both feed
//! [`reconcile`], which is idempotent, so they never need to coordinate.

use std::sync::Arc;
use std::time::Duration;

use sawt_core::{BackendError, CardChange, CardId, ChangeFeed, ClientConfig, Subscription};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::store::Feed;

const DEFAULT_ANSWER_WAIT: Duration = Duration::from_secs(10);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    /// How long to rely on push alone before polling starts.
    pub answer_wait: Duration,
    pub poll_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            answer_wait: DEFAULT_ANSWER_WAIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl BridgeConfig {
    #[must_use]
    pub fn from_client_config(config: &ClientConfig) -> Self {
        Self {
            answer_wait: config.answer_wait(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// Merges `change` into the feed. Returns `true` if any field changed.
pub async fn reconcile(feed: &Feed, change: &CardChange) -> bool {
    let changed = feed.with_store(|s| s.apply_change(change)).await;
    if changed {
        tracing::debug!(card_id = %change.card_id, "card updated");
    }
    changed
}

async fn card_answered(feed: &Feed, id: &CardId) -> bool {
    feed.with_store(|s| s.get(id).is_some_and(|c| !c.is_pending()))
        .await
}

#[derive(Clone)]
pub struct LiveUpdateBridge {
    feed: Feed,
    changes: Arc<dyn ChangeFeed>,
    config: BridgeConfig,
}

impl std::fmt::Debug for LiveUpdateBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveUpdateBridge")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LiveUpdateBridge {
    #[must_use]
    pub fn new(feed: Feed, changes: Arc<dyn ChangeFeed>, config: BridgeConfig) -> Self {
        Self {
            feed,
            changes,
            config,
        }
    }

    #[must_use]
    pub fn feed(&self) -> &Feed {
        &self.feed
    }

    /// Starts tracking `id`.
    ///
    /// If the change subscription cannot be opened the failure is logged and
    /// the bridge relies on polling alone.
    pub async fn mount(&self, id: CardId) -> BridgeHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (resolved_tx, resolved_rx) = watch::channel(card_answered(&self.feed, &id).await);
        let resolved_tx = Arc::new(resolved_tx);

        let push = match self.changes.subscribe(&id).await {
            Ok(subscription) => Some(tokio::spawn(push_loop(
                self.feed.clone(),
                id.clone(),
                subscription,
                shutdown_rx.clone(),
                Arc::clone(&resolved_tx),
            ))),
            Err(e) => {
                tracing::warn!(card_id = %id, error = %e, "change subscription failed; polling only");
                None
            }
        };

        let poll = tokio::spawn(poll_loop(
            self.feed.clone(),
            id.clone(),
            self.config,
            shutdown_rx,
            resolved_tx,
        ));

        tracing::debug!(card_id = %id, "bridge mounted");
        BridgeHandle {
            card_id: id,
            shutdown: shutdown_tx,
            resolved: resolved_rx,
            push,
            poll: Some(poll),
        }
    }
}

async fn push_loop(
    feed: Feed,
    id: CardId,
    mut subscription: Subscription,
    mut shutdown: watch::Receiver<bool>,
    resolved: Arc<watch::Sender<bool>>,
) -> Subscription {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            change = subscription.next() => match change {
                Some(change) => {
                    if reconcile(&feed, &change).await && card_answered(&feed, &id).await {
                        resolved.send_replace(true);
                    }
                }
                None => {
                    tracing::debug!(card_id = %id, "change subscription ended");
                    break;
                }
            },
        }
    }
    subscription
}

async fn poll_loop(
    feed: Feed,
    id: CardId,
    config: BridgeConfig,
    mut shutdown: watch::Receiver<bool>,
    resolved: Arc<watch::Sender<bool>>,
) {
    tokio::select! {
        _ = shutdown.changed() => return,
        () = tokio::time::sleep(config.answer_wait) => {}
    }

    loop {
        if card_answered(&feed, &id).await {
            resolved.send_replace(true);
            return;
        }

        match feed.source().fetch_card(&id).await {
            Ok(card) => {
                reconcile(&feed, &CardChange::from_card(&card)).await;
                if !card.is_pending() {
                    if card_answered(&feed, &id).await {
                        resolved.send_replace(true);
                    }
                    tracing::debug!(card_id = %id, "answer arrived; polling stopped");
                    return;
                }
            }
            Err(BackendError::NotFound(_)) => {
                tracing::info!(card_id = %id, "card no longer exists; polling stopped");
                return;
            }
            Err(e) => {
                tracing::warn!(card_id = %id, error = %e, transient = e.is_transient(), "poll failed; retrying");
            }
        }

        tokio::select! {
            _ = shutdown.changed() => return,
            () = tokio::time::sleep(config.poll_interval) => {}
        }
    }
}

/// A mounted bridge. Dropping it stops both producers without waiting.
#[derive(Debug)]
pub struct BridgeHandle {
    card_id: CardId,
    shutdown: watch::Sender<bool>,
    resolved: watch::Receiver<bool>,
    push: Option<JoinHandle<Subscription>>,
    poll: Option<JoinHandle<()>>,
}

impl BridgeHandle {
    #[must_use]
    pub fn card_id(&self) -> &CardId {
        &self.card_id
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        *self.resolved.borrow()
    }

    /// A receiver that flips to `true` once the card has an answer.
    #[must_use]
    pub fn resolved(&self) -> watch::Receiver<bool> {
        self.resolved.clone()
    }

    /// Stops both producers and closes the subscription. A failure to close
    /// is logged, never returned.
    pub async fn unmount(mut self) {
        self.shutdown.send_replace(true);

        if let Some(poll) = self.poll.take() {
            if let Err(e) = poll.await {
                tracing::warn!(card_id = %self.card_id, error = %e, "poll task failed");
            }
        }

        if let Some(push) = self.push.take() {
            match push.await {
                Ok(subscription) => {
                    if let Err(e) = subscription.close().await {
                        tracing::warn!(card_id = %self.card_id, error = %e, "failed to close change subscription");
                    }
                }
                Err(e) => {
                    tracing::warn!(card_id = %self.card_id, error = %e, "push task failed");
                }
            }
        }

        tracing::debug!(card_id = %self.card_id, "bridge unmounted");
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        if let Some(push) = self.push.take() {
            push.abort();
        }
        if let Some(poll) = self.poll.take() {
            poll.abort();
        }
    }
}
