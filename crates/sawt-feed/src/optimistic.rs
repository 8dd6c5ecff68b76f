//! Apply a speculative change, wait for the server, then confirm or revert.

use std::future::Future;

use sawt_core::{BackendError, Card, CardId, CardStatus};

use crate::store::{Feed, ResultStore};

/// A local edit made before the authoritative request completes.
pub trait OptimisticEdit: Send {
    /// What the authoritative request returns.
    type Output: Send;

    fn apply(&mut self, store: &mut ResultStore);

    fn confirm(self, store: &mut ResultStore, output: &Self::Output);

    fn revert(self, store: &mut ResultStore);
}

impl Feed {
    /// Applies `edit`, runs `request` without holding the store lock, then
    /// confirms or reverts depending on the outcome.
    ///
    /// # Errors
    ///
    /// Returns the request's error after the edit has been reverted.
    pub async fn optimistic<E, F, Fut>(&self, mut edit: E, request: F) -> Result<E::Output, BackendError>
    where
        E: OptimisticEdit,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<E::Output, BackendError>>,
    {
        self.with_store(|s| edit.apply(s)).await;

        match request().await {
            Ok(output) => {
                self.with_store(|s| edit.confirm(s, &output)).await;
                Ok(output)
            }
            Err(e) => {
                self.with_store(|s| edit.revert(s)).await;
                Err(e)
            }
        }
    }
}

/// +1 now; the server's count on success; on failure the last count the
/// server reported, which may already include other clients' likes.
#[derive(Debug, Clone)]
pub struct LikeEdit {
    id: CardId,
}

impl LikeEdit {
    #[must_use]
    pub fn new(id: CardId) -> Self {
        Self { id }
    }
}

impl OptimisticEdit for LikeEdit {
    type Output = u32;

    fn apply(&mut self, store: &mut ResultStore) {
        store.begin_like(&self.id);
    }

    fn confirm(self, store: &mut ResultStore, likes: &u32) {
        store.confirm_like(&self.id, *likes);
    }

    fn revert(self, store: &mut ResultStore) {
        store.revert_like(&self.id);
    }
}

/// Shows a provisional card until the created one comes back.
#[derive(Debug, Clone)]
pub struct InsertEdit {
    provisional: Card,
}

impl InsertEdit {
    #[must_use]
    pub fn new(provisional: Card) -> Self {
        Self { provisional }
    }

    #[must_use]
    pub fn provisional_id(&self) -> &CardId {
        &self.provisional.id
    }
}

impl OptimisticEdit for InsertEdit {
    type Output = Card;

    fn apply(&mut self, store: &mut ResultStore) {
        store.upsert(self.provisional.clone());
    }

    fn confirm(self, store: &mut ResultStore, created: &Card) {
        store.remove(&self.provisional.id);
        let mut card = created.clone();
        card.is_mine = true;
        card.status = CardStatus::Public;
        store.upsert(card);
    }

    fn revert(self, store: &mut ResultStore) {
        store.remove(&self.provisional.id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sawt_core::CardType;

    use super::*;
    use crate::test_support::{card, FakeBackend};

    fn feed_with(cards: Vec<Card>) -> (Feed, Arc<FakeBackend>) {
        let backend = Arc::new(FakeBackend::with_cards(cards));
        let feed = Feed::new(backend.clone(), 5);
        (feed, backend)
    }

    #[tokio::test]
    async fn like_edit_confirms_with_server_count() {
        let (feed, _) = feed_with(vec![]);
        feed.seed(vec![card("a", 1)]).await;
        let id = CardId::from("a");

        let likes = feed
            .optimistic(LikeEdit::new(id.clone()), || async { Ok(7) })
            .await
            .expect("like");

        assert_eq!(likes, 7);
        assert_eq!(feed.likes_for(&id).await, 7);
    }

    #[tokio::test]
    async fn like_edit_reverts_on_failure() {
        let (feed, _) = feed_with(vec![]);
        let mut liked = card("a", 1);
        liked.likes = 3;
        feed.seed(vec![liked]).await;
        let id = CardId::from("a");

        let result = feed
            .optimistic(LikeEdit::new(id.clone()), || async {
                Err(BackendError::Transport("reset".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(feed.likes_for(&id).await, 3);
    }

    #[tokio::test]
    async fn insert_edit_replaces_provisional_card() {
        let (feed, _) = feed_with(vec![]);
        let mut provisional = card("tmp", 9);
        provisional.is_mine = true;
        provisional.status = CardStatus::New;

        let mut created = card("real", 9);
        created.status = CardStatus::New;
        let created_clone = created.clone();

        feed.optimistic(InsertEdit::new(provisional), || async { Ok(created_clone) })
            .await
            .expect("insert");

        let snapshot = feed.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, created.id);
        assert!(snapshot[0].is_mine);
        assert_eq!(snapshot[0].status, CardStatus::Public);
        assert_eq!(snapshot[0].card_type, CardType::GeneralSummary);
    }

    #[tokio::test]
    async fn insert_edit_removes_provisional_card_on_failure() {
        let (feed, _) = feed_with(vec![]);
        feed.seed(vec![card("existing", 1)]).await;

        let result = feed
            .optimistic(InsertEdit::new(card("tmp", 9)), || async {
                Err(BackendError::Rejected {
                    status: 400,
                    message: "title too long".to_string(),
                })
            })
            .await;

        assert!(result.is_err());
        let ids: Vec<_> = feed.snapshot().await.into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![CardId::from("existing")]);
    }
}
