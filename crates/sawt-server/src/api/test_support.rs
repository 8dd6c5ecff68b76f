//! In-memory `CardStore` for router tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sawt_core::{
    BackendError, BiasReport, Card, CardApi, CardChange, CardId, CardSource, CardStatus,
    CardStore, CardType, NewCard,
};
use sawt_db::ChangeHub;
use uuid::Uuid;

pub(super) fn public_card(id: &str, minute: u32) -> Card {
    Card {
        id: CardId::from(id),
        title: format!("Question {id}"),
        card_type: CardType::GeneralSummary,
        status: CardStatus::Public,
        created_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()),
        likes: 0,
        responses: vec![],
        citations: vec![],
        is_mine: false,
    }
}

#[derive(Default)]
struct Inner {
    cards: Mutex<Vec<Card>>,
    bias: Mutex<HashMap<CardId, usize>>,
    unhealthy: AtomicBool,
    hub: ChangeHub,
}

/// Card store whose writes publish to its own [`ChangeHub`], the way the
/// database trigger does.
#[derive(Clone, Default)]
pub(super) struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub(super) fn hub(&self) -> ChangeHub {
        self.inner.hub.clone()
    }

    pub(super) fn insert(&self, card: Card) {
        self.inner.cards.lock().unwrap().push(card);
    }

    pub(super) fn set_healthy(&self, healthy: bool) {
        self.inner.unhealthy.store(!healthy, Ordering::SeqCst);
    }

    pub(super) fn bias_reports(&self, id: &CardId) -> usize {
        self.inner.bias.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl CardSource for MemoryStore {
    async fn list_public_cards(
        &self,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Card>, BackendError> {
        let mut cards: Vec<Card> = self
            .inner
            .cards
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.status == CardStatus::Public)
            .filter(|c| before.is_none_or(|b| c.created_at.is_some_and(|at| at < b)))
            .cloned()
            .collect();
        cards.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        cards.truncate(limit);
        Ok(cards)
    }

    async fn fetch_card(&self, id: &CardId) -> Result<Card, BackendError> {
        self.inner
            .cards
            .lock()
            .unwrap()
            .iter()
            .find(|c| &c.id == id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(id.clone()))
    }
}

#[async_trait]
impl CardApi for MemoryStore {
    async fn create_card(&self, new_card: &NewCard) -> Result<Card, BackendError> {
        let card = Card {
            id: CardId::from(Uuid::new_v4()),
            title: new_card.title.clone(),
            card_type: new_card.card_type,
            status: CardStatus::New,
            created_at: Some(Utc::now()),
            likes: 0,
            responses: vec![],
            citations: vec![],
            is_mine: false,
        };
        self.insert(card.clone());
        Ok(card)
    }

    async fn like_card(&self, id: &CardId) -> Result<u32, BackendError> {
        let change = {
            let mut cards = self.inner.cards.lock().unwrap();
            let card = cards
                .iter_mut()
                .find(|c| &c.id == id)
                .ok_or_else(|| BackendError::NotFound(id.clone()))?;
            card.likes += 1;
            CardChange::from_card(card)
        };
        let likes = change.likes.unwrap_or_default();
        self.inner.hub.publish(change);
        Ok(likes)
    }

    async fn report_bias(&self, id: &CardId, _report: &BiasReport) -> Result<(), BackendError> {
        self.fetch_card(id).await?;
        *self.inner.bias.lock().unwrap().entry(id.clone()).or_default() += 1;
        Ok(())
    }
}

#[async_trait]
impl CardStore for MemoryStore {
    async fn health_check(&self) -> Result<(), BackendError> {
        if self.inner.unhealthy.load(Ordering::SeqCst) {
            Err(BackendError::Transport("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}
