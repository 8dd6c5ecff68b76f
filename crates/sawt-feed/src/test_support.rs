//! In-memory collaborators for the feed tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sawt_core::{
    AnswerFragment, AnswerRequest, AnswerService, BackendError, BiasReport, Card, CardApi,
    CardChange, CardId, CardSource, CardStatus, CardType, ChangeFeed, NewCard, Subscription,
};
use tokio::sync::{mpsc, Notify};

pub(crate) fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()
}

/// A public, unanswered card created at 12:`minute`.
pub(crate) fn card(id: &str, minute: u32) -> Card {
    Card {
        id: CardId::from(id),
        title: format!("What happened at meeting {id}?"),
        card_type: CardType::GeneralSummary,
        status: CardStatus::Public,
        created_at: Some(at(minute)),
        likes: 0,
        responses: vec![],
        citations: vec![],
        is_mine: false,
    }
}

pub(crate) fn answered(id: &str, minute: u32, text: &str) -> Card {
    let mut c = card(id, minute);
    c.responses = vec![AnswerFragment::new(text)];
    c
}

fn transport(what: &str) -> BackendError {
    BackendError::Transport(format!("{what} failed"))
}

/// Server-side truth plus failure switches and call counters.
#[derive(Default)]
pub(crate) struct FakeBackend {
    cards: Mutex<HashMap<CardId, Card>>,
    subscribers: Mutex<Vec<(CardId, mpsc::Sender<CardChange>)>>,
    dispatched: Mutex<Vec<AnswerRequest>>,
    list_cursors: Mutex<Vec<Option<DateTime<Utc>>>>,
    pub fail_list: AtomicBool,
    pub fail_fetch: AtomicBool,
    pub fail_create: AtomicBool,
    pub fail_like: AtomicBool,
    pub fail_dispatch: AtomicBool,
    pub fail_subscribe: AtomicBool,
    pub hold_likes: AtomicBool,
    pub hold_lists: AtomicBool,
    pub hold_creates: AtomicBool,
    pub list_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub like_calls: AtomicUsize,
    pub release_likes: Notify,
    pub release_lists: Notify,
    pub release_creates: Notify,
    next_id: AtomicUsize,
}

impl FakeBackend {
    pub(crate) fn with_cards(cards: Vec<Card>) -> Self {
        let backend = Self::default();
        for c in cards {
            backend.put(c);
        }
        backend
    }

    pub(crate) fn put(&self, card: Card) {
        self.cards.lock().unwrap().insert(card.id.clone(), card);
    }

    pub(crate) fn server_card(&self, id: &CardId) -> Option<Card> {
        self.cards.lock().unwrap().get(id).cloned()
    }

    pub(crate) fn set(flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }

    pub(crate) fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// The `before` argument of every list call so far.
    pub(crate) fn list_cursors(&self) -> Vec<Option<DateTime<Utc>>> {
        self.list_cursors.lock().unwrap().clone()
    }

    pub(crate) fn dispatched(&self) -> Vec<AnswerRequest> {
        self.dispatched.lock().unwrap().clone()
    }

    pub(crate) fn subscriber_count(&self, id: &CardId) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .iter()
            .filter(|(sub_id, tx)| sub_id == id && !tx.is_closed())
            .count()
    }

    /// Sends `change` to every open subscription for its card.
    pub(crate) async fn push(&self, change: CardChange) {
        let targets: Vec<_> = self
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == change.card_id)
            .map(|(_, tx)| tx.clone())
            .collect();
        for tx in targets {
            let _ = tx.send(change.clone()).await;
        }
    }
}

#[async_trait]
impl CardSource for FakeBackend {
    async fn list_public_cards(
        &self,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Card>, BackendError> {
        self.list_cursors.lock().unwrap().push(before);
        let released = self.release_lists.notified();
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.hold_lists.load(Ordering::SeqCst) {
            released.await;
        }
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(transport("list"));
        }
        let mut cards: Vec<Card> = self
            .cards
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.status == CardStatus::Public)
            .filter(|c| match (before, c.created_at) {
                (Some(before), Some(created)) => created < before,
                (Some(_), None) => false,
                (None, _) => true,
            })
            .cloned()
            .collect();
        cards.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        cards.truncate(limit);
        Ok(cards)
    }

    async fn fetch_card(&self, id: &CardId) -> Result<Card, BackendError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(transport("fetch"));
        }
        self.server_card(id)
            .ok_or_else(|| BackendError::NotFound(id.clone()))
    }
}

#[async_trait]
impl CardApi for FakeBackend {
    async fn create_card(&self, new_card: &NewCard) -> Result<Card, BackendError> {
        if self.hold_creates.load(Ordering::SeqCst) {
            self.release_creates.notified().await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(transport("create"));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let card = Card {
            id: CardId::new(format!("created-{n}")),
            title: new_card.title.clone(),
            card_type: new_card.card_type,
            status: CardStatus::New,
            created_at: Some(Utc::now()),
            likes: 0,
            responses: vec![],
            citations: vec![],
            is_mine: false,
        };
        self.put(card.clone());
        Ok(card)
    }

    async fn like_card(&self, id: &CardId) -> Result<u32, BackendError> {
        self.like_calls.fetch_add(1, Ordering::SeqCst);
        if self.hold_likes.load(Ordering::SeqCst) {
            self.release_likes.notified().await;
        }
        if self.fail_like.load(Ordering::SeqCst) {
            return Err(transport("like"));
        }
        let mut cards = self.cards.lock().unwrap();
        let card = cards
            .get_mut(id)
            .ok_or_else(|| BackendError::NotFound(id.clone()))?;
        card.likes += 1;
        Ok(card.likes)
    }

    async fn report_bias(&self, id: &CardId, _report: &BiasReport) -> Result<(), BackendError> {
        self.server_card(id)
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(id.clone()))
    }
}

#[async_trait]
impl ChangeFeed for FakeBackend {
    async fn subscribe(&self, id: &CardId) -> Result<Subscription, BackendError> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(BackendError::Subscription("channel refused".to_string()));
        }
        let (tx, rx) = mpsc::channel(16);
        self.subscribers.lock().unwrap().push((id.clone(), tx));
        Ok(Subscription::from_receiver(rx))
    }
}

#[async_trait]
impl AnswerService for FakeBackend {
    async fn request_answer(&self, request: &AnswerRequest) -> Result<(), BackendError> {
        self.dispatched.lock().unwrap().push(request.clone());
        if self.fail_dispatch.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected {
                status: 502,
                message: "answer service unavailable".to_string(),
            });
        }
        Ok(())
    }
}
