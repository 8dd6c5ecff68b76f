//! The Result Store: the deduplicated, date-sorted set of cards a client shows.
//!
//! [`ResultStore`] is a plain value with synchronous operations. [`Feed`] wraps
//! it in a shared handle together with the [`CardSource`] used for paging;
//! the lock is only ever held for synchronous store operations, never across
//! a network call.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sawt_core::{BackendError, Card, CardChange, CardId, CardSource, CardStatus};
use tokio::sync::Mutex;

pub const DEFAULT_PAGE_SIZE: usize = 5;

/// Result of merging one fetched page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageOutcome {
    /// Cards from the page that were not already in the store.
    pub added: usize,
    pub has_more: bool,
}

/// Newest first; cards without `created_at` last; ties broken by id so the
/// order does not depend on insertion history.
pub(crate) fn compare_cards(a: &Card, b: &Card) -> Ordering {
    match (a.created_at, b.created_at) {
        (Some(a_at), Some(b_at)) => b_at.cmp(&a_at),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.id.cmp(&b.id))
}

#[derive(Debug, Clone)]
pub struct ResultStore {
    cards: Vec<Card>,
    index: HashMap<CardId, usize>,
    has_more: bool,
    page_size: usize,
    /// Likes sent by this client that the server has not answered yet. A
    /// card's visible `likes` is always its last server count plus this.
    pending_likes: HashMap<CardId, u32>,
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl ResultStore {
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            cards: Vec::new(),
            index: HashMap::new(),
            has_more: true,
            page_size: page_size.max(1),
            pending_likes: HashMap::new(),
        }
    }

    /// Replaces the contents with the first page of `batch`.
    pub fn seed(&mut self, batch: Vec<Card>) {
        let mut by_id: HashMap<CardId, Card> = HashMap::with_capacity(batch.len());
        for card in batch {
            by_id.insert(card.id.clone(), card);
        }
        let mut cards: Vec<Card> = by_id.into_values().collect();
        cards.sort_by(compare_cards);
        cards.truncate(self.page_size);
        for card in &mut cards {
            card.likes = card.likes.saturating_add(self.pending_for(&card.id));
        }

        self.cards = cards;
        self.has_more = true;
        self.reindex();
    }

    /// Inserts or overwrites by id and re-sorts. An existing `is_mine` mark
    /// survives the overwrite.
    pub fn upsert(&mut self, mut card: Card) {
        card.likes = card.likes.saturating_add(self.pending_for(&card.id));
        if let Some(&pos) = self.index.get(&card.id) {
            card.is_mine |= self.cards[pos].is_mine;
            self.cards[pos] = card;
        } else {
            self.cards.push(card);
        }
        self.resort();
    }

    /// Upper bound (exclusive) for the next page: the oldest known
    /// `created_at`, or `None` to start from the newest card.
    #[must_use]
    pub fn page_cursor(&self) -> Option<DateTime<Utc>> {
        self.cards.iter().filter_map(|c| c.created_at).min()
    }

    /// Merges a fetched page. An empty page marks the feed exhausted for good.
    pub fn merge_page(&mut self, page: Vec<Card>) -> PageOutcome {
        if page.is_empty() {
            self.has_more = false;
            return PageOutcome {
                added: 0,
                has_more: false,
            };
        }

        let mut added = 0;
        for card in page {
            if card.status != CardStatus::Public || self.index.contains_key(&card.id) {
                continue;
            }
            self.index.insert(card.id.clone(), self.cards.len());
            self.cards.push(card);
            added += 1;
        }
        if added > 0 {
            self.resort();
        }

        PageOutcome {
            added,
            has_more: self.has_more,
        }
    }

    /// Applies every field of `change` that differs from the local card.
    /// Returns `false` when nothing changed or the card is unknown.
    ///
    /// A pushed like count only ever raises the server count; in-flight likes
    /// from this client stay on top of it.
    pub fn apply_change(&mut self, change: &CardChange) -> bool {
        let Some(&pos) = self.index.get(&change.card_id) else {
            return false;
        };
        let pending = self.pending_for(&change.card_id);
        let card = &mut self.cards[pos];
        let mut changed = false;

        if let Some(likes) = change.likes {
            if likes > card.likes.saturating_sub(pending) {
                card.likes = likes.saturating_add(pending);
                changed = true;
            }
        }
        if let Some(responses) = &change.responses {
            if &card.responses != responses {
                card.responses.clone_from(responses);
                changed = true;
            }
        }
        if let Some(citations) = &change.citations {
            if &card.citations != citations {
                card.citations.clone_from(citations);
                changed = true;
            }
        }
        changed
    }

    /// Shows one more like for `id` until [`Self::confirm_like`] or
    /// [`Self::revert_like`]. Returns the visible count.
    pub fn begin_like(&mut self, id: &CardId) -> Option<u32> {
        let pos = *self.index.get(id)?;
        *self.pending_likes.entry(id.clone()).or_default() += 1;
        let card = &mut self.cards[pos];
        card.likes = card.likes.saturating_add(1);
        Some(card.likes)
    }

    /// Settles one pending like with the server's count after it.
    pub fn confirm_like(&mut self, id: &CardId, server_likes: u32) -> Option<u32> {
        let server = self.release_like(id)?.max(server_likes);
        self.show_likes(id, server)
    }

    /// Drops one pending like, falling back to the last server count.
    pub fn revert_like(&mut self, id: &CardId) -> Option<u32> {
        let server = self.release_like(id)?;
        self.show_likes(id, server)
    }

    /// Removes one pending like and returns the card's server count.
    fn release_like(&mut self, id: &CardId) -> Option<u32> {
        let pending = self.pending_for(id);
        match self.pending_likes.get_mut(id) {
            Some(n) if *n > 1 => *n -= 1,
            Some(_) => {
                self.pending_likes.remove(id);
            }
            None => {}
        }
        self.get(id).map(|c| c.likes.saturating_sub(pending))
    }

    fn show_likes(&mut self, id: &CardId, server: u32) -> Option<u32> {
        let pending = self.pending_for(id);
        let card = self.get_mut(id)?;
        card.likes = server.saturating_add(pending);
        Some(card.likes)
    }

    fn pending_for(&self, id: &CardId) -> u32 {
        self.pending_likes.get(id).copied().unwrap_or(0)
    }

    pub(crate) fn remove(&mut self, id: &CardId) -> Option<Card> {
        let pos = self.index.remove(id)?;
        let card = self.cards.remove(pos);
        self.reindex();
        Some(card)
    }

    #[must_use]
    pub fn get(&self, id: &CardId) -> Option<&Card> {
        self.index.get(id).map(|&pos| &self.cards[pos])
    }

    fn get_mut(&mut self, id: &CardId) -> Option<&mut Card> {
        let pos = *self.index.get(id)?;
        Some(&mut self.cards[pos])
    }

    #[must_use]
    pub fn likes_for(&self, id: &CardId) -> u32 {
        self.get(id).map_or(0, |c| c.likes)
    }

    /// Read-only id → card projection of the current contents.
    #[must_use]
    pub fn index_by_id(&self) -> HashMap<&CardId, &Card> {
        self.index
            .iter()
            .map(|(id, &pos)| (id, &self.cards[pos]))
            .collect()
    }

    #[must_use]
    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    #[must_use]
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn resort(&mut self) {
        self.cards.sort_by(compare_cards);
        self.reindex();
    }

    fn reindex(&mut self) {
        self.index = self
            .cards
            .iter()
            .enumerate()
            .map(|(pos, card)| (card.id.clone(), pos))
            .collect();
    }
}

/// Shared handle to a [`ResultStore`] and the source it pages from.
#[derive(Clone)]
pub struct Feed {
    store: Arc<Mutex<ResultStore>>,
    source: Arc<dyn CardSource>,
}

impl std::fmt::Debug for Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feed").finish_non_exhaustive()
    }
}

impl Feed {
    #[must_use]
    pub fn new(source: Arc<dyn CardSource>, page_size: usize) -> Self {
        Self {
            store: Arc::new(Mutex::new(ResultStore::new(page_size))),
            source,
        }
    }

    #[must_use]
    pub fn source(&self) -> &Arc<dyn CardSource> {
        &self.source
    }

    /// Runs `f` with exclusive access to the store.
    pub async fn with_store<R>(&self, f: impl FnOnce(&mut ResultStore) -> R) -> R {
        let mut store = self.store.lock().await;
        f(&mut store)
    }

    pub async fn seed(&self, batch: Vec<Card>) {
        self.with_store(|s| s.seed(batch)).await;
    }

    /// Fetches the newest public cards and seeds the store with them.
    ///
    /// # Errors
    ///
    /// Returns the source error; the store is left untouched.
    pub async fn load_initial(&self) -> Result<usize, BackendError> {
        let page_size = self.with_store(|s| s.page_size()).await;
        let batch = self.source.list_public_cards(None, page_size).await?;
        Ok(self
            .with_store(|s| {
                s.seed(batch);
                s.len()
            })
            .await)
    }

    pub async fn upsert(&self, card: Card) {
        self.with_store(|s| s.upsert(card)).await;
    }

    /// Fetches the page after the oldest visible card and merges it.
    ///
    /// Once a page comes back empty this returns immediately without touching
    /// the network.
    ///
    /// # Errors
    ///
    /// Returns the source error; the store and its "has more" flag are left
    /// untouched.
    pub async fn fetch_next_page(&self) -> Result<PageOutcome, BackendError> {
        let (cursor, limit) = {
            let store = self.store.lock().await;
            if !store.has_more() {
                return Ok(PageOutcome {
                    added: 0,
                    has_more: false,
                });
            }
            (store.page_cursor(), store.page_size())
        };

        let page = match self.source.list_public_cards(cursor, limit).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(error = %e, ?cursor, "failed to fetch next page of cards");
                return Err(e);
            }
        };

        let outcome = self.with_store(|s| s.merge_page(page)).await;
        tracing::debug!(
            added = outcome.added,
            has_more = outcome.has_more,
            "merged page of cards"
        );
        Ok(outcome)
    }

    pub async fn snapshot(&self) -> Vec<Card> {
        self.with_store(|s| s.cards().to_vec()).await
    }

    pub async fn get(&self, id: &CardId) -> Option<Card> {
        self.with_store(|s| s.get(id).cloned()).await
    }

    pub async fn likes_for(&self, id: &CardId) -> u32 {
        self.with_store(|s| s.likes_for(id)).await
    }

    pub async fn has_more(&self) -> bool {
        self.with_store(|s| s.has_more()).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use sawt_core::{AnswerFragment, CardType};

    use super::*;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()
    }

    fn card(id: &str, created_at: Option<DateTime<Utc>>) -> Card {
        Card {
            id: CardId::from(id),
            title: format!("question {id}"),
            card_type: CardType::GeneralSummary,
            status: CardStatus::Public,
            created_at,
            likes: 0,
            responses: vec![],
            citations: vec![],
            is_mine: false,
        }
    }

    fn ids(store: &ResultStore) -> Vec<&str> {
        store.cards().iter().map(|c| c.id.as_str()).collect()
    }

    fn assert_sorted(store: &ResultStore) {
        for pair in store.cards().windows(2) {
            assert_ne!(
                compare_cards(&pair[0], &pair[1]),
                Ordering::Greater,
                "out of order: {:?} before {:?}",
                pair[0].id,
                pair[1].id
            );
        }
    }

    #[test]
    fn seed_keeps_first_page_sorted() {
        let mut store = ResultStore::new(2);
        store.seed(vec![
            card("old", Some(at(1))),
            card("newest", Some(at(9))),
            card("mid", Some(at(5))),
        ]);
        assert_eq!(ids(&store), vec!["newest", "mid"]);
        assert!(store.has_more());
    }

    #[test]
    fn seed_collapses_duplicate_ids() {
        let mut store = ResultStore::new(5);
        let mut liked = card("1", Some(at(3)));
        liked.likes = 2;
        store.seed(vec![card("1", Some(at(3))), liked]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.likes_for(&CardId::from("1")), 2);
    }

    #[test]
    fn upsert_overwrites_in_place() {
        let mut store = ResultStore::new(5);
        store.seed(vec![card("1", Some(at(3))), card("2", Some(at(1)))]);

        let mut updated = card("2", Some(at(1)));
        updated.likes = 5;
        store.upsert(updated);

        assert_eq!(ids(&store), vec!["1", "2"]);
        assert_eq!(store.likes_for(&CardId::from("2")), 5);
    }

    #[test]
    fn upsert_places_new_card_by_date_and_undated_last() {
        let mut store = ResultStore::new(5);
        store.seed(vec![card("1", Some(at(3))), card("2", Some(at(1)))]);
        store.upsert(card("undated", None));
        store.upsert(card("newest", Some(at(7))));
        store.upsert(card("between", Some(at(2))));

        assert_eq!(ids(&store), vec!["newest", "1", "between", "2", "undated"]);
        assert_sorted(&store);
    }

    #[test]
    fn upsert_keeps_is_mine() {
        let mut store = ResultStore::new(5);
        let mut mine = card("m", Some(at(1)));
        mine.is_mine = true;
        store.upsert(mine);

        let mut from_server = card("m", Some(at(1)));
        from_server.responses = vec![AnswerFragment::new("done")];
        store.upsert(from_server);

        let stored = store.get(&CardId::from("m")).expect("present");
        assert!(stored.is_mine);
        assert!(!stored.is_pending());
    }

    #[test]
    fn dedup_invariant_over_many_upserts() {
        let mut store = ResultStore::new(5);
        let pool = ["a", "b", "c", "d"];
        for round in 0u32..40 {
            let id = pool[(round as usize * 7) % pool.len()];
            let mut c = card(id, Some(at(round % 13)));
            c.likes = round;
            store.upsert(c);
            assert_sorted(&store);
        }
        assert_eq!(store.len(), pool.len());
        // the last write for "d" was round 37 (37 * 7 % 4 == 3)
        assert_eq!(store.likes_for(&CardId::from("d")), 37);
        assert_eq!(store.index_by_id().len(), pool.len());
    }

    #[test]
    fn page_cursor_is_oldest_dated_card() {
        let mut store = ResultStore::new(5);
        assert_eq!(store.page_cursor(), None);
        store.seed(vec![card("1", Some(at(5))), card("2", Some(at(2))), card("x", None)]);
        assert_eq!(store.page_cursor(), Some(at(2)));
    }

    #[test]
    fn merge_page_skips_known_and_non_public_cards() {
        let mut store = ResultStore::new(5);
        store.seed(vec![card("1", Some(at(5)))]);

        let mut hidden = card("h", Some(at(3)));
        hidden.status = CardStatus::New;
        let outcome = store.merge_page(vec![card("1", Some(at(5))), card("2", Some(at(4))), hidden]);

        assert_eq!(outcome, PageOutcome { added: 1, has_more: true });
        assert_eq!(ids(&store), vec!["1", "2"]);
    }

    #[test]
    fn empty_page_exhausts_feed_permanently() {
        let mut store = ResultStore::new(5);
        store.seed(vec![card("1", Some(at(5)))]);
        assert!(!store.merge_page(vec![]).has_more);
        store.upsert(card("later", Some(at(9))));
        assert!(!store.has_more());
    }

    #[test]
    fn apply_change_is_idempotent() {
        let mut store = ResultStore::new(5);
        store.seed(vec![card("1", Some(at(5))), card("2", Some(at(4)))]);

        let change = CardChange {
            card_id: CardId::from("2"),
            likes: None,
            responses: Some(vec![AnswerFragment::new("The council voted 5-2.")]),
            citations: None,
        };
        assert!(store.apply_change(&change));
        let once = store.cards().to_vec();
        assert!(!store.apply_change(&change));
        assert_eq!(store.cards(), once.as_slice());
        assert_eq!(store.get(&CardId::from("2")).unwrap().title, "question 2");
    }

    #[test]
    fn apply_change_ignores_unknown_cards() {
        let mut store = ResultStore::new(5);
        assert!(!store.apply_change(&CardChange::likes_only(CardId::from("ghost"), 3)));
        assert!(store.is_empty());
    }

    #[test]
    fn pending_like_rides_on_top_of_pushed_counts() {
        let mut store = ResultStore::new(5);
        let mut liked = card("1", Some(at(5)));
        liked.likes = 3;
        store.seed(vec![liked]);
        let id = CardId::from("1");

        assert_eq!(store.begin_like(&id), Some(4));
        // stale count for the same server state
        assert!(!store.apply_change(&CardChange::likes_only(id.clone(), 3)));
        assert!(!store.apply_change(&CardChange::likes_only(id.clone(), 2)));
        assert_eq!(store.likes_for(&id), 4);

        assert!(store.apply_change(&CardChange::likes_only(id.clone(), 4)));
        assert_eq!(store.likes_for(&id), 5);

        assert_eq!(store.revert_like(&id), Some(4));
        assert_eq!(store.revert_like(&CardId::from("missing")), None);
        assert_eq!(store.begin_like(&CardId::from("missing")), None);
    }

    #[test]
    fn confirm_like_never_lowers_the_count() {
        let mut store = ResultStore::new(5);
        let mut liked = card("1", Some(at(5)));
        liked.likes = 7;
        store.seed(vec![liked]);
        let id = CardId::from("1");

        store.begin_like(&id);
        store.apply_change(&CardChange::likes_only(id.clone(), 9));
        // the like route answered before the push reached it
        assert_eq!(store.confirm_like(&id, 8), Some(9));
        assert_eq!(store.begin_like(&id), Some(10));
        assert_eq!(store.confirm_like(&id, 10), Some(10));
    }

    mod paging {
        use std::sync::atomic::Ordering;

        use super::*;
        use crate::test_support::{self, FakeBackend};

        /// Server holds cards at minutes 9 down to 1; the feed shows 9 and 8.
        async fn paged_feed() -> (Feed, Arc<FakeBackend>) {
            let backend = Arc::new(FakeBackend::with_cards(
                (1..=9)
                    .map(|m| test_support::card(&m.to_string(), m))
                    .collect(),
            ));
            let feed = Feed::new(backend.clone(), 2);
            feed.load_initial().await.expect("initial page");
            (feed, backend)
        }

        fn feed_ids(cards: &[Card]) -> Vec<&str> {
            cards.iter().map(|c| c.id.as_str()).collect()
        }

        #[tokio::test]
        async fn next_page_starts_before_oldest_visible_card() {
            let (feed, backend) = paged_feed().await;

            let outcome = feed.fetch_next_page().await.expect("page");

            assert_eq!(outcome, PageOutcome { added: 2, has_more: true });
            assert_eq!(backend.list_cursors(), vec![None, Some(test_support::at(8))]);
            assert_eq!(feed_ids(&feed.snapshot().await), vec!["9", "8", "7", "6"]);
        }

        #[tokio::test]
        async fn exhausted_feed_stops_calling_the_source() {
            let (feed, backend) = paged_feed().await;
            let mut pages = 0;
            while feed.has_more().await {
                feed.fetch_next_page().await.expect("page");
                pages += 1;
            }
            // four non-empty pages, then the empty one
            assert_eq!(pages, 5);
            let calls = FakeBackend::count(&backend.list_calls);

            let outcome = feed.fetch_next_page().await.expect("no-op");

            assert_eq!(outcome, PageOutcome { added: 0, has_more: false });
            assert_eq!(FakeBackend::count(&backend.list_calls), calls);
            assert_eq!(feed.snapshot().await.len(), 9);
        }

        #[tokio::test]
        async fn failed_page_leaves_store_untouched() {
            let (feed, backend) = paged_feed().await;
            let before = feed.snapshot().await;
            FakeBackend::set(&backend.fail_list, true);

            let err = feed.fetch_next_page().await.unwrap_err();

            assert!(matches!(err, BackendError::Transport(_)));
            assert_eq!(feed.snapshot().await, before);
            assert!(feed.has_more().await);

            FakeBackend::set(&backend.fail_list, false);
            assert_eq!(feed.fetch_next_page().await.expect("retry").added, 2);
        }

        #[tokio::test]
        async fn overlapping_pages_keep_one_copy_of_each_card() {
            let backend = Arc::new(FakeBackend::with_cards(vec![
                test_support::card("9", 9),
                test_support::card("5", 5),
            ]));
            let feed = Feed::new(backend.clone(), 1);
            feed.load_initial().await.expect("initial page");
            backend.hold_lists.store(true, Ordering::SeqCst);

            let first = tokio::spawn({
                let feed = feed.clone();
                async move { feed.fetch_next_page().await }
            });
            let second = tokio::spawn({
                let feed = feed.clone();
                async move { feed.fetch_next_page().await }
            });
            while FakeBackend::count(&backend.list_calls) < 3 {
                tokio::task::yield_now().await;
            }
            backend.release_lists.notify_waiters();

            let added = first.await.expect("join").expect("page").added
                + second.await.expect("join").expect("page").added;

            assert_eq!(added, 1);
            assert_eq!(backend.list_cursors()[1..], [Some(test_support::at(9)); 2]);
            assert_eq!(feed_ids(&feed.snapshot().await), vec!["9", "5"]);
        }
    }

    #[test]
    fn remove_keeps_index_consistent() {
        let mut store = ResultStore::new(5);
        store.seed(vec![card("1", Some(at(5))), card("2", Some(at(4))), card("3", Some(at(3)))]);
        assert!(store.remove(&CardId::from("2")).is_some());
        assert_eq!(store.get(&CardId::from("3")).unwrap().id.as_str(), "3");
        assert!(store.get(&CardId::from("2")).is_none());
    }
}
