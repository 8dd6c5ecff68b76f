use std::sync::Arc;

use sawt_core::{AnswerService, CardApi, CardSource, ChangeFeed, ClientConfig};

use crate::bridge::{BridgeConfig, LiveUpdateBridge};
use crate::likes::{LikeCounter, LikedCards};
use crate::store::Feed;
use crate::submission::QueryComposer;

/// Everything one client needs, wired to a single [`Feed`].
#[derive(Debug)]
pub struct FeedSession {
    pub feed: Feed,
    pub bridge: LiveUpdateBridge,
    pub likes: LikeCounter,
    pub composer: QueryComposer,
}

impl FeedSession {
    #[must_use]
    pub fn new<S, A>(backend: Arc<S>, answers: Arc<A>, config: &ClientConfig) -> Self
    where
        S: CardSource + CardApi + ChangeFeed + 'static,
        A: AnswerService + 'static,
    {
        let feed = Feed::new(backend.clone(), config.page_size);
        let bridge = LiveUpdateBridge::new(
            feed.clone(),
            backend.clone(),
            BridgeConfig::from_client_config(config),
        );
        let likes = LikeCounter::new(
            feed.clone(),
            backend.clone(),
            LikedCards::load(&config.liked_cards_path),
        );
        let composer = QueryComposer::new(backend, answers, bridge.clone());

        Self {
            feed,
            bridge,
            likes,
            composer,
        }
    }
}
