//! One like per card per client, shown before the server confirms it.

use std::collections::{BTreeSet, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sawt_core::{BackendError, CardApi, CardId};
use tokio::sync::Mutex;

use crate::optimistic::LikeEdit;
use crate::store::Feed;

/// Ids this client has already liked, persisted as a JSON array of strings.
#[derive(Debug, Default)]
pub struct LikedCards {
    path: Option<PathBuf>,
    ids: BTreeSet<CardId>,
}

impl LikedCards {
    /// Loads the set from `path`. A missing or unreadable file yields an empty
    /// set; the error is logged.
    #[must_use]
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let ids = match read_ids(&path) {
            Ok(ids) => ids,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not read liked cards; starting empty");
                BTreeSet::new()
            }
        };
        Self {
            path: Some(path),
            ids,
        }
    }

    /// A set that is never written to disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, id: &CardId) -> bool {
        self.ids.contains(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Records `id` and writes the file. Write failures are logged only.
    pub async fn insert(&mut self, id: CardId) {
        if !self.ids.insert(id) {
            return;
        }
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = write_ids(path, &self.ids).await {
            tracing::warn!(path = %path.display(), error = %e, "could not persist liked cards");
        }
    }
}

fn read_ids(path: &Path) -> io::Result<BTreeSet<CardId>> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

async fn write_ids(path: &Path, ids: &BTreeSet<CardId>) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let body = serde_json::to_vec(ids).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    tokio::fs::write(path, body).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeOutcome {
    /// The server accepted the like; `likes` is its count.
    Liked { likes: u32 },
    /// Already liked, or a like is still in flight. Nothing was sent.
    AlreadyLiked,
}

#[derive(Debug, Default)]
struct LikeState {
    liked: LikedCards,
    in_flight: HashSet<CardId>,
}

pub struct LikeCounter {
    feed: Feed,
    api: Arc<dyn CardApi>,
    state: Mutex<LikeState>,
}

impl std::fmt::Debug for LikeCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LikeCounter").finish_non_exhaustive()
    }
}

impl LikeCounter {
    #[must_use]
    pub fn new(feed: Feed, api: Arc<dyn CardApi>, liked: LikedCards) -> Self {
        Self {
            feed,
            api,
            state: Mutex::new(LikeState {
                liked,
                in_flight: HashSet::new(),
            }),
        }
    }

    pub async fn has_liked(&self, id: &CardId) -> bool {
        self.state.lock().await.liked.contains(id)
    }

    /// Likes `id` once.
    ///
    /// # Errors
    ///
    /// Returns the like route's error after the optimistic increment has been
    /// taken back. The card is not marked as liked, so a retry is allowed.
    pub async fn like(&self, id: &CardId) -> Result<LikeOutcome, BackendError> {
        {
            let mut state = self.state.lock().await;
            if state.liked.contains(id) || !state.in_flight.insert(id.clone()) {
                tracing::debug!(card_id = %id, "like ignored; already liked");
                return Ok(LikeOutcome::AlreadyLiked);
            }
        }

        let result = self
            .feed
            .optimistic(LikeEdit::new(id.clone()), || self.api.like_card(id))
            .await;

        let mut state = self.state.lock().await;
        state.in_flight.remove(id);
        match result {
            Ok(likes) => {
                state.liked.insert(id.clone()).await;
                tracing::info!(card_id = %id, likes, "card liked");
                Ok(LikeOutcome::Liked { likes })
            }
            Err(e) => {
                tracing::warn!(card_id = %id, error = %e, "like failed; reverted");
                Err(e)
            }
        }
    }
}
