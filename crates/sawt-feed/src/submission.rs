//! Asking a new question: create the card, request an answer, track it.
//!
//! ```text
//! Idle ──submit──▶ Submitting ──created──▶ AwaitingAnswer ──answered──▶ Resolved
//!                      │                         │
//!                      └──create failed──▶ Idle ◀┘ dispatch failed
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sawt_core::{
    AnswerRequest, AnswerService, BackendError, Card, CardApi, CardId, CardStatus, CardType,
    NewCard,
};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::bridge::{BridgeHandle, LiveUpdateBridge};
use crate::optimistic::InsertEdit;

/// Queries must be longer than this, in characters, after trimming.
pub const MIN_QUERY_CHARS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionState {
    Idle,
    Submitting,
    AwaitingAnswer { card_id: CardId },
    Resolved { card_id: CardId },
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("query must be longer than {min} characters (got {len})")]
    TooShort { len: usize, min: usize },

    #[error("a query is already being submitted")]
    Busy,

    #[error("could not create card: {0}")]
    Create(#[source] BackendError),
}

type Bridges = Arc<Mutex<HashMap<CardId, BridgeHandle>>>;

pub struct QueryComposer {
    api: Arc<dyn CardApi>,
    answers: Arc<dyn AnswerService>,
    bridge: LiveUpdateBridge,
    state: Arc<watch::Sender<SubmissionState>>,
    bridges: Bridges,
    supervisors: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for QueryComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryComposer")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl QueryComposer {
    #[must_use]
    pub fn new(
        api: Arc<dyn CardApi>,
        answers: Arc<dyn AnswerService>,
        bridge: LiveUpdateBridge,
    ) -> Self {
        let (state, _) = watch::channel(SubmissionState::Idle);
        Self {
            api,
            answers,
            bridge,
            state: Arc::new(state),
            bridges: Arc::new(Mutex::new(HashMap::new())),
            supervisors: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn state(&self) -> SubmissionState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SubmissionState> {
        self.state.subscribe()
    }

    /// Input is disabled only while a card is being created.
    #[must_use]
    pub fn input_enabled(&self) -> bool {
        !matches!(*self.state.borrow(), SubmissionState::Submitting)
    }

    /// Number of cards currently tracked by a live bridge.
    pub async fn tracked(&self) -> usize {
        self.bridges.lock().await.len()
    }

    /// Creates a card for `query` and starts waiting for its answer.
    ///
    /// Returns once the card exists; the answer request runs in the
    /// background and its outcome is reported through [`Self::subscribe`].
    ///
    /// # Errors
    ///
    /// - [`SubmitError::TooShort`] before any network call.
    /// - [`SubmitError::Busy`] while another submission is being created.
    /// - [`SubmitError::Create`] when the creation route fails; the
    ///   provisional card is removed and the state returns to `Idle`.
    pub async fn submit(&self, query: &str, mode: CardType) -> Result<CardId, SubmitError> {
        let query = query.trim();
        let len = query.chars().count();
        if len <= MIN_QUERY_CHARS {
            return Err(SubmitError::TooShort {
                len,
                min: MIN_QUERY_CHARS,
            });
        }

        let acquired = self.state.send_if_modified(|state| {
            if *state == SubmissionState::Submitting {
                false
            } else {
                *state = SubmissionState::Submitting;
                true
            }
        });
        if !acquired {
            return Err(SubmitError::Busy);
        }
        let submitting = SubmittingGuard::new(&self.state);

        let provisional = Card {
            id: CardId::from(Uuid::new_v4()),
            title: query.to_string(),
            card_type: mode,
            status: CardStatus::New,
            created_at: Some(Utc::now()),
            likes: 0,
            responses: Vec::new(),
            citations: Vec::new(),
            is_mine: true,
        };
        let new_card = NewCard::new(query, mode);

        let created = match self
            .bridge
            .feed()
            .optimistic(InsertEdit::new(provisional), || self.api.create_card(&new_card))
            .await
        {
            Ok(card) => card,
            Err(e) => {
                tracing::warn!(error = %e, "card creation failed; provisional card removed");
                return Err(SubmitError::Create(e));
            }
        };
        let card_id = created.id.clone();
        tracing::info!(card_id = %card_id, card_type = %mode, "card created; requesting answer");

        let handle = self.bridge.mount(card_id.clone()).await;
        let resolved = handle.resolved();
        let previous = self.bridges.lock().await.insert(card_id.clone(), handle);
        if let Some(previous) = previous {
            previous.unmount().await;
        }

        submitting.finish(SubmissionState::AwaitingAnswer {
            card_id: card_id.clone(),
        });

        let request = AnswerRequest {
            query: query.to_string(),
            response_type: mode,
            card_id: card_id.clone(),
        };
        let supervisor = tokio::spawn(supervise(
            Arc::clone(&self.answers),
            request,
            resolved,
            Arc::clone(&self.state),
            Arc::clone(&self.bridges),
        ));
        let mut supervisors = self.supervisors.lock().await;
        supervisors.retain(|task| !task.is_finished());
        supervisors.push(supervisor);

        Ok(card_id)
    }

    /// Stops every background task and bridge this composer started.
    pub async fn unmount(&self) {
        for supervisor in self.supervisors.lock().await.drain(..) {
            supervisor.abort();
        }
        let handles: Vec<BridgeHandle> = self.bridges.lock().await.drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.unmount().await;
        }
    }
}

/// Dispatches the answer request and moves the state machine on when either
/// the answer shows up or the dispatch fails.
async fn supervise(
    answers: Arc<dyn AnswerService>,
    request: AnswerRequest,
    mut resolved: watch::Receiver<bool>,
    state: Arc<watch::Sender<SubmissionState>>,
    bridges: Bridges,
) {
    let card_id = request.card_id.clone();
    let mut dispatch = answers.request_answer(&request);

    let answered = tokio::select! {
        result = &mut dispatch => match result {
            Ok(()) => {
                tracing::debug!(card_id = %card_id, "answer requested");
                wait_resolved(&mut resolved).await
            }
            Err(e) => {
                tracing::warn!(card_id = %card_id, error = %e, "answer request failed; card left pending");
                release_bridge(&bridges, &card_id).await;
                transition(&state, &card_id, SubmissionState::Idle);
                return;
            }
        },
        answered = wait_resolved(&mut resolved) => {
            if answered {
                transition(&state, &card_id, SubmissionState::Resolved { card_id: card_id.clone() });
                release_bridge(&bridges, &card_id).await;
            }
            if let Err(e) = dispatch.await {
                tracing::debug!(card_id = %card_id, error = %e, "answer request failed after answer arrived");
            }
            return;
        }
    };

    if answered {
        transition(&state, &card_id, SubmissionState::Resolved { card_id: card_id.clone() });
        release_bridge(&bridges, &card_id).await;
    }
}

/// Unmounts the bridge for `card_id` if it is still tracked.
async fn release_bridge(bridges: &Bridges, card_id: &CardId) {
    let handle = bridges.lock().await.remove(card_id);
    if let Some(handle) = handle {
        handle.unmount().await;
    }
}

/// Puts the state back to `Idle` if a submission stops before its card is
/// created, including when the `submit` future is dropped.
struct SubmittingGuard<'a> {
    state: &'a watch::Sender<SubmissionState>,
    armed: bool,
}

impl<'a> SubmittingGuard<'a> {
    fn new(state: &'a watch::Sender<SubmissionState>) -> Self {
        Self { state, armed: true }
    }

    fn finish(mut self, next: SubmissionState) {
        self.armed = false;
        self.state.send_replace(next);
    }
}

impl Drop for SubmittingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.send_if_modified(|state| {
                if *state == SubmissionState::Submitting {
                    *state = SubmissionState::Idle;
                    true
                } else {
                    false
                }
            });
        }
    }
}

/// `false` if the bridge went away before the answer arrived.
async fn wait_resolved(resolved: &mut watch::Receiver<bool>) -> bool {
    resolved.wait_for(|r| *r).await.is_ok()
}

/// Moves to `next` only if `card_id` is still the card being awaited.
fn transition(state: &watch::Sender<SubmissionState>, card_id: &CardId, next: SubmissionState) {
    state.send_if_modified(|current| match current {
        SubmissionState::AwaitingAnswer { card_id: awaiting } if awaiting == card_id => {
            tracing::debug!(card_id = %card_id, state = ?next, "submission state changed");
            *current = next;
            true
        }
        _ => false,
    });
}
