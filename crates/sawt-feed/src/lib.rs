//! Client-side synchronization of the public results feed.
//!
//! [`Feed`] owns the deduplicated, date-sorted card list. The
//! [`LiveUpdateBridge`] keeps individual cards current, [`LikeCounter`] and
//! [`QueryComposer`] layer optimistic writes on top.

pub mod bridge;
pub mod likes;
pub mod optimistic;
pub mod session;
pub mod store;
pub mod submission;

#[cfg(test)]
pub(crate) mod test_support;

pub use bridge::{reconcile, BridgeConfig, BridgeHandle, LiveUpdateBridge};
pub use likes::{LikeCounter, LikeOutcome, LikedCards};
pub use optimistic::{InsertEdit, LikeEdit, OptimisticEdit};
pub use session::FeedSession;
pub use store::{Feed, PageOutcome, ResultStore, DEFAULT_PAGE_SIZE};
pub use submission::{QueryComposer, SubmissionState, SubmitError, MIN_QUERY_CHARS};
