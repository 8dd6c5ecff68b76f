//! HTTP implementations of the `sawt-core` ports: the card API client (reads,
//! writes and the server-sent change stream) and the answer-service client.

mod answer;
mod client;
mod error;
mod retry;
pub mod sse;

pub use answer::AnswerClient;
pub use client::SawtClient;
pub use error::ClientError;
