//! Card ("result record") types shared by the store, the API and the clients.
//!
//! Field names on the wire follow the `cards` table: `card_type`, `likes`,
//! `responses`, `citations`, `created_at`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Longest accepted question, in characters.
pub const MAX_TITLE_CHARS: usize = 500;

/// Categories a reader can tick when reporting a biased or wrong answer.
pub const BIAS_CATEGORIES: [&str; 6] = [
    "Gender-Related Bias",
    "Cultural or Ethnic Bias",
    "Racial Bias",
    "Misleading Information or Inaccuracies",
    "Uninformative Response",
    "Factually Inaccurate",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CardError {
    #[error("title must not be blank")]
    BlankTitle,

    #[error("title exceeds {max} characters (got {len})")]
    TitleTooLong { len: usize, max: usize },

    #[error("unknown card type: {0}")]
    UnknownCardType(String),

    #[error("unknown card status: {0}")]
    UnknownStatus(String),

    #[error("bias report must name at least one category or carry a comment")]
    EmptyBiasReport,
}

/// Opaque card identifier assigned by the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardId(String);

impl CardId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CardId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for CardId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<Uuid> for CardId {
    fn from(value: Uuid) -> Self {
        Self(value.to_string())
    }
}

/// Which answer-generation mode was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CardType {
    #[serde(rename = "general")]
    GeneralSummary,
    #[serde(rename = "in_depth")]
    InDepthReport,
}

impl CardType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CardType::GeneralSummary => "general",
            CardType::InDepthReport => "in_depth",
        }
    }
}

impl fmt::Display for CardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CardType {
    type Err = CardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general" => Ok(CardType::GeneralSummary),
            "in_depth" | "in-depth" => Ok(CardType::InDepthReport),
            other => Err(CardError::UnknownCardType(other.to_owned())),
        }
    }
}

/// Visibility lifecycle. Only `Public` cards appear in the shared feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardStatus {
    New,
    Public,
    Archived,
}

impl CardStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CardStatus::New => "new",
            CardStatus::Public => "public",
            CardStatus::Archived => "archived",
        }
    }
}

impl FromStr for CardStatus {
    type Err = CardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(CardStatus::New),
            "public" => Ok(CardStatus::Public),
            "archived" => Ok(CardStatus::Archived),
            other => Err(CardError::UnknownStatus(other.to_owned())),
        }
    }
}

/// One generated answer fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerFragment {
    pub response: String,
}

impl AnswerFragment {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

/// A reference to the transcript or document backing an answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_publish_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "string_or_number"
    )]
    pub source_timestamp: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "string_or_number"
    )]
    pub source_page_number: Option<String>,
}

/// A single question-and-answer unit displayed in the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub title: String,
    pub card_type: CardType,
    pub status: CardStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub likes: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub responses: Vec<AnswerFragment>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub citations: Vec<Citation>,
    /// Set only for cards created by this client session. Never serialized.
    #[serde(skip)]
    pub is_mine: bool,
}

impl Card {
    /// A card with no answer fragments is still being generated.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.responses.is_empty()
    }
}

/// Body of the record-creation route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCard {
    pub title: String,
    pub card_type: CardType,
}

impl NewCard {
    pub fn new(title: impl Into<String>, card_type: CardType) -> Self {
        Self {
            title: title.into(),
            card_type,
        }
    }

    /// Trims the title and checks its length.
    ///
    /// # Errors
    ///
    /// Returns [`CardError::BlankTitle`] or [`CardError::TitleTooLong`].
    pub fn validated(&self) -> Result<NewCard, CardError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(CardError::BlankTitle);
        }
        let len = title.chars().count();
        if len > MAX_TITLE_CHARS {
            return Err(CardError::TitleTooLong {
                len,
                max: MAX_TITLE_CHARS,
            });
        }
        Ok(NewCard::new(title, self.card_type))
    }
}

/// A reader's report that an answer is biased or inaccurate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiasReport {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub categories: Vec<String>,
    #[serde(default)]
    pub comment: String,
}

impl BiasReport {
    pub fn new(categories: Vec<String>, comment: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            categories,
            comment: comment.into(),
        }
    }

    /// # Errors
    ///
    /// Returns [`CardError::EmptyBiasReport`] when there is nothing to record.
    pub fn validate(&self) -> Result<(), CardError> {
        if self.categories.is_empty() && self.comment.trim().is_empty() {
            return Err(CardError::EmptyBiasReport);
        }
        Ok(())
    }
}

/// Field-level update for one card pushed by the change feed or produced by
/// a direct fetch. `None` means "field not carried by this update".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardChange {
    #[serde(rename = "id")]
    pub card_id: CardId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responses: Option<Vec<AnswerFragment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
}

impl CardChange {
    /// Builds a change carrying every tracked field of `card`.
    #[must_use]
    pub fn from_card(card: &Card) -> Self {
        Self {
            card_id: card.id.clone(),
            likes: Some(card.likes),
            responses: Some(card.responses.clone()),
            citations: Some(card.citations.clone()),
        }
    }

    #[must_use]
    pub fn likes_only(card_id: CardId, likes: u32) -> Self {
        Self {
            card_id,
            likes: Some(likes),
            responses: None,
            citations: None,
        }
    }
}

/// Payload sent to the answer-generation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub query: String,
    pub response_type: CardType,
    pub card_id: CardId,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}
