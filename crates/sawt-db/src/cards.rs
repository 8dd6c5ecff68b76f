//! Database operations for the `cards` table.

use chrono::{DateTime, Utc};
use sawt_core::{AnswerFragment, BiasReport, Card, CardId, CardStatus, CardType, Citation, NewCard};
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row type
// ---------------------------------------------------------------------------

/// A row from the `cards` table (the `bias` column is write-only here).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CardRow {
    pub id: Uuid,
    pub title: String,
    pub card_type: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub likes: i32,
    pub responses: Option<serde_json::Value>,
    pub citations: Option<serde_json::Value>,
}

const CARD_COLUMNS: &str =
    "id, title, card_type, status, created_at, likes, responses, citations";

impl CardRow {
    /// Converts the row into the shared domain type.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidRow`] when an enum column or a JSON column
    /// holds something the domain type cannot represent.
    pub fn into_card(self) -> Result<Card, DbError> {
        let id = self.id.to_string();
        let invalid = |reason: String| DbError::InvalidRow {
            id: id.clone(),
            reason,
        };

        let card_type: CardType = self.card_type.parse().map_err(|e| invalid(format!("{e}")))?;
        let status: CardStatus = self.status.parse().map_err(|e| invalid(format!("{e}")))?;
        let likes = u32::try_from(self.likes).map_err(|e| invalid(format!("likes: {e}")))?;
        let responses: Vec<AnswerFragment> =
            json_list(self.responses).map_err(|e| invalid(format!("responses: {e}")))?;
        let citations: Vec<Citation> =
            json_list(self.citations).map_err(|e| invalid(format!("citations: {e}")))?;

        Ok(Card {
            id: CardId::from(self.id),
            title: self.title,
            card_type,
            status,
            created_at: Some(self.created_at),
            likes,
            responses,
            citations,
            is_mine: false,
        })
    }
}

fn json_list<T: serde::de::DeserializeOwned>(
    value: Option<serde_json::Value>,
) -> Result<Vec<T>, serde_json::Error> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(v) => serde_json::from_value(v),
    }
}

/// Card ids are UUIDs in the database; anything else cannot exist.
pub(crate) fn parse_card_id(id: &CardId) -> Result<Uuid, DbError> {
    Uuid::parse_str(id.as_str()).map_err(|_| DbError::NotFound(id.clone()))
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Public cards created strictly before `before` (or all), newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_public_cards(
    pool: &PgPool,
    before: Option<DateTime<Utc>>,
    limit: i64,
) -> Result<Vec<CardRow>, DbError> {
    let rows = sqlx::query_as::<_, CardRow>(&format!(
        "SELECT {CARD_COLUMNS} \
         FROM cards \
         WHERE status = 'public' \
           AND ($1::timestamptz IS NULL OR created_at < $1) \
         ORDER BY created_at DESC, id \
         LIMIT $2"
    ))
    .bind(before)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns a single card by id regardless of status, or `None`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_card(pool: &PgPool, id: Uuid) -> Result<Option<CardRow>, DbError> {
    let row = sqlx::query_as::<_, CardRow>(&format!(
        "SELECT {CARD_COLUMNS} FROM cards WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Inserts a card with server defaults (`status = 'new'`, `likes = 0`).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn insert_card(pool: &PgPool, new_card: &NewCard) -> Result<CardRow, DbError> {
    let row = sqlx::query_as::<_, CardRow>(&format!(
        "INSERT INTO cards (title, card_type, status, likes) \
         VALUES ($1, $2, 'new', 0) \
         RETURNING {CARD_COLUMNS}"
    ))
    .bind(&new_card.title)
    .bind(new_card.card_type.as_str())
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Atomically increments `likes`, returning the new value, or `None` when the
/// card does not exist.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn increment_likes(pool: &PgPool, id: Uuid) -> Result<Option<i32>, DbError> {
    let likes = sqlx::query_scalar::<_, i32>(
        "UPDATE cards SET likes = likes + 1 WHERE id = $1 RETURNING likes",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(likes)
}

/// Appends a bias report to the card's `bias` list. Returns `false` when the
/// card does not exist.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn append_bias_report(
    pool: &PgPool,
    id: Uuid,
    report: &BiasReport,
) -> Result<bool, DbError> {
    let payload = serde_json::to_value(report).map_err(|e| DbError::InvalidRow {
        id: id.to_string(),
        reason: format!("bias report: {e}"),
    })?;

    let result = sqlx::query(
        "UPDATE cards \
         SET bias = COALESCE(bias, '[]'::jsonb) || jsonb_build_array($2::jsonb) \
         WHERE id = $1",
    )
    .bind(id)
    .bind(payload)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
