use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sawt_core::{
    BackendError, BiasReport, Card, CardApi, CardId, CardSource, CardStore, NewCard,
};
use sqlx::PgPool;

use crate::cards::{self, parse_card_id};
use crate::DbError;

/// [`CardStore`] backed directly by the `cards` table.
#[derive(Debug, Clone)]
pub struct PgCardStore {
    pool: PgPool,
}

impl PgCardStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CardSource for PgCardStore {
    async fn list_public_cards(
        &self,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Card>, BackendError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = cards::list_public_cards(&self.pool, before, limit).await?;
        let cards = rows
            .into_iter()
            .map(cards::CardRow::into_card)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(cards)
    }

    async fn fetch_card(&self, id: &CardId) -> Result<Card, BackendError> {
        let uuid = parse_card_id(id)?;
        let row = cards::get_card(&self.pool, uuid)
            .await?
            .ok_or_else(|| DbError::NotFound(id.clone()))?;
        Ok(row.into_card()?)
    }
}

#[async_trait]
impl CardApi for PgCardStore {
    async fn create_card(&self, new_card: &NewCard) -> Result<Card, BackendError> {
        let new_card = new_card
            .validated()
            .map_err(|e| BackendError::Validation(e.to_string()))?;
        let row = cards::insert_card(&self.pool, &new_card).await?;
        let card = row.into_card()?;
        tracing::info!(card_id = %card.id, card_type = %card.card_type, "card created");
        Ok(card)
    }

    async fn like_card(&self, id: &CardId) -> Result<u32, BackendError> {
        let uuid = parse_card_id(id)?;
        let likes = cards::increment_likes(&self.pool, uuid)
            .await?
            .ok_or_else(|| DbError::NotFound(id.clone()))?;
        u32::try_from(likes).map_err(|e| {
            BackendError::from(DbError::InvalidRow {
                id: id.to_string(),
                reason: format!("likes: {e}"),
            })
        })
    }

    async fn report_bias(&self, id: &CardId, report: &BiasReport) -> Result<(), BackendError> {
        report
            .validate()
            .map_err(|e| BackendError::Validation(e.to_string()))?;
        let uuid = parse_card_id(id)?;
        if cards::append_bias_report(&self.pool, uuid, report).await? {
            tracing::info!(card_id = %id, report_id = %report.id, "bias report recorded");
            Ok(())
        } else {
            Err(BackendError::NotFound(id.clone()))
        }
    }
}

#[async_trait]
impl CardStore for PgCardStore {
    async fn health_check(&self) -> Result<(), BackendError> {
        crate::health_check(&self.pool).await?;
        Ok(())
    }
}
