use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use sawt_core::{BiasReport, Card, CardId, NewCard};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::middleware::RequestId;

use super::{map_backend_error, normalize_limit, ApiError, ApiResponse, AppState};

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(super) struct CardListQuery {
    pub before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub(super) struct CreatedCard {
    card: Card,
}

#[derive(Debug, Deserialize)]
pub(super) struct LikeRequest {
    #[serde(alias = "cardId")]
    card_id: CardId,
}

#[derive(Debug, Serialize)]
pub(super) struct LikeResponse {
    card_id: CardId,
    likes: u32,
}

#[derive(Debug, Deserialize)]
pub(super) struct BiasReportRequest {
    id: Option<Uuid>,
    #[serde(rename = "type", default)]
    categories: Vec<String>,
    #[serde(default)]
    comment: String,
}

#[derive(Debug, Serialize)]
pub(super) struct BiasReportResponse {
    card_id: CardId,
    report_id: Uuid,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /api/v1/cards: public cards created before `before`, newest first.
pub(super) async fn list_cards(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<CardListQuery>,
) -> Result<Json<ApiResponse<Vec<Card>>>, ApiError> {
    let limit = normalize_limit(query.limit, state.page_size);
    let cards = state
        .store
        .list_public_cards(query.before, limit)
        .await
        .map_err(|e| map_backend_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse::new(cards, req_id.0)))
}

/// GET /api/v1/cards/{id}
pub(super) async fn get_card(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Card>>, ApiError> {
    let card = state
        .store
        .fetch_card(&CardId::new(id))
        .await
        .map_err(|e| map_backend_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse::new(card, req_id.0)))
}

/// POST /api/v1/cards: insert with `status = new` and `likes = 0`.
pub(super) async fn create_card(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<NewCard>,
) -> Result<(StatusCode, Json<ApiResponse<CreatedCard>>), ApiError> {
    let rid = &req_id.0;
    let new_card = body
        .validated()
        .map_err(|e| ApiError::new(rid, "validation_error", e.to_string()))?;

    let card = state
        .store
        .create_card(&new_card)
        .await
        .map_err(|e| map_backend_error(rid.clone(), &e))?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(CreatedCard { card }, req_id.0)),
    ))
}

/// POST /api/v1/cards/like: atomic increment of an existing card.
pub(super) async fn like_card(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<LikeRequest>,
) -> Result<Json<ApiResponse<LikeResponse>>, ApiError> {
    let rid = &req_id.0;

    state
        .store
        .fetch_card(&body.card_id)
        .await
        .map_err(|e| map_backend_error(rid.clone(), &e))?;

    let likes = state
        .store
        .like_card(&body.card_id)
        .await
        .map_err(|e| map_backend_error(rid.clone(), &e))?;

    tracing::debug!(card_id = %body.card_id, likes, "card liked");
    Ok(Json(ApiResponse::new(
        LikeResponse {
            card_id: body.card_id,
            likes,
        },
        req_id.0,
    )))
}

/// POST /api/v1/cards/{id}/bias: append a bias report.
pub(super) async fn report_bias(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<String>,
    Json(body): Json<BiasReportRequest>,
) -> Result<Json<ApiResponse<BiasReportResponse>>, ApiError> {
    let rid = &req_id.0;
    let card_id = CardId::new(id);

    let mut report = BiasReport::new(body.categories, body.comment);
    if let Some(report_id) = body.id {
        report.id = report_id;
    }
    report
        .validate()
        .map_err(|e| ApiError::new(rid, "validation_error", e.to_string()))?;

    state
        .store
        .report_bias(&card_id, &report)
        .await
        .map_err(|e| map_backend_error(rid.clone(), &e))?;

    Ok(Json(ApiResponse::new(
        BiasReportResponse {
            card_id,
            report_id: report.id,
        },
        req_id.0,
    )))
}
