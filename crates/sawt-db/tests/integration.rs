//! Offline tests for sawt-db pool configuration and row conversion.
//! These tests do not require a live database connection.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use chrono::Utc;
use sawt_core::{AppConfig, BackendError, CardStatus, CardType, Environment};
use sawt_db::{CardRow, DbError, PoolConfig};
use uuid::Uuid;

#[test]
fn pool_config_from_app_config_uses_core_values() {
    let app_config = AppConfig {
        database_url: "postgres://example".to_string(),
        env: Environment::Test,
        bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 3000),
        log_level: "info".to_string(),
        db_max_connections: 42,
        db_min_connections: 7,
        db_acquire_timeout_secs: 9,
        page_size: 5,
        rate_limit_max_requests: 60,
        rate_limit_window_secs: 60,
    };

    let pool_config = PoolConfig::from_app_config(&app_config);
    assert_eq!(pool_config.max_connections, 42);
    assert_eq!(pool_config.min_connections, 7);
    assert_eq!(pool_config.acquire_timeout_secs, 9);
}

#[test]
fn card_row_round_trips_citations() {
    let row = CardRow {
        id: Uuid::new_v4(),
        title: "What did the council say about short-term rentals?".to_string(),
        card_type: "general".to_string(),
        status: "new".to_string(),
        created_at: Utc::now(),
        likes: 0,
        responses: None,
        citations: Some(serde_json::json!([
            {
                "source_title": "Regular Council Meeting",
                "source_url": "https://www.youtube.com/watch?v=abc&t=10s",
                "source_timestamp": "00:00:10"
            }
        ])),
    };

    let card = row.into_card().expect("row converts");
    assert_eq!(card.card_type, CardType::GeneralSummary);
    assert_eq!(card.status, CardStatus::New);
    assert!(card.is_pending());
    assert_eq!(card.citations.len(), 1);
    assert_eq!(
        card.citations[0].source_timestamp.as_deref(),
        Some("00:00:10")
    );
}

#[test]
fn invalid_row_maps_to_server_rejection() {
    let err: BackendError = DbError::InvalidRow {
        id: "x".to_string(),
        reason: "bad".to_string(),
    }
    .into();
    assert!(matches!(err, BackendError::Rejected { status: 500, .. }));
    assert!(err.is_transient());
}
