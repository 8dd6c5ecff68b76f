//! Live integration tests for sawt-db using `#[sqlx::test]`.
//!
//! Each test gets a fresh, fully-migrated Postgres database spun up by the
//! sqlx test harness. They need `DATABASE_URL` and are ignored by default:
//! run with `cargo test -p sawt-db -- --ignored`.

use std::time::Duration;

use sawt_core::{
    BackendError, BiasReport, CardApi, CardId, CardSource, CardType, ChangeFeed, NewCard,
};
use sawt_db::{ChangeHub, PgCardStore};

async fn publish(pool: &sqlx::PgPool, id: &CardId) {
    sqlx::query("UPDATE cards SET status = 'public' WHERE id = $1::uuid")
        .bind(id.as_str())
        .execute(pool)
        .await
        .unwrap_or_else(|e| panic!("publish failed for {id}: {e}"));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn create_card_applies_server_defaults(pool: sqlx::PgPool) {
    let store = PgCardStore::new(pool);
    let card = store
        .create_card(&NewCard::new(
            "  Who sponsored the noise ordinance?  ",
            CardType::InDepthReport,
        ))
        .await
        .expect("create");

    assert_eq!(card.title, "Who sponsored the noise ordinance?");
    assert_eq!(card.status, sawt_core::CardStatus::New);
    assert_eq!(card.likes, 0);
    assert!(card.is_pending());
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn like_card_increments_atomically(pool: sqlx::PgPool) {
    let store = PgCardStore::new(pool);
    let card = store
        .create_card(&NewCard::new("How many votes did the levy get?", CardType::GeneralSummary))
        .await
        .expect("create");

    assert_eq!(store.like_card(&card.id).await.expect("like"), 1);
    assert_eq!(store.like_card(&card.id).await.expect("like"), 2);

    let missing = CardId::from(uuid::Uuid::new_v4());
    assert!(matches!(
        store.like_card(&missing).await,
        Err(BackendError::NotFound(_))
    ));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn list_public_cards_pages_by_created_at(pool: sqlx::PgPool) {
    let store = PgCardStore::new(pool.clone());
    for title in ["first question here", "second question here", "third question here"] {
        let card = store
            .create_card(&NewCard::new(title, CardType::GeneralSummary))
            .await
            .expect("create");
        publish(&pool, &card.id).await;
    }
    store
        .create_card(&NewCard::new("still new, not public", CardType::GeneralSummary))
        .await
        .expect("create");

    let first = store.list_public_cards(None, 2).await.expect("page 1");
    assert_eq!(first.len(), 2);
    let cursor = first.last().and_then(|c| c.created_at);
    let second = store.list_public_cards(cursor, 2).await.expect("page 2");
    assert_eq!(second.len(), 1);
    assert!(second.iter().all(|c| !first.iter().any(|f| f.id == c.id)));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn report_bias_appends(pool: sqlx::PgPool) {
    let store = PgCardStore::new(pool.clone());
    let card = store
        .create_card(&NewCard::new("Was the budget vote unanimous?", CardType::GeneralSummary))
        .await
        .expect("create");

    let report = BiasReport::new(vec!["Factually Inaccurate".to_string()], "wrong date");
    store.report_bias(&card.id, &report).await.expect("report");
    store.report_bias(&card.id, &report).await.expect("report");

    let count: i32 = sqlx::query_scalar("SELECT jsonb_array_length(bias) FROM cards WHERE id = $1::uuid")
        .bind(card.id.as_str())
        .fetch_one(&pool)
        .await
        .expect("count");
    assert_eq!(count, 2);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn change_hub_delivers_updates(pool: sqlx::PgPool) {
    let store = PgCardStore::new(pool.clone());
    let card = store
        .create_card(&NewCard::new("When is the next council meeting?", CardType::GeneralSummary))
        .await
        .expect("create");

    let hub = ChangeHub::default();
    let _listener = hub.listen(pool.clone()).await.expect("listen");
    let mut sub = hub.subscribe(&card.id).await.expect("subscribe");

    store.like_card(&card.id).await.expect("like");

    let change = tokio::time::timeout(Duration::from_secs(5), sub.next())
        .await
        .expect("change arrives in time")
        .expect("subscription open");
    assert_eq!(change.card_id, card.id);
    assert_eq!(change.likes, Some(1));
}
