//! Connection store and idempotency guard against SQLite.

mod test_utils;

use calendar_sync::error::is_unique_violation;
use calendar_sync::models::{CalendarProvider, CalendarConnection, connection};
use calendar_sync::repositories::{
    ConnectionRepository, ConnectionStoreError, IdempotencyKeyRepository, NewConnection, event_key,
};
use chrono::{Duration, Utc};
use sea_orm::{EntityTrait, Set};
use test_utils::{setup_test_db_arc, test_vault};
use uuid::Uuid;

fn new_connection(user: &str, provider: CalendarProvider) -> NewConnection {
    NewConnection {
        user_id: user.to_string(),
        provider,
        access_token: "access".to_string(),
        refresh_token: Some("refresh".to_string()),
        token_expires_at: Some(Utc::now() + Duration::hours(1)),
        calendar_id: Some("primary".to_string()),
        calendar_name: Some("Work".to_string()),
    }
}

async fn repository() -> ConnectionRepository {
    ConnectionRepository::new(setup_test_db_arc().await.unwrap(), test_vault())
}

#[tokio::test]
async fn create_then_find_by_user_and_provider() {
    let repo = repository().await;
    let created = repo
        .create(new_connection("u1", CalendarProvider::Google))
        .await
        .unwrap();

    let found = repo
        .find_by_user_and_provider("u1", CalendarProvider::Google)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, created.id);
    assert!(found.is_active);
    assert_eq!(found.sync_failure_count, 0);
    assert!(
        repo.find_by_user_and_provider("u1", CalendarProvider::Microsoft)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn second_row_for_same_user_and_provider_is_rejected() {
    let repo = repository().await;
    repo.create(new_connection("u1", CalendarProvider::Google))
        .await
        .unwrap();

    let err = repo
        .create(new_connection("u1", CalendarProvider::Google))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectionStoreError::Database(ref db) if is_unique_violation(db)));

    repo.create(new_connection("u1", CalendarProvider::Microsoft))
        .await
        .unwrap();
    assert_eq!(repo.find_all_active_by_user("u1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn update_of_unknown_id_is_not_found() {
    let repo = repository().await;
    let id = Uuid::new_v4();

    let err = repo
        .update(
            id,
            connection::ActiveModel {
                calendar_name: Set(Some("x".to_string())),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectionStoreError::NotFound(missing) if missing == id));

    let err = repo
        .increment_sync_failure_count(id, "boom")
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectionStoreError::NotFound(_)));
}

#[tokio::test]
async fn expired_token_query_skips_inactive_future_and_unset() {
    let repo = repository().await;
    let past = Utc::now() - Duration::minutes(10);

    let due = repo
        .create(NewConnection {
            token_expires_at: Some(past),
            ..new_connection("u1", CalendarProvider::Google)
        })
        .await
        .unwrap();
    repo.create(new_connection("u1", CalendarProvider::Microsoft))
        .await
        .unwrap();
    repo.create(NewConnection {
        token_expires_at: None,
        ..new_connection("u2", CalendarProvider::Google)
    })
    .await
    .unwrap();
    let inactive = repo
        .create(NewConnection {
            token_expires_at: Some(past),
            ..new_connection("u3", CalendarProvider::Google)
        })
        .await
        .unwrap();
    repo.update(
        inactive.id,
        connection::ActiveModel {
            is_active: Set(false),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let expired = repo.find_expired_tokens(Utc::now()).await.unwrap();
    assert_eq!(expired.iter().map(|c| c.id).collect::<Vec<_>>(), vec![due.id]);
    assert!(
        repo.find_all_active_by_user("u3")
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn failure_counter_increments_and_resets() {
    let repo = repository().await;
    let created = repo
        .create(new_connection("u1", CalendarProvider::Google))
        .await
        .unwrap();

    repo.increment_sync_failure_count(created.id, "first")
        .await
        .unwrap();
    repo.increment_sync_failure_count(created.id, "second")
        .await
        .unwrap();
    let row = repo.find_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(row.sync_failure_count, 2);
    assert_eq!(row.last_sync_error.as_deref(), Some("second"));

    let reset = repo.reset_sync_failure_count(created.id).await.unwrap();
    assert_eq!(reset.sync_failure_count, 0);

    let synced = repo
        .record_sync_success(created.id, Utc::now())
        .await
        .unwrap();
    assert!(synced.last_synced_at.is_some());
    assert_eq!(synced.last_sync_error, None);
}

#[tokio::test]
async fn update_tokens_keeps_refresh_token_when_not_rotated() {
    let repo = repository().await;
    let created = repo
        .create(new_connection("u1", CalendarProvider::Google))
        .await
        .unwrap();

    let access = repo.encrypt_token("new-access").unwrap();
    let updated = repo
        .update_tokens(created.id, access, None, None)
        .await
        .unwrap();

    assert_eq!(repo.decrypt_access_token(&updated).as_deref(), Some("new-access"));
    assert_eq!(
        repo.decrypt_refresh_token(&updated).unwrap().as_deref(),
        Some("refresh")
    );
    assert_eq!(updated.token_expires_at, None);
}

#[tokio::test]
async fn plaintext_tokens_never_reach_the_table() {
    let db = setup_test_db_arc().await.unwrap();
    let repo = ConnectionRepository::new(db.clone(), test_vault());
    repo.create(new_connection("u1", CalendarProvider::Google))
        .await
        .unwrap();

    let rows = CalendarConnection::find().all(&*db).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_ne!(rows[0].access_token_encrypted, "access");
    assert_eq!(rows[0].access_token_encrypted.split(':').count(), 3);
}

#[tokio::test]
async fn deletes_are_scoped() {
    let repo = repository().await;
    repo.create(new_connection("u1", CalendarProvider::Google))
        .await
        .unwrap();
    repo.create(new_connection("u1", CalendarProvider::Microsoft))
        .await
        .unwrap();
    repo.create(new_connection("u2", CalendarProvider::Google))
        .await
        .unwrap();

    assert_eq!(
        repo.delete_by_user_and_provider("u1", CalendarProvider::Google)
            .await
            .unwrap(),
        1
    );
    assert_eq!(repo.delete_all_by_user("u1").await.unwrap(), 1);
    assert_eq!(repo.delete_all_by_user("u1").await.unwrap(), 0);
    assert_eq!(repo.find_all_by_user("u2").await.unwrap().len(), 1);
}

#[tokio::test]
async fn idempotency_mark_and_seen() {
    let guard = IdempotencyKeyRepository::new(setup_test_db_arc().await.unwrap(), Duration::hours(24));
    let key = event_key("u1", CalendarProvider::Google, "evt-1");
    assert_eq!(key, "calendar-event:u1:google:evt-1");

    assert!(!guard.seen(&key).await);
    guard.mark(&key, Some("u1"), "test").await;
    assert!(guard.seen(&key).await);

    // Duplicate marks are swallowed.
    guard.mark(&key, Some("u1"), "test").await;
    assert!(guard.seen(&key).await);
}

#[tokio::test]
async fn expired_keys_read_as_unseen_and_can_be_rearmed() {
    let db = setup_test_db_arc().await.unwrap();
    let stale = IdempotencyKeyRepository::new(db.clone(), Duration::hours(-1));
    let live = IdempotencyKeyRepository::new(db, Duration::hours(24));
    let key = event_key("u1", CalendarProvider::Microsoft, "evt-9");

    stale.mark(&key, None, "test").await;
    assert!(!stale.seen(&key).await);

    live.mark(&key, None, "test").await;
    assert!(live.seen(&key).await);
    assert_eq!(live.purge_expired(Utc::now()).await.unwrap(), 0);
}

#[tokio::test]
async fn purge_keeps_live_keys() {
    let db = setup_test_db_arc().await.unwrap();
    let live = IdempotencyKeyRepository::new(db.clone(), Duration::hours(24));
    let stale = IdempotencyKeyRepository::new(db, Duration::hours(-2));

    live.mark("calendar-event:u1:google:live", Some("u1"), "test").await;
    stale.mark("calendar-event:u1:google:stale", Some("u1"), "test").await;

    assert_eq!(live.purge_expired(Utc::now()).await.unwrap(), 1);
    assert!(live.seen("calendar-event:u1:google:live").await);
}
