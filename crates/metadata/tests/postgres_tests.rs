//! PostgreSQL integration tests using testcontainers.
//!
//! These tests require Docker to be running. Set SKIP_POSTGRES_TESTS=1 to skip.

mod common;

use common::postgres_or_skip;

#[tokio::test]
async fn test_postgres_claim_and_commit() {
    let Some(metadata) = postgres_or_skip().await else {
        return;
    };
    common::claim_and_commit(metadata.store.as_ref()).await;
}

#[tokio::test]
async fn test_postgres_rollback_discards_everything() {
    let Some(metadata) = postgres_or_skip().await else {
        return;
    };
    common::rollback_discards_everything(metadata.store.as_ref()).await;
}

#[tokio::test]
async fn test_postgres_list_ignores_uncommitted() {
    let Some(metadata) = postgres_or_skip().await else {
        return;
    };
    common::list_ignores_uncommitted(metadata.store.as_ref()).await;
}

#[tokio::test]
async fn test_postgres_model_details_round_trip() {
    let Some(metadata) = postgres_or_skip().await else {
        return;
    };
    common::model_details_round_trip(metadata.store.as_ref()).await;
}

#[tokio::test]
async fn test_postgres_unknown_parent_is_rejected() {
    let Some(metadata) = postgres_or_skip().await else {
        return;
    };
    common::unknown_parent_is_rejected(metadata.store.as_ref()).await;
}

#[tokio::test]
async fn test_postgres_missing_upload_is_not_found() {
    let Some(metadata) = postgres_or_skip().await else {
        return;
    };
    common::missing_upload_is_not_found(metadata.store.as_ref()).await;
}
