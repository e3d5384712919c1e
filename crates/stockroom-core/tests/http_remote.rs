//! `HttpRemoteStore` against a mock API server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use mockito::{Matcher, Server, ServerGuard};
use pretty_assertions::assert_eq;
use serde_json::json;
use stockroom_core::config::SyncSettings;
use stockroom_core::models::{NewProduct, Product};
use stockroom_core::queue::MemoryQueueStore;
use stockroom_core::remote::{ChangeEvent, ChangeFeed, HttpRemoteStore, RemoteStore};
use stockroom_core::sync::{Notification, NotificationKind};
use stockroom_core::{Error, ProductInput, SyncEngine};

const POLL: Duration = Duration::from_millis(50);
const WAIT: Duration = Duration::from_secs(5);

fn store(server: &ServerGuard) -> HttpRemoteStore {
    HttpRemoteStore::new(server.url(), Some("secret".to_string()), POLL).unwrap()
}

fn new_product(name: &str) -> NewProduct {
    NewProduct {
        name: name.to_string(),
        company: None,
        company_id: None,
        cost_price: 10.0,
        selling_price: 15.0,
        max_discount: 0.0,
        image_url: None,
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        client_ref: Some("local-1714557600000-0a1b2c3d".to_string()),
    }
}

fn record(id: &str, name: &str) -> Product {
    let mut product = new_product(name).into_product(id);
    product.client_ref = None;
    product
}

fn records_body(records: &[Product]) -> String {
    json!({ "records": records }).to_string()
}

#[tokio::test(flavor = "multi_thread")]
async fn create_record_posts_with_bearer_token() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/products")
        .match_header("authorization", "Bearer secret")
        .match_body(Matcher::PartialJson(json!({
            "name": "Mug",
            "client_ref": "local-1714557600000-0a1b2c3d",
        })))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"srv-1"}"#)
        .create_async()
        .await;

    let id = store(&server).create_record(new_product("Mug")).await.unwrap();

    assert_eq!(id, "srv-1");
    mock.assert_async().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn create_failure_is_a_submit_error() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/v1/products")
        .with_status(500)
        .with_body(r#"{"message":"database unavailable"}"#)
        .create_async()
        .await;

    let error = store(&server)
        .create_record(new_product("Mug"))
        .await
        .unwrap_err();

    match error {
        Error::Submit(message) => assert_eq!(message, "database unavailable (HTTP 500)"),
        other => panic!("expected submit error, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_maps_per_item_results() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/v1/products:batch")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"results":[{"id":"srv-1"},{"error":"duplicate name"}]}"#)
        .create_async()
        .await;

    let results = store(&server)
        .create_records_batch(vec![new_product("Mug"), new_product("Plate")])
        .await
        .unwrap();

    assert_eq!(
        results,
        vec![Ok("srv-1".to_string()), Err("duplicate name".to_string())]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_rejection_is_a_commit_error() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/v1/products:batch")
        .with_status(503)
        .with_body("maintenance")
        .create_async()
        .await;

    let error = store(&server)
        .create_records_batch(vec![new_product("Mug")])
        .await
        .unwrap_err();

    assert!(matches!(error, Error::Commit(ref message) if message == "maintenance (HTTP 503)"));
}

#[tokio::test(flavor = "multi_thread")]
async fn short_batch_response_is_a_commit_error() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/v1/products:batch")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"results":[{"id":"srv-1"}]}"#)
        .create_async()
        .await;

    let error = store(&server)
        .create_records_batch(vec![new_product("Mug"), new_product("Plate")])
        .await
        .unwrap_err();

    assert!(matches!(error, Error::Commit(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_follows_presigned_operation() {
    let mut server = Server::new_async().await;
    let blob_url = format!("{}/blobs/mug.png", server.url());
    let presign = server
        .mock("POST", "/v1/media/presign/upload")
        .match_body(Matcher::PartialJson(json!({ "content_type": "image/png" })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "operation": {
                    "method": "PUT",
                    "url": blob_url,
                    "headers": [["content-type", "image/png"], ["host", "storage.invalid"]],
                },
                "public_url": "https://cdn.example.com/mug.png",
            })
            .to_string(),
        )
        .create_async()
        .await;
    let put = server
        .mock("PUT", "/blobs/mug.png")
        .match_header("content-type", "image/png")
        .match_body("png-bytes")
        .with_status(200)
        .create_async()
        .await;

    let url = store(&server)
        .upload_blob(b"png-bytes".to_vec(), "mug.png", Some("image/png"))
        .await
        .unwrap();

    assert_eq!(url, "https://cdn.example.com/mug.png");
    presign.assert_async().await;
    put.assert_async().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_blob_write_is_an_upload_error() {
    let mut server = Server::new_async().await;
    let blob_url = format!("{}/blobs/mug.png", server.url());
    server
        .mock("POST", "/v1/media/presign/upload")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "operation": {
                    "method": "PUT",
                    "url": blob_url,
                    "headers": [],
                },
                "public_url": "https://cdn.example.com/mug.png",
            })
            .to_string(),
        )
        .create_async()
        .await;
    server
        .mock("PUT", "/blobs/mug.png")
        .with_status(403)
        .with_body("signature expired")
        .create_async()
        .await;

    let error = store(&server)
        .upload_blob(b"png-bytes".to_vec(), "mug.png", None)
        .await
        .unwrap_err();

    assert!(matches!(error, Error::Upload(ref message) if message.contains("signature expired")));
}

#[tokio::test(flavor = "multi_thread")]
async fn lookup_is_created_when_absent() {
    let mut server = Server::new_async().await;
    let find = server
        .mock("GET", "/v1/lookups/companies")
        .match_query(Matcher::UrlEncoded("key".into(), "acme corp".into()))
        .with_status(404)
        .create_async()
        .await;
    let create = server
        .mock("POST", "/v1/lookups/companies")
        .match_body(Matcher::Json(json!({ "name": "Acme  Corp", "key": "acme corp" })))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"co-1"}"#)
        .create_async()
        .await;

    let id = store(&server)
        .find_or_create_lookup("  Acme  Corp ")
        .await
        .unwrap();

    assert_eq!(id, "co-1");
    find.assert_async().await;
    create.assert_async().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn existing_lookup_is_reused() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/v1/lookups/companies")
        .match_query(Matcher::UrlEncoded("key".into(), "acme".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"co-9"}"#)
        .create_async()
        .await;
    let create = server
        .mock("POST", "/v1/lookups/companies")
        .expect(0)
        .create_async()
        .await;

    let id = store(&server).find_or_create_lookup("ACME").await.unwrap();

    assert_eq!(id, "co-9");
    create.assert_async().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn lookup_failure_is_a_lookup_error() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/v1/lookups/companies")
        .match_query(Matcher::Any)
        .with_status(500)
        .create_async()
        .await;

    let error = store(&server)
        .find_or_create_lookup("Acme")
        .await
        .unwrap_err();

    assert!(matches!(error, Error::LookupResolution(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn poll_feed_emits_snapshot_changes_then_drops() {
    let mut server = Server::new_async().await;
    let phase = Arc::new(AtomicUsize::new(0));
    let listing = phase.clone();
    server
        .mock("GET", "/v1/products")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body_from_request(move |_| match listing.load(Ordering::SeqCst) {
            0 => records_body(&[record("srv-1", "Mug")]).into_bytes(),
            1 => records_body(&[record("srv-2", "Plate")]).into_bytes(),
            _ => b"<html>gateway</html>".to_vec(),
        })
        .create_async()
        .await;

    let mut feed = store(&server).subscribe_changes().await.unwrap();
    assert_eq!(
        feed.next().await,
        Some(ChangeFeed::Batch(vec![ChangeEvent::Added(record("srv-1", "Mug"))]))
    );

    phase.store(1, Ordering::SeqCst);
    let changes = tokio::time::timeout(WAIT, feed.next()).await.unwrap();
    assert_eq!(
        changes,
        Some(ChangeFeed::Batch(vec![
            ChangeEvent::Added(record("srv-2", "Plate")),
            ChangeEvent::Removed {
                id: "srv-1".to_string()
            },
        ]))
    );

    phase.store(2, Ordering::SeqCst);
    let dropped = tokio::time::timeout(WAIT, feed.next()).await.unwrap();
    assert!(
        matches!(dropped, Some(ChangeFeed::Dropped(ref reason)) if reason.contains("invalid list response"))
    );
    assert_eq!(tokio::time::timeout(WAIT, feed.next()).await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_initial_listing_is_a_stream_error() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/v1/products")
        .with_status(401)
        .with_body(r#"{"error":"bad token"}"#)
        .create_async()
        .await;

    let error = store(&server).subscribe_changes().await.err().unwrap();

    assert!(matches!(error, Error::Stream(ref message) if message == "bad token (HTTP 401)"));
}

async fn engine_for(server: &ServerGuard) -> SyncEngine {
    let dir = std::env::temp_dir().join("stockroom-http-tests");
    let settings = SyncSettings::default().with_staging_dir(dir);
    let remote: Arc<dyn RemoteStore> = Arc::new(store(server));
    SyncEngine::start(Arc::new(MemoryQueueStore::new()), Some(remote), settings)
        .await
        .unwrap()
}

async fn collect_kinds(
    notifications: &mut tokio::sync::broadcast::Receiver<Notification>,
    until: NotificationKind,
) -> Vec<NotificationKind> {
    let mut kinds = Vec::new();
    tokio::time::timeout(WAIT, async {
        loop {
            let kind = notifications.recv().await.unwrap().kind;
            kinds.push(kind);
            if kind == until {
                return;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {until:?} notification, saw {kinds:?}"));
    kinds
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_batch_keeps_entry_and_notifies_commit_failure() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/v1/products:batch")
        .with_status(500)
        .create_async()
        .await;
    let engine = engine_for(&server).await;
    let mut notifications = engine.subscribe_notifications();

    engine.add_product(ProductInput::new("Mug", 10.0, 15.0)).unwrap();
    engine.set_online(true);
    engine.sync_and_wait().await;

    let kinds = collect_kinds(&mut notifications, NotificationKind::CommitFailed).await;
    assert!(kinds.contains(&NotificationKind::CommitFailed));
    assert_eq!(engine.pending_count(), 1);
    assert!(engine.pending()[0].last_error.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_item_notifies_submit_failure() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/v1/products:batch")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"results":[{"error":"name taken"}]}"#)
        .create_async()
        .await;
    let engine = engine_for(&server).await;
    let mut notifications = engine.subscribe_notifications();

    engine.add_product(ProductInput::new("Mug", 10.0, 15.0)).unwrap();
    engine.set_online(true);
    engine.sync_and_wait().await;

    collect_kinds(&mut notifications, NotificationKind::SubmitFailed).await;
    assert_eq!(engine.pending_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn lookup_outage_still_syncs_the_product() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/v1/lookups/companies")
        .match_query(Matcher::Any)
        .with_status(503)
        .create_async()
        .await;
    let batch = server
        .mock("POST", "/v1/products:batch")
        .match_body(Matcher::Regex(r#""name":"Mug""#.to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"results":[{"id":"srv-1"}]}"#)
        .create_async()
        .await;
    let engine = engine_for(&server).await;
    let mut notifications = engine.subscribe_notifications();

    engine
        .add_product(ProductInput::new("Mug", 10.0, 15.0).with_company("Acme"))
        .unwrap();
    engine.set_online(true);
    engine.sync_and_wait().await;

    let kinds = collect_kinds(&mut notifications, NotificationKind::Synced).await;
    assert!(kinds.contains(&NotificationKind::LookupFailed));
    assert_eq!(engine.pending_count(), 0);
    batch.assert_async().await;
}
