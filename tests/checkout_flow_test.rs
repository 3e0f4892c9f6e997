mod common;

use std::sync::atomic::Ordering;

use assert_matches::assert_matches;
use axum::http::StatusCode;
use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use uuid::Uuid;

use common::{item, CheckoutFixture, StubGateway, APP_BASE_URL, SHARE_TOKEN};
use photo_checkout::{
    config::CheckoutConfig,
    entities::OrderStatus,
    services::{
        catalog::CatalogPriceItem,
        checkout::{CheckoutRepository, PaymentRedirect},
    },
};

#[tokio::test]
async fn checkout_charges_catalog_price_and_issues_preference() {
    let fixture = CheckoutFixture::new(StubGateway::succeeding());
    let photo = fixture.photo_ids[0];

    let response = fixture
        .orchestrator()
        .process_checkout(fixture.request(vec![item(photo, Some("base"), 2)]))
        .await
        .expect("checkout should succeed");

    assert_eq!(response.total_cents, 2000);
    assert_eq!(response.currency, "ARS");
    assert_matches!(
        &response.payment,
        PaymentRedirect::Preference { preference_id, .. } if preference_id == "pref-123"
    );

    let order = fixture.repository.only_order();
    assert_eq!(order.id, response.order_id);
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.total_cents, 2000);
    assert_eq!(order.preference_id.as_deref(), Some("pref-123"));
    assert_eq!(order.external_reference, Some(order.id.to_string()));
    assert!(order.order_number.starts_with("ORD-"));
    assert_eq!(order.metadata["token"], SHARE_TOKEN);
    assert_eq!(order.metadata["items"][0]["unitPriceCents"], 1000);

    let items = fixture.repository.find_order_items(order.id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].unit_price_cents, 1000);
    assert_eq!(items[0].subtotal_cents, 2000);
    assert_eq!(items[0].price_list_item_id, fixture.base_item_id);
    assert_eq!(fixture.repository.folder_touches.load(Ordering::SeqCst), 1);

    let sent = fixture.gateway.last_request();
    assert_eq!(sent.options.external_reference, order.id.to_string());
    assert_eq!(sent.items[0].unit_price_cents, 1000);
    assert_eq!(sent.items[0].quantity, 2);
    assert_eq!(sent.items[0].title, "Foto 13x18 - IMG_0001.jpg");
    assert_eq!(
        sent.options.back_urls.success,
        format!("{}/f/{}/payment/success", APP_BASE_URL, SHARE_TOKEN)
    );
    assert_eq!(sent.options.metadata["contactEmail"], "laura@example.com");
    assert!(sent.options.expires_at > Utc::now() + Duration::hours(23));
}

#[tokio::test]
async fn total_is_sum_of_catalog_subtotals() {
    let fixture = CheckoutFixture::new(StubGateway::succeeding());
    let premium_id = Uuid::new_v4();
    fixture.set_catalog(vec![
        CatalogPriceItem {
            id: fixture.base_item_id,
            item_type: "base".into(),
            label: "Foto 13x18".into(),
            price_cents: 1000,
        },
        CatalogPriceItem {
            id: premium_id,
            item_type: "premium".into(),
            label: "Foto 20x30".into(),
            price_cents: 2550,
        },
    ]);

    let mut by_id = item(fixture.photo_ids[1], None, 3);
    by_id.price_list_item_id = Some(premium_id);
    let request = fixture.request(vec![
        item(fixture.photo_ids[0], Some("base"), 1),
        by_id,
        item(fixture.photo_ids[0], Some("premium"), 1),
    ]);

    let response = fixture.orchestrator().process_checkout(request).await.unwrap();

    assert_eq!(response.total_cents, 1000 + 3 * 2550 + 2550);
    let items = fixture
        .repository
        .find_order_items(response.order_id)
        .await
        .unwrap();
    assert_eq!(
        items.iter().map(|i| i.subtotal_cents).sum::<i64>(),
        response.total_cents
    );
}

#[tokio::test]
async fn tampered_price_is_rejected_without_creating_an_order() {
    let fixture = CheckoutFixture::new(StubGateway::succeeding());
    let mut tampered = item(fixture.photo_ids[0], Some("base"), 2);
    tampered.price = Some(dec!(5));

    let err = fixture
        .orchestrator()
        .process_checkout(fixture.request(vec![tampered]))
        .await
        .unwrap_err();

    assert_eq!(err.status, StatusCode::BAD_REQUEST);
    assert_eq!(err.message, "Submitted prices do not match the official price list");
    assert_eq!(fixture.repository.order_count(), 0);
    assert!(fixture.gateway.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn legacy_price_units_follow_configuration() {
    let fixture = CheckoutFixture::new(StubGateway::succeeding());
    let mut legacy = item(fixture.photo_ids[0], Some("base"), 2);
    legacy.price = Some(dec!(10));

    let response = fixture
        .orchestrator()
        .process_checkout(fixture.request(vec![legacy.clone()]))
        .await
        .unwrap();
    assert_eq!(response.total_cents, 2000);

    let strict = fixture.orchestrator_with(CheckoutConfig {
        accept_legacy_price_units: false,
        ..CheckoutConfig::default()
    });
    let err = strict
        .process_checkout(fixture.request(vec![legacy]))
        .await
        .unwrap_err();
    assert_eq!(err.status, StatusCode::BAD_REQUEST);

    let mut exact = item(fixture.photo_ids[0], Some("base"), 1);
    exact.price = Some(dec!(1000));
    assert!(strict.process_checkout(fixture.request(vec![exact])).await.is_ok());
}

#[tokio::test]
async fn failed_item_insert_deletes_the_order() {
    let fixture = CheckoutFixture::new(StubGateway::succeeding());
    fixture
        .repository
        .fail_item_inserts
        .store(true, Ordering::SeqCst);

    let err = fixture
        .orchestrator()
        .process_checkout(fixture.request(vec![item(fixture.photo_ids[0], None, 1)]))
        .await
        .unwrap_err();

    assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(err.details.as_ref().unwrap()["message"].is_string());

    let deleted = fixture.repository.deleted_orders.lock().unwrap().clone();
    assert_eq!(deleted.len(), 1);
    assert!(fixture.repository.find_order(deleted[0]).await.unwrap().is_none());
    assert_eq!(fixture.repository.order_count(), 0);
    assert!(fixture.gateway.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn gateway_failure_returns_fallback_with_order_id() {
    let fixture = CheckoutFixture::new(StubGateway::failing());

    let response = fixture
        .orchestrator()
        .process_checkout(fixture.request(vec![item(fixture.photo_ids[0], None, 2)]))
        .await
        .expect("gateway failure must not fail checkout");

    assert!(response.is_fallback());
    let url = response.fallback_redirect_url().unwrap();
    assert!(url.contains(&response.order_id.to_string()));
    assert_eq!(
        url,
        format!(
            "{}/checkout/pending?order_id={}&token={}",
            APP_BASE_URL, response.order_id, SHARE_TOKEN
        )
    );

    let order = fixture
        .repository
        .find_order(response.order_id)
        .await
        .unwrap()
        .expect("order must survive gateway failure");
    assert_eq!(order.status, OrderStatus::Pending);
    assert!(order.preference_id.is_none());
}

#[tokio::test]
async fn empty_cart_is_rejected() {
    let fixture = CheckoutFixture::new(StubGateway::succeeding());
    let err = fixture
        .orchestrator()
        .process_checkout(fixture.request(vec![]))
        .await
        .unwrap_err();
    assert_eq!(err.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_or_unpublished_folder_is_not_found() {
    let fixture = CheckoutFixture::new(StubGateway::succeeding());
    let mut request = fixture.request(vec![item(fixture.photo_ids[0], None, 1)]);
    request.token = "UnknownTokenABCDEFGHJK".into();
    let err = fixture
        .orchestrator()
        .process_checkout(request)
        .await
        .unwrap_err();
    assert_eq!(err.status, StatusCode::NOT_FOUND);

    fixture.repository.folders.lock().unwrap()[0].is_published = false;
    let err = fixture
        .orchestrator()
        .process_checkout(fixture.request(vec![item(fixture.photo_ids[0], None, 1)]))
        .await
        .unwrap_err();
    assert_eq!(err.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_event_is_not_found() {
    let fixture = CheckoutFixture::new(StubGateway::succeeding());
    fixture.repository.events.lock().unwrap().clear();
    let err = fixture
        .orchestrator()
        .process_checkout(fixture.request(vec![item(fixture.photo_ids[0], None, 1)]))
        .await
        .unwrap_err();
    assert_eq!(err.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_photos_are_reported() {
    let fixture = CheckoutFixture::new(StubGateway::succeeding());
    let ghost = Uuid::new_v4();
    let err = fixture
        .orchestrator()
        .process_checkout(fixture.request(vec![
            item(fixture.photo_ids[0], None, 1),
            item(ghost, None, 1),
            item(ghost, None, 2),
        ]))
        .await
        .unwrap_err();

    assert_eq!(err.status, StatusCode::BAD_REQUEST);
    assert_eq!(err.message, "Selected photos do not exist");
    let missing = err.details.unwrap()["missingPhotoIds"].clone();
    assert_eq!(missing, serde_json::json!([ghost]));
    assert_eq!(fixture.repository.order_count(), 0);
}

#[tokio::test]
async fn event_without_pricing_is_rejected() {
    let fixture = CheckoutFixture::new(StubGateway::succeeding());
    fixture.set_catalog(vec![]);
    let err = fixture
        .orchestrator()
        .process_checkout(fixture.request(vec![item(fixture.photo_ids[0], None, 1)]))
        .await
        .unwrap_err();
    assert_eq!(err.status, StatusCode::BAD_REQUEST);
    assert_eq!(err.message, "No pricing configured for this event");
}

#[tokio::test]
async fn invalid_contact_email_is_rejected() {
    let fixture = CheckoutFixture::new(StubGateway::succeeding());
    let mut request = fixture.request(vec![item(fixture.photo_ids[0], None, 1)]);
    request.contact_info.email = "laura-at-example".into();
    let err = fixture
        .orchestrator()
        .process_checkout(request)
        .await
        .unwrap_err();
    assert_eq!(err.status, StatusCode::BAD_REQUEST);
    assert_eq!(fixture.repository.order_count(), 0);
}

#[tokio::test]
async fn abandoned_pending_orders_are_cancelled() {
    let fixture = CheckoutFixture::new(StubGateway::failing());
    let orchestrator = fixture.orchestrator();

    let stale = orchestrator
        .process_checkout(fixture.request(vec![item(fixture.photo_ids[0], None, 1)]))
        .await
        .unwrap();
    let fresh = orchestrator
        .process_checkout(fixture.request(vec![item(fixture.photo_ids[1], None, 1)]))
        .await
        .unwrap();
    fixture
        .repository
        .backdate_order(stale.order_id, Utc::now() - Duration::hours(72));

    assert_eq!(orchestrator.cancel_abandoned_orders().await.unwrap(), 1);

    let stale = fixture.repository.find_order(stale.order_id).await.unwrap().unwrap();
    let fresh = fixture.repository.find_order(fresh.order_id).await.unwrap().unwrap();
    assert_eq!(stale.status, OrderStatus::Cancelled);
    assert_eq!(fresh.status, OrderStatus::Pending);
}

#[tokio::test]
async fn folder_touch_failure_is_not_surfaced() {
    let fixture = CheckoutFixture::new(StubGateway::succeeding());
    fixture
        .repository
        .fail_folder_touch
        .store(true, Ordering::SeqCst);

    let response = fixture
        .orchestrator()
        .process_checkout(fixture.request(vec![item(fixture.photo_ids[0], None, 1)]))
        .await
        .expect("folder activity is best effort");

    assert_eq!(response.preference_id(), Some("pref-123"));
    assert_eq!(fixture.repository.folder_touches.load(Ordering::SeqCst), 0);
    assert_eq!(fixture.repository.order_count(), 1);
}

#[tokio::test]
async fn transient_attach_failures_are_retried() {
    let fixture = CheckoutFixture::new(StubGateway::succeeding());
    fixture
        .repository
        .attach_failures
        .store(2, Ordering::SeqCst);

    let response = fixture
        .orchestrator()
        .process_checkout(fixture.request(vec![item(fixture.photo_ids[0], None, 1)]))
        .await
        .unwrap();

    assert_eq!(response.preference_id(), Some("pref-123"));
    assert_eq!(fixture.repository.attach_attempts.load(Ordering::SeqCst), 3);
    let order = fixture.repository.only_order();
    assert_eq!(order.preference_id.as_deref(), Some("pref-123"));
}

#[tokio::test]
async fn unrecorded_preference_is_never_handed_out() {
    let fixture = CheckoutFixture::new(StubGateway::succeeding());
    fixture
        .repository
        .attach_failures
        .store(usize::MAX, Ordering::SeqCst);
    let orchestrator = fixture.orchestrator();

    let response = orchestrator
        .process_checkout(fixture.request(vec![item(fixture.photo_ids[0], None, 1)]))
        .await
        .expect("attach failure must not fail checkout");

    assert!(response.is_fallback());
    assert!(response.preference_id().is_none());
    assert_eq!(fixture.gateway.requests.lock().unwrap().len(), 1);

    // Only orders whose family never received a payment link get swept.
    fixture
        .repository
        .backdate_order(response.order_id, Utc::now() - Duration::hours(72));
    assert_eq!(orchestrator.cancel_abandoned_orders().await.unwrap(), 1);
}
