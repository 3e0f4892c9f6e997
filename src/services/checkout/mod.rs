/*!
 * # Checkout Orchestrator
 *
 * Turns a share token, contact details and a cart into a persisted,
 * catalog-priced order, then asks the payment gateway for a hosted checkout
 * preference.
 *
 * ## Flow
 *
 * 1. Reject empty carts and malformed contact details
 * 2. Resolve the published folder behind the token, then its event
 * 3. Verify every referenced photo exists
 * 4. Price each line from the event catalog (client prices are only checked)
 * 5. Persist the order and its items together
 * 6. Touch the folder (best effort)
 * 7. Create the payment preference and record it on the order, or fall back
 *    to a local pending link
 *
 * A gateway failure never fails the checkout: the order is already placed
 * and the family is sent to the fallback link instead.
 */

pub mod models;
pub mod pricing;
pub mod repository;

use chrono::{DateTime, Utc};
use metrics::counter;
use rand::{rngs::OsRng, Rng};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::config::CheckoutConfig;
use crate::entities::{event, folder, order, order_item, OrderStatus};
use crate::errors::{CheckoutError, ServiceError};
use crate::services::catalog::CatalogResolver;
use crate::services::payment_gateway::{
    BackUrls, Payer, PayerAddress, PaymentGateway, PreferenceItem, PreferenceOptions,
    PreferenceRequest,
};
use crate::services::tokens::{mask_token, SAFE_ALPHABET};

pub use models::{
    CheckoutItemRequest, CheckoutRequest, CheckoutResponse, ContactInfo, PaymentRedirect,
};
pub use pricing::{PriceMatch, PricedItem};
pub use repository::{CheckoutRepository, SeaOrmCheckoutRepository};

pub const PAYMENT_METHOD: &str = "mercadopago";
const ORDER_SUFFIX_LEN: usize = 6;
const ATTACH_ATTEMPTS: u32 = 3;
const ATTACH_RETRY_DELAY: Duration = Duration::from_millis(50);

/// `ORD-{YYYYMMDDHHMMSS}-{6 random safe characters}`
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let mut rng = OsRng;
    let suffix: String = (0..ORDER_SUFFIX_LEN)
        .map(|_| SAFE_ALPHABET[rng.gen_range(0..SAFE_ALPHABET.len())] as char)
        .collect();
    format!("ORD-{}-{}", now.format("%Y%m%d%H%M%S"), suffix)
}

/// Drives a single checkout from cart to payment redirect.
pub struct CheckoutOrchestrator {
    repository: Arc<dyn CheckoutRepository>,
    catalog: Arc<dyn CatalogResolver>,
    gateway: Arc<dyn PaymentGateway>,
    config: CheckoutConfig,
    app_base_url: String,
}

impl CheckoutOrchestrator {
    pub fn new(
        repository: Arc<dyn CheckoutRepository>,
        catalog: Arc<dyn CatalogResolver>,
        gateway: Arc<dyn PaymentGateway>,
        config: CheckoutConfig,
        app_base_url: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            catalog,
            gateway,
            config,
            app_base_url: app_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    /// Degraded-mode link used when no payment preference could be created.
    pub fn fallback_redirect_url(&self, order_id: Uuid, token: &str) -> String {
        format!(
            "{}/checkout/pending?order_id={}&token={}",
            self.app_base_url,
            order_id,
            encode_component(token)
        )
    }

    pub fn back_urls(&self, token: &str) -> BackUrls {
        let base = format!("{}/f/{}/payment", self.app_base_url, encode_component(token));
        BackUrls {
            success: format!("{}/success", base),
            failure: format!("{}/failure", base),
            pending: format!("{}/pending", base),
        }
    }

    #[instrument(
        skip(self, request),
        fields(
            token = %mask_token(&request.token),
            request_id = request.request_id.as_deref().unwrap_or("-"),
            items = request.items.len()
        )
    )]
    pub async fn process_checkout(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutResponse, CheckoutError> {
        if request.items.is_empty() {
            return Err(CheckoutError::bad_request("No items selected"));
        }
        request.validate().map_err(|errors| {
            CheckoutError::bad_request("Invalid contact information")
                .with_details(json!({ "fields": errors.to_string() }))
        })?;

        let folder = self
            .repository
            .find_published_folder_by_token(&request.token)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Gallery not found or not published"))?;

        let event = self
            .repository
            .find_event(folder.event_id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Event not found"))?;

        let filenames = self.verify_photos(&request).await?;

        let catalog = self
            .catalog
            .get_catalog_for_event(event.id)
            .await?
            .filter(|catalog| !catalog.is_empty())
            .ok_or_else(|| {
                CheckoutError::bad_request("No pricing configured for this event")
                    .with_details(json!({ "eventId": event.id }))
            })?;

        let priced = pricing::price_items(
            &catalog,
            &request.items,
            self.config.accept_legacy_price_units,
        )?;

        let total_cents = pricing::total_cents(&priced)
            .filter(|total| *total > 0)
            .ok_or_else(|| CheckoutError::bad_request("Invalid computed total"))?;

        let now = Utc::now();
        let order = self.build_order(
            &request,
            &folder,
            &event,
            &priced,
            total_cents,
            &catalog.currency,
            now,
        )?;
        let items = build_order_items(order.id, &priced);

        let order = self
            .repository
            .persist_order(order, items)
            .await
            .map_err(|err| {
                error!(error = %err, "Failed to persist order");
                CheckoutError::internal("Could not create the order")
                    .with_details(json!({ "message": err.to_string() }))
            })?;

        counter!("checkout.orders.created", 1, "currency" => order.currency.clone());
        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total_cents,
            currency = %order.currency,
            "Order created"
        );

        if let Err(err) = self.repository.touch_folder(folder.id).await {
            warn!(folder_id = %folder.id, error = %err, "Could not update folder activity");
        }

        let preference_request =
            self.build_preference_request(&request, &order, &priced, &filenames, now);

        let payment = match self.gateway.create_preference(&preference_request).await {
            Ok(preference) => match self.attach_preference(order.id, &preference.id).await {
                Ok(()) => {
                    debug!(order_id = %order.id, preference_id = %preference.id, "Payment preference issued");
                    PaymentRedirect::Preference {
                        preference_id: preference.id,
                        init_point: preference.init_point,
                        sandbox_init_point: preference.sandbox_init_point,
                    }
                }
                // An unrecorded preference would look abandoned to the pending-order sweep.
                Err(err) => {
                    counter!("checkout.payment.fallback", 1, "cause" => "attach");
                    error!(
                        order_id = %order.id,
                        preference_id = %preference.id,
                        error = %err,
                        "Could not attach payment preference to order; returning fallback redirect"
                    );
                    PaymentRedirect::Fallback {
                        fallback_redirect_url: self.fallback_redirect_url(order.id, &request.token),
                    }
                }
            },
            Err(err) => {
                counter!("checkout.payment.fallback", 1, "cause" => "gateway");
                warn!(
                    order_id = %order.id,
                    error = %err,
                    "Payment gateway unavailable; returning fallback redirect"
                );
                PaymentRedirect::Fallback {
                    fallback_redirect_url: self.fallback_redirect_url(order.id, &request.token),
                }
            }
        };

        Ok(CheckoutResponse {
            order_id: order.id,
            total_cents: order.total_cents,
            currency: order.currency,
            payment,
        })
    }

    /// Stores the preference on the order, retrying a bounded number of times.
    async fn attach_preference(
        &self,
        order_id: Uuid,
        preference_id: &str,
    ) -> Result<(), ServiceError> {
        let external_reference = order_id.to_string();
        let mut attempt = 1;
        loop {
            match self
                .repository
                .attach_preference(order_id, preference_id, &external_reference)
                .await
            {
                Ok(()) => return Ok(()),
                Err(err) if attempt < ATTACH_ATTEMPTS => {
                    warn!(%order_id, attempt, error = %err, "Retrying payment preference attach");
                    tokio::time::sleep(ATTACH_RETRY_DELAY * attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Returns photo id -> original filename for every requested photo.
    async fn verify_photos(
        &self,
        request: &CheckoutRequest,
    ) -> Result<HashMap<Uuid, String>, CheckoutError> {
        let mut seen = HashSet::new();
        let requested: Vec<Uuid> = request
            .items
            .iter()
            .map(|item| item.photo_id)
            .filter(|id| seen.insert(*id))
            .collect();

        let found: HashMap<Uuid, String> = self
            .repository
            .find_photos(&requested)
            .await?
            .into_iter()
            .map(|photo| (photo.id, photo.original_filename))
            .collect();

        let missing: Vec<Uuid> = requested
            .into_iter()
            .filter(|id| !found.contains_key(id))
            .collect();
        if !missing.is_empty() {
            return Err(CheckoutError::bad_request("Selected photos do not exist")
                .with_details(json!({ "missingPhotoIds": missing })));
        }

        Ok(found)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_order(
        &self,
        request: &CheckoutRequest,
        folder: &folder::Model,
        event: &event::Model,
        priced: &[PricedItem],
        total_cents: i64,
        currency: &str,
        now: DateTime<Utc>,
    ) -> Result<order::Model, CheckoutError> {
        let contact_info =
            serde_json::to_value(&request.contact_info).map_err(ServiceError::from)?;
        let metadata = json!({
            "token": request.token,
            "requestId": request.request_id,
            "eventName": event.name,
            "folderName": folder.name,
            "shippingAddress": {
                "street": request.contact_info.street,
                "city": request.contact_info.city,
                "state": request.contact_info.state,
                "zipCode": request.contact_info.zip_code,
            },
            "items": priced
                .iter()
                .map(|item| json!({
                    "photoId": item.photo_id,
                    "quantity": item.quantity,
                    "unitPriceCents": item.unit_price_cents,
                    "subtotalCents": item.subtotal_cents,
                    "priceListItemId": item.price_list_item_id,
                    "priceType": item.item_type,
                    "label": item.label,
                }))
                .collect::<Vec<_>>(),
        });

        Ok(order::Model {
            id: Uuid::new_v4(),
            order_number: generate_order_number(now),
            folder_id: folder.id,
            event_id: event.id,
            contact_info,
            total_cents,
            currency: currency.to_string(),
            status: OrderStatus::Pending,
            payment_method: PAYMENT_METHOD.to_string(),
            preference_id: None,
            external_reference: None,
            metadata,
            created_at: now,
            updated_at: now,
        })
    }

    fn build_preference_request(
        &self,
        request: &CheckoutRequest,
        order: &order::Model,
        priced: &[PricedItem],
        filenames: &HashMap<Uuid, String>,
        now: DateTime<Utc>,
    ) -> PreferenceRequest {
        let contact = &request.contact_info;
        let items = priced
            .iter()
            .map(|item| {
                let filename = filenames
                    .get(&item.photo_id)
                    .map(String::as_str)
                    .unwrap_or("photo");
                PreferenceItem {
                    id: item.price_list_item_id.to_string(),
                    title: format!("{} - {}", item.label, filename),
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price_cents,
                    description: Some(format!("Order {}", order.order_number)),
                    category_id: Some("photography".to_string()),
                }
            })
            .collect();

        PreferenceRequest {
            items,
            payer: Payer {
                name: contact.name.clone(),
                email: contact.email.clone(),
                phone: contact.phone.clone(),
                address: PayerAddress {
                    street: contact.street.clone(),
                    city: contact.city.clone(),
                    state: contact.state.clone(),
                    zip_code: contact.zip_code.clone(),
                },
            },
            options: PreferenceOptions {
                external_reference: order.id.to_string(),
                back_urls: self.back_urls(&request.token),
                metadata: json!({
                    "token": request.token,
                    "orderNumber": order.order_number,
                    "contactEmail": contact.email,
                    "shippingAddress": contact.formatted_address(),
                }),
                expires_at: now + chrono::Duration::hours(self.config.preference_expiry_hours),
            },
            currency: order.currency.clone(),
        }
    }

    /// Cancels pending orders that never got a payment preference and are
    /// older than the configured TTL.
    #[instrument(skip(self))]
    pub async fn cancel_abandoned_orders(&self) -> Result<u64, ServiceError> {
        let cutoff = Utc::now() - chrono::Duration::hours(self.config.pending_order_ttl_hours);
        let cancelled = self.repository.cancel_stale_pending_orders(cutoff).await?;
        if cancelled > 0 {
            info!(cancelled, %cutoff, "Cancelled abandoned pending orders");
        }
        Ok(cancelled)
    }
}

fn build_order_items(order_id: Uuid, priced: &[PricedItem]) -> Vec<order_item::Model> {
    priced
        .iter()
        .map(|item| order_item::Model {
            id: Uuid::new_v4(),
            order_id,
            photo_id: item.photo_id,
            quantity: item.quantity,
            unit_price_cents: item.unit_price_cents,
            subtotal_cents: item.subtotal_cents,
            price_list_item_id: item.price_list_item_id,
        })
        .collect()
}

fn encode_component(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Runs [`CheckoutOrchestrator::cancel_abandoned_orders`] every `interval`.
pub fn spawn_pending_order_sweeper(
    orchestrator: Arc<CheckoutOrchestrator>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            if let Err(err) = orchestrator.cancel_abandoned_orders().await {
                error!(error = %err, "Pending order sweep failed");
            }
        }
    })
}
