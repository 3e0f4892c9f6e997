#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use photo_checkout::{
    config::{CheckoutConfig, TokenSecurityConfig},
    entities::{event, folder, order, order_item, photo, subject, OrderStatus},
    errors::ServiceError,
    services::{
        catalog::{Catalog, CatalogPriceItem, CatalogResolver},
        checkout::{
            CheckoutItemRequest, CheckoutOrchestrator, CheckoutRepository, CheckoutRequest,
            ContactInfo,
        },
        payment_gateway::{
            PaymentGateway, PaymentGatewayError, PaymentPreference, PreferenceRequest,
        },
        security_store::{InMemorySecurityStore, SecurityStore, SecurityStoreError},
        tokens::{SubjectTokenRepository, TokenAuthority},
    },
};

pub const APP_BASE_URL: &str = "https://fotos.example.com";
pub const SHARE_TOKEN: &str = "ShareTokenABCDEFGHJKLMN";

/// Checkout persistence held in memory. Uses the trait's compensating
/// `persist_order`, so item failures exercise the delete path.
#[derive(Default)]
pub struct InMemoryCheckoutRepository {
    pub folders: Mutex<Vec<folder::Model>>,
    pub events: Mutex<Vec<event::Model>>,
    pub photos: Mutex<Vec<photo::Model>>,
    pub orders: Mutex<HashMap<Uuid, order::Model>>,
    pub items: Mutex<Vec<order_item::Model>>,
    pub fail_item_inserts: AtomicBool,
    pub deleted_orders: Mutex<Vec<Uuid>>,
    pub folder_touches: AtomicUsize,
    pub fail_folder_touch: AtomicBool,
    /// How many upcoming `attach_preference` calls fail.
    pub attach_failures: AtomicUsize,
    pub attach_attempts: AtomicUsize,
}

impl InMemoryCheckoutRepository {
    pub fn order_count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    pub fn only_order(&self) -> order::Model {
        let orders = self.orders.lock().unwrap();
        assert_eq!(orders.len(), 1, "expected exactly one order");
        orders.values().next().cloned().unwrap()
    }

    pub fn backdate_order(&self, order_id: Uuid, created_at: DateTime<Utc>) {
        if let Some(order) = self.orders.lock().unwrap().get_mut(&order_id) {
            order.created_at = created_at;
        }
    }
}

#[async_trait]
impl CheckoutRepository for InMemoryCheckoutRepository {
    async fn find_published_folder_by_token(
        &self,
        token: &str,
    ) -> Result<Option<folder::Model>, ServiceError> {
        Ok(self
            .folders
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.share_token == token && f.is_published)
            .cloned())
    }

    async fn find_event(&self, event_id: Uuid) -> Result<Option<event::Model>, ServiceError> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == event_id)
            .cloned())
    }

    async fn find_photos(&self, photo_ids: &[Uuid]) -> Result<Vec<photo::Model>, ServiceError> {
        Ok(self
            .photos
            .lock()
            .unwrap()
            .iter()
            .filter(|p| photo_ids.contains(&p.id))
            .cloned()
            .collect())
    }

    async fn insert_order(&self, order: order::Model) -> Result<order::Model, ServiceError> {
        self.orders.lock().unwrap().insert(order.id, order.clone());
        Ok(order)
    }

    async fn insert_order_items(&self, items: Vec<order_item::Model>) -> Result<(), ServiceError> {
        if self.fail_item_inserts.load(Ordering::SeqCst) {
            return Err(ServiceError::InternalError("order_items insert failed".into()));
        }
        self.items.lock().unwrap().extend(items);
        Ok(())
    }

    async fn delete_order(&self, order_id: Uuid) -> Result<(), ServiceError> {
        self.items.lock().unwrap().retain(|i| i.order_id != order_id);
        self.orders.lock().unwrap().remove(&order_id);
        self.deleted_orders.lock().unwrap().push(order_id);
        Ok(())
    }

    async fn touch_folder(&self, _folder_id: Uuid) -> Result<(), ServiceError> {
        if self.fail_folder_touch.load(Ordering::SeqCst) {
            return Err(ServiceError::InternalError("folders update failed".into()));
        }
        self.folder_touches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn attach_preference(
        &self,
        order_id: Uuid,
        preference_id: &str,
        external_reference: &str,
    ) -> Result<(), ServiceError> {
        self.attach_attempts.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .attach_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if injected.is_ok() {
            return Err(ServiceError::InternalError("orders update failed".into()));
        }
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(&order_id)
            .ok_or_else(|| ServiceError::NotFound(order_id.to_string()))?;
        order.preference_id = Some(preference_id.to_string());
        order.external_reference = Some(external_reference.to_string());
        Ok(())
    }

    async fn find_order(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        Ok(self.orders.lock().unwrap().get(&order_id).cloned())
    }

    async fn find_order_items(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn cancel_stale_pending_orders(
        &self,
        before: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let mut cancelled = 0;
        for order in self.orders.lock().unwrap().values_mut() {
            if order.status == OrderStatus::Pending
                && order.preference_id.is_none()
                && order.created_at < before
            {
                order.status = OrderStatus::Cancelled;
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }
}

/// Catalogs keyed by event id
#[derive(Default)]
pub struct StaticCatalog {
    pub catalogs: Mutex<HashMap<Uuid, Catalog>>,
}

#[async_trait]
impl CatalogResolver for StaticCatalog {
    async fn get_catalog_for_event(&self, event_id: Uuid) -> Result<Option<Catalog>, ServiceError> {
        Ok(self.catalogs.lock().unwrap().get(&event_id).cloned())
    }
}

/// Gateway double that either issues a fixed preference or fails
pub struct StubGateway {
    pub fail: bool,
    pub requests: Mutex<Vec<PreferenceRequest>>,
}

impl StubGateway {
    pub fn succeeding() -> Self {
        Self {
            fail: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn last_request(&self) -> PreferenceRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_preference(
        &self,
        request: &PreferenceRequest,
    ) -> Result<PaymentPreference, PaymentGatewayError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(PaymentGatewayError::Timeout);
        }
        Ok(PaymentPreference {
            id: "pref-123".into(),
            init_point: "https://pay.example.com/init/pref-123".into(),
            sandbox_init_point: "https://sandbox.pay.example.com/init/pref-123".into(),
        })
    }
}

/// One published folder with photos, and a single-entry `base` catalog at 1000 cents.
pub struct CheckoutFixture {
    pub repository: Arc<InMemoryCheckoutRepository>,
    pub catalog: Arc<StaticCatalog>,
    pub gateway: Arc<StubGateway>,
    pub event_id: Uuid,
    pub folder_id: Uuid,
    pub photo_ids: Vec<Uuid>,
    pub base_item_id: Uuid,
}

impl CheckoutFixture {
    pub fn new(gateway: StubGateway) -> Self {
        let now = Utc::now();
        let event_id = Uuid::new_v4();
        let folder_id = Uuid::new_v4();
        let photo_ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let base_item_id = Uuid::new_v4();

        let repository = InMemoryCheckoutRepository::default();
        repository.events.lock().unwrap().push(event::Model {
            id: event_id,
            name: "Escuela 12 - Egresados".into(),
            currency: Some("ARS".into()),
            created_at: now,
        });
        repository.folders.lock().unwrap().push(folder::Model {
            id: folder_id,
            event_id,
            name: "Familia Pérez".into(),
            share_token: SHARE_TOKEN.into(),
            is_published: true,
            view_count: 0,
            last_viewed_at: None,
            created_at: now,
        });
        repository
            .photos
            .lock()
            .unwrap()
            .extend(photo_ids.iter().enumerate().map(|(i, id)| photo::Model {
                id: *id,
                folder_id,
                original_filename: format!("IMG_{:04}.jpg", i + 1),
                created_at: now,
            }));

        let catalog = StaticCatalog::default();
        catalog.catalogs.lock().unwrap().insert(
            event_id,
            Catalog {
                items: vec![CatalogPriceItem {
                    id: base_item_id,
                    item_type: "base".into(),
                    label: "Foto 13x18".into(),
                    price_cents: 1000,
                }],
                currency: "ARS".into(),
            },
        );

        Self {
            repository: Arc::new(repository),
            catalog: Arc::new(catalog),
            gateway: Arc::new(gateway),
            event_id,
            folder_id,
            photo_ids,
            base_item_id,
        }
    }

    pub fn set_catalog(&self, items: Vec<CatalogPriceItem>) {
        self.catalog.catalogs.lock().unwrap().insert(
            self.event_id,
            Catalog {
                items,
                currency: "ARS".into(),
            },
        );
    }

    pub fn orchestrator(&self) -> CheckoutOrchestrator {
        self.orchestrator_with(CheckoutConfig::default())
    }

    pub fn orchestrator_with(&self, config: CheckoutConfig) -> CheckoutOrchestrator {
        CheckoutOrchestrator::new(
            self.repository.clone(),
            self.catalog.clone(),
            self.gateway.clone(),
            config,
            APP_BASE_URL,
        )
    }

    pub fn request(&self, items: Vec<CheckoutItemRequest>) -> CheckoutRequest {
        CheckoutRequest {
            token: SHARE_TOKEN.into(),
            contact_info: contact(),
            items,
            request_id: Some("req-1".into()),
        }
    }
}

pub fn contact() -> ContactInfo {
    ContactInfo {
        name: "Laura Pérez".into(),
        email: "laura@example.com".into(),
        phone: "+54 341 555 0101".into(),
        street: "Córdoba 1234".into(),
        city: "Rosario".into(),
        state: "Santa Fe".into(),
        zip_code: "2000".into(),
    }
}

pub fn item(photo_id: Uuid, price_type: Option<&str>, quantity: i32) -> CheckoutItemRequest {
    CheckoutItemRequest {
        photo_id,
        quantity,
        price_list_item_id: None,
        price_type: price_type.map(str::to_string),
        price: None,
    }
}

/// Subject records held in memory; `fail` makes every call error out.
#[derive(Default)]
pub struct InMemorySubjectRepository {
    pub subjects: Mutex<Vec<subject::Model>>,
    pub fail: AtomicBool,
}

impl InMemorySubjectRepository {
    fn check(&self) -> Result<(), ServiceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::InternalError("subjects table unavailable".into()));
        }
        Ok(())
    }

    pub fn insert_raw(&self, token: &str, expires_at: DateTime<Utc>) -> Uuid {
        let now = Utc::now();
        let id = Uuid::new_v4();
        self.subjects.lock().unwrap().push(subject::Model {
            id,
            event_id: Uuid::new_v4(),
            name: "Sofía".into(),
            access_token: token.to_string(),
            token_expires_at: expires_at,
            created_at: now,
            updated_at: now,
        });
        id
    }
}

#[async_trait]
impl SubjectTokenRepository for InMemorySubjectRepository {
    async fn insert_subject(&self, subject: subject::Model) -> Result<subject::Model, ServiceError> {
        self.check()?;
        self.subjects.lock().unwrap().push(subject.clone());
        Ok(subject)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<subject::Model>, ServiceError> {
        self.check()?;
        Ok(self
            .subjects
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.access_token == token)
            .cloned())
    }

    async fn find_by_id(&self, subject_id: Uuid) -> Result<Option<subject::Model>, ServiceError> {
        self.check()?;
        Ok(self
            .subjects
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == subject_id)
            .cloned())
    }

    async fn replace_token(
        &self,
        subject_id: Uuid,
        new_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<subject::Model, ServiceError> {
        self.check()?;
        let mut subjects = self.subjects.lock().unwrap();
        let subject = subjects
            .iter_mut()
            .find(|s| s.id == subject_id)
            .ok_or_else(|| ServiceError::NotFound(subject_id.to_string()))?;
        subject.access_token = new_token.to_string();
        subject.token_expires_at = expires_at;
        subject.updated_at = Utc::now();
        Ok(subject.clone())
    }

    async fn list_expiring_between(
        &self,
        now: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> Result<Vec<subject::Model>, ServiceError> {
        self.check()?;
        Ok(self
            .subjects
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.token_expires_at > now && s.token_expires_at <= before)
            .cloned()
            .collect())
    }

    async fn count_all(&self) -> Result<u64, ServiceError> {
        self.check()?;
        Ok(self.subjects.lock().unwrap().len() as u64)
    }

    async fn count_active(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        self.check()?;
        Ok(self
            .subjects
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.token_expires_at > now)
            .count() as u64)
    }
}

/// Authority wired to in-memory repository and store.
pub struct TokenHarness {
    pub authority: TokenAuthority,
    pub repository: Arc<InMemorySubjectRepository>,
    pub store: Arc<InMemorySecurityStore>,
}

impl TokenHarness {
    pub fn new() -> Self {
        Self::with_config(TokenSecurityConfig::default())
    }

    pub fn with_config(config: TokenSecurityConfig) -> Self {
        let repository = Arc::new(InMemorySubjectRepository::default());
        let store = Arc::new(InMemorySecurityStore::new());
        let authority = TokenAuthority::new(config, repository.clone(), store.clone());
        Self {
            authority,
            repository,
            store,
        }
    }
}

/// In-memory store whose writes through `set` can be switched off.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemorySecurityStore,
    pub fail_sets: AtomicBool,
}

#[async_trait]
impl SecurityStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, SecurityStoreError> {
        self.inner.get(key).await
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), SecurityStoreError> {
        if self.fail_sets.load(Ordering::SeqCst) {
            return Err(redis::RedisError::from((redis::ErrorKind::IoError, "store unavailable")).into());
        }
        self.inner.set(key, value, ttl).await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, SecurityStoreError> {
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn increment(
        &self,
        key: &str,
        ttl_on_create: Option<Duration>,
    ) -> Result<i64, SecurityStoreError> {
        self.inner.increment(key, ttl_on_create).await
    }

    async fn expire_at(&self, key: &str, at: DateTime<Utc>) -> Result<bool, SecurityStoreError> {
        self.inner.expire_at(key, at).await
    }

    async fn delete(&self, key: &str) -> Result<(), SecurityStoreError> {
        self.inner.delete(key).await
    }

    async fn count_prefix(&self, prefix: &str) -> Result<u64, SecurityStoreError> {
        self.inner.count_prefix(prefix).await
    }

    async fn purge_expired(&self, prefix: &str) -> Result<u64, SecurityStoreError> {
        self.inner.purge_expired(prefix).await
    }
}
