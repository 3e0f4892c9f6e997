//! Photo Checkout Library
//!
//! Token-gated checkout for school photography galleries: access token
//! security plus price-checked order creation with payment preference
//! issuance.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod services;
pub mod telemetry;

use anyhow::Context;
use axum::{routing::get, Router};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
};
use tracing::info;

use crate::config::AppConfig;
use crate::services::{
    catalog::DbCatalogResolver,
    checkout::{CheckoutOrchestrator, SeaOrmCheckoutRepository},
    payment_gateway::MercadoPagoGateway,
    security_store::{InMemorySecurityStore, RedisSecurityStore, SecurityStore},
    tokens::{SeaOrmSubjectRepository, TokenAuthority},
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state handed to every handler
pub struct AppState {
    pub config: AppConfig,
    pub db: Arc<DatabaseConnection>,
    pub tokens: Arc<TokenAuthority>,
    pub checkout: Arc<CheckoutOrchestrator>,
}

impl AppState {
    /// Wires the production services from configuration and an open pool.
    pub fn from_config(config: AppConfig, db: Arc<DatabaseConnection>) -> anyhow::Result<Self> {
        let store: Arc<dyn SecurityStore> = if config.tokens.use_redis {
            let client = redis::Client::open(config.redis_url.clone())
                .context("invalid redis_url for the token security store")?;
            info!("Token security state shared through Redis");
            Arc::new(RedisSecurityStore::new(Arc::new(client)))
        } else {
            info!("Token security state kept in process memory");
            Arc::new(InMemorySecurityStore::new())
        };

        let tokens = Arc::new(TokenAuthority::new(
            config.tokens.clone(),
            Arc::new(SeaOrmSubjectRepository::new(db.clone())),
            store,
        ));

        let gateway = MercadoPagoGateway::new(&config.payment)
            .context("failed to build payment gateway client")?;
        let checkout = Arc::new(CheckoutOrchestrator::new(
            Arc::new(SeaOrmCheckoutRepository::new(db.clone())),
            Arc::new(DbCatalogResolver::new(
                db.clone(),
                config.checkout.default_currency.clone(),
            )),
            Arc::new(gateway),
            config.checkout.clone(),
            config.app_base_url.clone(),
        ));

        Ok(Self {
            config,
            db,
            tokens,
            checkout,
        })
    }
}

/// Full application router with request ids, tracing and timeouts.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1", handlers::api_v1_routes())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(telemetry::configure_http_tracing())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}
