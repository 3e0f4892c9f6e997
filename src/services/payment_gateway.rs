/*!
 * # Payment Gateway Adapter
 *
 * Creates hosted-checkout "preferences" with the payment provider. The
 * orchestrator only needs the preference id and the redirect links; any
 * failure here is reported as a `PaymentGatewayError` and handled upstream.
 */

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::PaymentGatewayConfig;

#[derive(Debug, Error)]
pub enum PaymentGatewayError {
    #[error("Payment gateway timed out")]
    Timeout,
    #[error("Payment gateway transport error: {0}")]
    Transport(String),
    #[error("Payment gateway returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Payment gateway response could not be decoded: {0}")]
    Decode(String),
    #[error("Payment gateway is not configured: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for PaymentGatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PaymentGatewayError::Timeout
        } else if err.is_decode() {
            PaymentGatewayError::Decode(err.to_string())
        } else {
            PaymentGatewayError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceItem {
    pub id: String,
    pub title: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub description: Option<String>,
    pub category_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayerAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
}

impl PayerAddress {
    /// The provider's address block has no city or state fields.
    fn street_line(&self) -> String {
        [&self.street, &self.city, &self.state]
            .iter()
            .filter(|part| !part.is_empty())
            .map(|part| part.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Payer {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: PayerAddress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackUrls {
    pub success: String,
    pub failure: String,
    pub pending: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceOptions {
    pub external_reference: String,
    pub back_urls: BackUrls,
    pub metadata: serde_json::Value,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreferenceRequest {
    pub items: Vec<PreferenceItem>,
    pub payer: Payer,
    pub options: PreferenceOptions,
    pub currency: String,
}

/// Checkout session descriptor issued by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentPreference {
    pub id: String,
    pub init_point: String,
    pub sandbox_init_point: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Must return `Err` on any failure so the caller can fall back.
    async fn create_preference(
        &self,
        request: &PreferenceRequest,
    ) -> Result<PaymentPreference, PaymentGatewayError>;
}

#[derive(Debug, Serialize)]
struct WireItem<'a> {
    id: &'a str,
    title: &'a str,
    quantity: i32,
    #[serde(with = "rust_decimal::serde::float")]
    unit_price: Decimal,
    currency_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    category_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct WirePhone<'a> {
    number: &'a str,
}

#[derive(Debug, Serialize)]
struct WireAddress<'a> {
    street_name: String,
    zip_code: &'a str,
}

#[derive(Debug, Serialize)]
struct WirePayer<'a> {
    name: &'a str,
    email: &'a str,
    phone: WirePhone<'a>,
    address: WireAddress<'a>,
}

#[derive(Debug, Serialize)]
struct WirePreference<'a> {
    items: Vec<WireItem<'a>>,
    payer: WirePayer<'a>,
    back_urls: &'a BackUrls,
    auto_return: &'static str,
    external_reference: &'a str,
    metadata: &'a serde_json::Value,
    expires: bool,
    expiration_date_to: String,
}

impl<'a> WirePreference<'a> {
    fn from_request(request: &'a PreferenceRequest) -> Self {
        Self {
            items: request
                .items
                .iter()
                .map(|item| WireItem {
                    id: &item.id,
                    title: &item.title,
                    quantity: item.quantity,
                    unit_price: Decimal::new(item.unit_price_cents, 2),
                    currency_id: &request.currency,
                    description: item.description.as_deref(),
                    category_id: item.category_id.as_deref(),
                })
                .collect(),
            payer: WirePayer {
                name: &request.payer.name,
                email: &request.payer.email,
                phone: WirePhone {
                    number: &request.payer.phone,
                },
                address: WireAddress {
                    street_name: request.payer.address.street_line(),
                    zip_code: &request.payer.address.zip_code,
                },
            },
            back_urls: &request.options.back_urls,
            auto_return: "approved",
            external_reference: &request.options.external_reference,
            metadata: &request.options.metadata,
            expires: true,
            expiration_date_to: request.options.expires_at.to_rfc3339(),
        }
    }
}

/// Mercado Pago checkout-preferences client
#[derive(Clone)]
pub struct MercadoPagoGateway {
    client: reqwest::Client,
    api_base: String,
    access_token: String,
}

impl MercadoPagoGateway {
    pub fn new(config: &PaymentGatewayConfig) -> Result<Self, PaymentGatewayError> {
        Self::with_timeout(&config.api_base, &config.access_token, config.timeout())
    }

    pub fn with_timeout(
        api_base: &str,
        access_token: &str,
        timeout: Duration,
    ) -> Result<Self, PaymentGatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentGatewayError::Configuration(e.to_string()))?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        })
    }
}

#[async_trait]
impl PaymentGateway for MercadoPagoGateway {
    #[instrument(skip_all, fields(external_reference = %request.options.external_reference))]
    async fn create_preference(
        &self,
        request: &PreferenceRequest,
    ) -> Result<PaymentPreference, PaymentGatewayError> {
        if self.access_token.is_empty() {
            return Err(PaymentGatewayError::Configuration(
                "missing access token".to_string(),
            ));
        }

        let url = format!("{}/checkout/preferences", self.api_base);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .header("X-Idempotency-Key", &request.options.external_reference)
            .json(&WirePreference::from_request(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Payment gateway rejected preference");
            return Err(PaymentGatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let preference: PaymentPreference = response.json().await?;
        debug!(preference_id = %preference.id, "Payment preference created");
        Ok(preference)
    }
}
