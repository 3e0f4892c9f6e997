use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Contact and shipping details entered by the family at checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ContactInfo {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 50))]
    pub phone: String,
    #[validate(length(min = 1, max = 200))]
    pub street: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 100))]
    pub state: String,
    #[validate(length(min = 1, max = 20))]
    pub zip_code: String,
}

impl ContactInfo {
    /// Single-line shipping address used in order metadata and gateway metadata.
    pub fn formatted_address(&self) -> String {
        format!(
            "{}, {}, {} ({})",
            self.street, self.city, self.state, self.zip_code
        )
    }
}

/// One cart line as submitted by the client.
///
/// `price` is only ever compared against the catalog; it never sets the
/// charged amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutItemRequest {
    pub photo_id: Uuid,
    pub quantity: i32,
    #[serde(default)]
    pub price_list_item_id: Option<Uuid>,
    #[serde(default)]
    pub price_type: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub token: String,
    #[validate]
    pub contact_info: ContactInfo,
    pub items: Vec<CheckoutItemRequest>,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// How the family continues to payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PaymentRedirect {
    #[serde(rename_all = "camelCase")]
    Preference {
        preference_id: String,
        init_point: String,
        sandbox_init_point: String,
    },
    #[serde(rename_all = "camelCase")]
    Fallback { fallback_redirect_url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub order_id: Uuid,
    pub total_cents: i64,
    pub currency: String,
    #[serde(flatten)]
    pub payment: PaymentRedirect,
}

impl CheckoutResponse {
    pub fn is_fallback(&self) -> bool {
        matches!(self.payment, PaymentRedirect::Fallback { .. })
    }

    pub fn fallback_redirect_url(&self) -> Option<&str> {
        match &self.payment {
            PaymentRedirect::Fallback {
                fallback_redirect_url,
            } => Some(fallback_redirect_url),
            PaymentRedirect::Preference { .. } => None,
        }
    }

    pub fn preference_id(&self) -> Option<&str> {
        match &self.payment {
            PaymentRedirect::Preference { preference_id, .. } => Some(preference_id),
            PaymentRedirect::Fallback { .. } => None,
        }
    }
}
