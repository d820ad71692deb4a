use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VerificationEvent {
    #[serde(rename = "email")]
    #[validate(length(min = 1), email)]
    pub recipient_email: String,

    #[serde(rename = "firstName")]
    pub first_name: String,

    #[serde(rename = "link")]
    #[validate(url)]
    pub verification_link: String,
}

impl VerificationEvent {
    pub const IDENTIFYING_FIELD: &'static str = "email";
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OrderNotificationEvent {
    #[serde(rename = "userId")]
    #[validate(length(min = 1))]
    pub user_id: String,

    #[serde(rename = "orderTime")]
    #[validate(custom(function = "validate_order_time"))]
    pub order_timestamp: String,

    #[serde(rename = "totalPrice")]
    #[validate(custom(function = "validate_non_negative"))]
    pub total_price: Decimal,
}

impl OrderNotificationEvent {
    pub const IDENTIFYING_FIELD: &'static str = "userId";

    /// Price as shown to customers. Padded to two decimal places but never
    /// rounded, so every digit the publisher sent is shown.
    pub fn formatted_total_price(&self) -> String {
        let mut price = self.total_price;
        if price.scale() < 2 {
            price.rescale(2);
        }
        if price.is_zero() {
            price.set_sign_positive(true);
        }
        price.to_string()
    }
}

/// Deserializes a queue payload and runs its field validation.
pub fn decode_event<T>(payload: &[u8]) -> Result<T, String>
where
    T: DeserializeOwned + Validate,
{
    let event = serde_json::from_slice::<T>(payload).map_err(|e| e.to_string())?;
    event.validate().map_err(|e| e.to_string())?;
    Ok(event)
}

/// Best-effort extraction of a top-level string field from a raw payload, for logging.
pub fn identifying_field(payload: &[u8], field: &str) -> Option<String> {
    let value = serde_json::from_slice::<serde_json::Value>(payload).ok()?;
    value.get(field)?.as_str().map(str::to_string)
}

fn validate_order_time(value: &str) -> Result<(), ValidationError> {
    let parses = DateTime::parse_from_rfc3339(value).is_ok()
        || value.parse::<NaiveDateTime>().is_ok()
        || value.parse::<NaiveDate>().is_ok();

    if parses {
        Ok(())
    } else {
        Err(ValidationError::new("iso8601"))
    }
}

fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ValidationError::new("non_negative"));
    }
    Ok(())
}
