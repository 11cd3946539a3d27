use crate::models::normalize_email;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Event names that report an approved payment.
const PAID_EVENTS: &[&str] = &[
    "purchase_approved",
    "payment.paid",
    "payment.approved",
    "order.paid",
];

/// Status values that report an approved payment.
const PAID_STATUSES: &[&str] = &["paid", "approved"];

/// JSON pointers that may carry the customer email, in priority order.
const EMAIL_POINTERS: &[&str] = &[
    "/data/customer/email",
    "/data/customer_email",
    "/data/email",
    "/customer/email",
    "/customer_email",
    "/email",
];

const CUSTOMER_NAME_POINTERS: &[&str] = &["/data/customer/name", "/customer/name"];

/// Single product names.
const PRODUCT_NAME_POINTERS: &[&str] = &["/data/product/name", "/product/name", "/data/offer/name"];

/// Arrays of line items whose entries carry a `name`.
const LINE_ITEM_POINTERS: &[&str] = &["/data/items", "/data/products", "/items", "/products"];

const OFFER_ID_POINTERS: &[&str] = &["/data/offer/id", "/data/offer_id", "/offer/id", "/offer_id"];

/// Inbound payment-processor notification.
///
/// The processor's schema varies per event type, so the raw JSON is kept and
/// every field is looked up defensively in several known locations.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentWebhook {
    raw: Value,
}

fn non_empty_str(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty())
}

impl PaymentWebhook {
    pub fn new(raw: Value) -> Self {
        Self { raw }
    }

    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body).map(Self::new)
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    fn first_str(&self, pointers: &[&str]) -> Option<&str> {
        pointers
            .iter()
            .find_map(|p| self.raw.pointer(p).and_then(non_empty_str))
    }

    /// Lower-cased customer email, if any known field carries one.
    pub fn customer_email(&self) -> Option<String> {
        self.first_str(EMAIL_POINTERS)
            .filter(|email| email.contains('@'))
            .map(normalize_email)
    }

    pub fn customer_name(&self) -> Option<String> {
        self.first_str(CUSTOMER_NAME_POINTERS).map(str::to_string)
    }

    /// Event name (`event`, falling back to `type`).
    pub fn event_name(&self) -> Option<&str> {
        self.first_str(&["/event", "/type"])
    }

    /// True when the event name or a status field reports an approved payment.
    pub fn is_payment_confirmed(&self) -> bool {
        let event_paid = self
            .event_name()
            .is_some_and(|e| PAID_EVENTS.iter().any(|p| e.eq_ignore_ascii_case(p)));
        if event_paid {
            return true;
        }

        ["/status", "/data/status"].iter().any(|p| {
            self.raw
                .pointer(p)
                .and_then(non_empty_str)
                .is_some_and(|s| PAID_STATUSES.iter().any(|paid| s.eq_ignore_ascii_case(paid)))
        })
    }

    /// Product and line-item names. Nothing else in the payload is inspected.
    pub fn product_names(&self) -> Vec<String> {
        let mut names: Vec<String> = PRODUCT_NAME_POINTERS
            .iter()
            .filter_map(|p| self.raw.pointer(p).and_then(non_empty_str))
            .map(str::to_string)
            .collect();

        for pointer in LINE_ITEM_POINTERS {
            if let Some(items) = self.raw.pointer(pointer).and_then(Value::as_array) {
                names.extend(
                    items
                        .iter()
                        .filter_map(|item| item.get("name").and_then(non_empty_str))
                        .map(str::to_string),
                );
            }
        }

        names
    }

    /// Offer identifier, accepting string or numeric ids.
    pub fn offer_id(&self) -> Option<String> {
        OFFER_ID_POINTERS
            .iter()
            .find_map(|p| match self.raw.pointer(p)? {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }

    /// Top-level `secret` field some processors embed in the body.
    pub fn embedded_secret(&self) -> Option<&str> {
        self.raw.get("secret").and_then(non_empty_str)
    }

    /// SHA-256 of the serialized payload, used to spot redelivered events.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.raw.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}
