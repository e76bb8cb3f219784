//! Wire format of bus messages.
//!
//! Every non-payment event travels as an [`EventEnvelope`]:
//!
//! ```json
//! { "action": "created", "type": "activity", "id": "7",
//!   "timestamp": "2025-01-01T10:00:00Z", "data": { "titulo": "Yoga" } }
//! ```
//!
//! Payment events use the flatter [`PaymentEvent`] whose `action` is fully
//! qualified (`"payment.completed"`).
//!
//! Decoding is tolerant: `data` may be absent, unknown fields are ignored, and
//! payload fields that producers emit either as numbers or as strings are read
//! through [`coerce_u64`].

use crate::routing;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of entity an envelope describes (the `type` field).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A scheduled class.
    Activity,
    /// A purchasable subscription tier.
    Plan,
    /// A user's entitlement under a plan.
    Subscription,
    /// A money-movement record.
    Payment,
    /// A user's enrolment in an activity.
    Inscription,
    /// Anything else; carried verbatim.
    Other(String),
}

impl EntityKind {
    /// Parse the wire spelling.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "activity" => Self::Activity,
            "plan" => Self::Plan,
            "subscription" => Self::Subscription,
            "payment" => Self::Payment,
            "inscription" => Self::Inscription,
            other => Self::Other(other.to_string()),
        }
    }

    /// Wire spelling.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Activity => "activity",
            Self::Plan => "plan",
            Self::Subscription => "subscription",
            Self::Payment => "payment",
            Self::Inscription => "inscription",
            Self::Other(other) => other,
        }
    }
}

/// What happened to the entity (the `action` field).
///
/// Producers are inconsistent about tense (`create` vs `created`); both parse
/// to the same variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventAction {
    /// Entity created.
    Created,
    /// Entity updated.
    Updated,
    /// Entity deleted.
    Deleted,
    /// Subscription became active.
    Activated,
    /// Subscription or payment cancelled.
    Cancelled,
    /// Subscription expired.
    Expired,
    /// Any other action; carried verbatim.
    Other(String),
}

impl EventAction {
    /// Parse the wire spelling.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "create" | "created" => Self::Created,
            "update" | "updated" => Self::Updated,
            "delete" | "deleted" => Self::Deleted,
            "activate" | "activated" => Self::Activated,
            "cancel" | "cancelled" | "canceled" => Self::Cancelled,
            "expire" | "expired" => Self::Expired,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Generic event envelope (`<type>.<action>` routing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Action verb, e.g. `created`.
    pub action: String,
    /// Entity kind, e.g. `activity`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Entity id.
    #[serde(default)]
    pub id: String,
    /// Emission time.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Entity-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl EventEnvelope {
    /// Create an envelope stamped with the current time.
    #[must_use]
    pub fn new(kind: &str, action: &str, id: &str, data: Option<Value>) -> Self {
        Self::with_timestamp(kind, action, id, data, Utc::now())
    }

    /// Create an envelope with an explicit timestamp.
    #[must_use]
    pub fn with_timestamp(
        kind: &str,
        action: &str,
        id: &str,
        data: Option<Value>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            action: action.to_string(),
            kind: kind.to_string(),
            id: id.to_string(),
            timestamp,
            data,
        }
    }

    /// `<type>.<action>` routing key for this envelope.
    #[must_use]
    pub fn routing_key(&self) -> String {
        routing::routing_key(&self.kind, &self.action)
    }

    /// Decoded `type`.
    #[must_use]
    pub fn entity_kind(&self) -> EntityKind {
        EntityKind::parse(&self.kind)
    }

    /// Decoded `action`.
    #[must_use]
    pub fn event_action(&self) -> EventAction {
        EventAction::parse(&self.action)
    }

    /// Look up a top-level field of `data`.
    #[must_use]
    pub fn data_field(&self, name: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|data| data.get(name))
    }

    /// Deserialize `data` into a typed payload (absent data reads as `{}`).
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the payload does not fit `T`.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.data {
            Some(data) => serde_json::from_value(data.clone()),
            None => serde_json::from_value(Value::Object(Map::new())),
        }
    }
}

/// The four payment lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentAction {
    /// Payment recorded as pending.
    Created,
    /// Payment settled.
    Completed,
    /// Payment rejected by the gateway.
    Failed,
    /// Payment returned to the customer.
    Refunded,
}

impl PaymentAction {
    /// Bare action word used in routing keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    /// Parse either `completed` or `payment.completed`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.strip_prefix("payment.").unwrap_or(value) {
            "created" => Some(Self::Created),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }
}

fn payment_kind() -> String {
    "payment".to_string()
}

/// Extended envelope for payment events (`payment.<action>.<entity_type>`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    /// Fully qualified action, e.g. `payment.completed`.
    pub action: String,
    /// Always `payment`.
    #[serde(rename = "type", default = "payment_kind")]
    pub kind: String,
    /// Payment id.
    pub payment_id: String,
    /// Payment status after the change.
    #[serde(default)]
    pub status: String,
    /// Kind of entity being paid for (`subscription`, `inscription`, ...).
    pub entity_type: String,
    /// Id of the entity being paid for.
    #[serde(default)]
    pub entity_id: String,
    /// Paying user.
    #[serde(default)]
    pub user_id: String,
    /// Amount in `currency` units.
    #[serde(default)]
    pub amount: f64,
    /// ISO currency code.
    #[serde(default)]
    pub currency: String,
    /// Gateway-side transaction id.
    #[serde(default)]
    pub transaction_id: String,
    /// Gateway name (`mercadopago`, `cash`, ...).
    #[serde(default)]
    pub payment_gateway: String,
    /// Emission time.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Free-form metadata (`refund_amount` on refunds).
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl PaymentEvent {
    /// Decoded action, if it is one of the four lifecycle events.
    #[must_use]
    pub fn payment_action(&self) -> Option<PaymentAction> {
        PaymentAction::parse(&self.action)
    }

    /// `payment.<action>.<entity_type>` routing key.
    #[must_use]
    pub fn routing_key(&self) -> String {
        routing::payment_routing_key(&self.action, &self.entity_type)
    }

    /// Whether this payment settles a subscription.
    #[must_use]
    pub fn is_for_subscription(&self) -> bool {
        self.entity_type == "subscription"
    }
}

/// Coerce a JSON value that may be a number or a numeric string into `u64`.
///
/// Returns `None` for null, negative numbers, non-integral numbers, and
/// strings that do not parse.
///
/// ```
/// use gym_core::envelope::coerce_u64;
/// use serde_json::json;
///
/// assert_eq!(coerce_u64(&json!(42)), Some(42));
/// assert_eq!(coerce_u64(&json!("42")), Some(42));
/// assert_eq!(coerce_u64(&json!(null)), None);
/// ```
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn coerce_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn envelope_uses_type_on_the_wire() {
        let envelope = EventEnvelope::new("activity", "created", "7", Some(json!({"titulo": "Yoga"})));
        let wire = serde_json::to_value(&envelope).unwrap();
        assert_eq!(wire["type"], "activity");
        assert_eq!(wire["action"], "created");
        assert_eq!(wire["data"]["titulo"], "Yoga");
        assert_eq!(envelope.routing_key(), "activity.created");
    }

    #[test]
    fn envelope_tolerates_missing_data_and_unknown_fields() {
        let raw = r#"{"action":"deleted","type":"plan","id":"abc","timestamp":"2025-01-01T00:00:00Z","extra":1}"#;
        let envelope: EventEnvelope = serde_json::from_str(raw).unwrap();
        assert!(envelope.data.is_none());
        assert_eq!(envelope.entity_kind(), EntityKind::Plan);
        assert_eq!(envelope.event_action(), EventAction::Deleted);
    }

    #[test]
    fn envelope_without_type_is_rejected() {
        let raw = r#"{"action":"deleted","id":"abc"}"#;
        assert!(serde_json::from_str::<EventEnvelope>(raw).is_err());
    }

    #[test]
    fn action_tenses_collapse() {
        assert_eq!(EventAction::parse("create"), EventAction::Created);
        assert_eq!(EventAction::parse("created"), EventAction::Created);
        assert_eq!(EventAction::parse("payment_failed"), EventAction::Other("payment_failed".into()));
    }

    #[test]
    fn payment_event_routes_by_entity_type() {
        let raw = json!({
            "action": "payment.completed",
            "payment_id": "p1",
            "status": "completed",
            "entity_type": "subscription",
            "entity_id": "s1",
            "amount": 5000.0,
            "currency": "ARS"
        });
        let event: PaymentEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.kind, "payment");
        assert_eq!(event.payment_action(), Some(PaymentAction::Completed));
        assert_eq!(event.routing_key(), "payment.completed.subscription");
        assert!(event.is_for_subscription());
    }

    #[test]
    fn coercion_rejects_null_and_garbage() {
        assert_eq!(coerce_u64(&json!(null)), None);
        assert_eq!(coerce_u64(&json!("abc")), None);
        assert_eq!(coerce_u64(&json!(-3)), None);
        assert_eq!(coerce_u64(&json!(4.5)), None);
        assert_eq!(coerce_u64(&json!(7.0)), Some(7));
        assert_eq!(coerce_u64(&json!({"id": 1})), None);
    }

    proptest! {
        #[test]
        fn coercion_agrees_for_number_and_string(n in 0u64..u64::MAX) {
            prop_assert_eq!(coerce_u64(&json!(n)), Some(n));
            prop_assert_eq!(coerce_u64(&json!(n.to_string())), Some(n));
        }
    }
}
