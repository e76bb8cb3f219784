//! Entities referenced by the workflow layer.
//!
//! Rust field names are English; the serialized names match the JSON the
//! services have always exchanged (`usuario_id`, `estado`, `cupo`, ...).
//! Cross-service references are plain ids, never shared state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A scheduled class with limited seats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    /// Numeric id.
    #[serde(rename = "id_actividad")]
    pub id: i64,
    /// Title.
    #[serde(rename = "titulo")]
    pub title: String,
    /// Description.
    #[serde(rename = "descripcion", default)]
    pub description: String,
    /// Seat capacity (non-negative).
    #[serde(rename = "cupo")]
    pub capacity: i32,
    /// Day of week.
    #[serde(rename = "dia", default)]
    pub day: String,
    /// Start time (`HH:MM`).
    #[serde(rename = "horario_inicio", default)]
    pub starts_at: String,
    /// End time (`HH:MM`).
    #[serde(rename = "horario_final", default)]
    pub ends_at: String,
    /// Instructor name.
    #[serde(default)]
    pub instructor: String,
    /// Category.
    #[serde(rename = "categoria", default)]
    pub category: String,
    /// Branch, if assigned.
    #[serde(rename = "sucursal_id", default)]
    pub branch_id: Option<i64>,
    /// Active flag.
    #[serde(rename = "activa", default = "default_true")]
    pub active: bool,
}

const fn default_true() -> bool {
    true
}

/// A user's enrolment in an activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inscription {
    /// Numeric id.
    pub id: i64,
    /// Enrolled user.
    #[serde(rename = "usuario_id")]
    pub user_id: i64,
    /// Activity.
    #[serde(rename = "actividad_id")]
    pub activity_id: i64,
    /// Whether the seat is currently held.
    #[serde(rename = "is_activa")]
    pub active: bool,
    /// Subscription that entitled the enrolment.
    #[serde(rename = "suscripcion_id", default)]
    pub subscription_id: Option<String>,
    /// When the row was created or last reactivated.
    #[serde(rename = "fecha_inscripcion")]
    pub enrolled_at: DateTime<Utc>,
}

/// Plan access type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    /// Only the categories in `allowed_activities`.
    #[serde(alias = "limitado")]
    Limited,
    /// Every activity.
    #[serde(alias = "completo")]
    Full,
}

impl AccessType {
    /// Wire spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Limited => "limited",
            Self::Full => "full",
        }
    }

    /// Parse the wire spelling (English or Spanish).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "limited" | "limitado" => Some(Self::Limited),
            "full" | "completo" => Some(Self::Full),
            _ => None,
        }
    }
}

/// A purchasable subscription tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// 24-hex opaque id.
    pub id: String,
    /// Display name.
    #[serde(rename = "nombre")]
    pub name: String,
    /// Description.
    #[serde(rename = "descripcion", default)]
    pub description: String,
    /// Monthly price.
    #[serde(rename = "precio_mensual")]
    pub monthly_price: f64,
    /// Access type.
    #[serde(rename = "tipo_acceso")]
    pub access_type: AccessType,
    /// Length of one paid period.
    #[serde(rename = "duracion_dias")]
    pub duration_days: i32,
    /// Whether the plan can be purchased.
    #[serde(rename = "activo")]
    pub active: bool,
    /// Categories a limited plan grants.
    #[serde(rename = "actividades_permitidas", default)]
    pub allowed_activities: Vec<String>,
    /// Weekly quota (0 = unlimited).
    #[serde(rename = "actividades_por_semana", default)]
    pub activities_per_week: i32,
}

impl Plan {
    /// Length of one paid period.
    #[must_use]
    pub fn period(&self) -> Duration {
        Duration::days(i64::from(self.duration_days.max(0)))
    }
}

/// Subscription lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// Paid and within its period.
    Active,
    /// Period elapsed.
    Expired,
    /// Refunded or cancelled on request.
    Cancelled,
    /// Awaiting the first payment.
    PendingPayment,
}

impl SubscriptionState {
    /// Wire spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
            Self::PendingPayment => "pending_payment",
        }
    }

    /// Parse the wire spelling.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "expired" => Some(Self::Expired),
            "cancelled" => Some(Self::Cancelled),
            "pending_payment" => Some(Self::PendingPayment),
            _ => None,
        }
    }
}

/// One entry of the append-only renewal history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenewalEntry {
    /// When the payment was applied.
    #[serde(rename = "fecha")]
    pub date: DateTime<Utc>,
    /// Applied payment.
    #[serde(rename = "pago_id")]
    pub payment_id: String,
    /// Amount paid.
    #[serde(rename = "monto")]
    pub amount: f64,
}

/// A user's entitlement under a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Opaque id.
    pub id: String,
    /// Owning user (as issued by the users service).
    #[serde(rename = "usuario_id")]
    pub user_id: String,
    /// Plan.
    pub plan_id: String,
    /// Lifecycle state.
    #[serde(rename = "estado")]
    pub state: SubscriptionState,
    /// Creation of the entitlement.
    #[serde(rename = "fecha_inicio")]
    pub started_at: DateTime<Utc>,
    /// End of the paid period; unset until the first payment.
    #[serde(rename = "fecha_vencimiento", default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Last applied payment.
    #[serde(rename = "pago_id", default)]
    pub payment_id: Option<String>,
    /// Preferred payment method.
    #[serde(rename = "metodo_pago", default)]
    pub payment_method: String,
    /// Auto-renew flag.
    #[serde(rename = "auto_renovacion", default)]
    pub auto_renew: bool,
    /// Operator notes (payment failures are appended here).
    #[serde(rename = "notas", default)]
    pub notes: Vec<String>,
    /// Applied payments, oldest first.
    #[serde(rename = "historial_renovaciones", default)]
    pub renewals: Vec<RenewalEntry>,
    /// Row creation.
    pub created_at: DateTime<Utc>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token; not part of the wire format.
    #[serde(skip)]
    pub version: i64,
}

/// Payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Recorded, not yet settled.
    Pending,
    /// Settled.
    Completed,
    /// Rejected.
    Failed,
    /// Returned to the customer.
    Refunded,
}

impl PaymentStatus {
    /// Wire spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    /// Parse the wire spelling.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }

    /// Whether `self → next` is a legal status change.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Completed | Self::Failed) | (Self::Completed, Self::Refunded)
        )
    }
}

/// A money-movement record toward an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Opaque id.
    pub id: String,
    /// Kind of entity paid for.
    pub entity_type: String,
    /// Id of the entity paid for.
    pub entity_id: String,
    /// Paying user.
    pub user_id: String,
    /// Amount.
    pub amount: f64,
    /// ISO currency code.
    pub currency: String,
    /// Status.
    pub status: PaymentStatus,
    /// Method chosen by the customer.
    pub payment_method: String,
    /// Gateway name.
    pub payment_gateway: String,
    /// Gateway-side transaction id.
    #[serde(default)]
    pub transaction_id: Option<String>,
    /// Client-supplied key collapsing duplicate creates.
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
    /// When the payment completed.
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
}
