//! Search documents, requests and responses.
//!
//! A [`SearchDocument`] is the unified record for activities, plans and
//! subscriptions. Producers and Solr disagree on field shapes: ids arrive as
//! numbers or strings, and Solr may wrap any stored field in a one-element
//! array. Decoding goes through the coercions in [`fields`] so every source
//! yields the same document.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Page size when the request leaves it unset.
pub const DEFAULT_PAGE_SIZE: i64 = 10;

/// Largest page size served; larger requests are clamped.
pub const MAX_PAGE_SIZE: i64 = 100;

/// Largest page number served. Keeps `offset` within Solr's 32-bit `start`.
pub const MAX_PAGE: i64 = 1_000_000;

/// Filter keys understood by every layer.
pub const FILTER_KEYS: &[&str] = &["categoria", "dia", "instructor", "sucursal_id", "requiere_premium", "estado"];

/// Lenient scalar extraction.
pub mod fields {
    use serde_json::Value;

    /// The value itself, or the first element when it is an array.
    #[must_use]
    pub fn first(value: &Value) -> &Value {
        match value {
            Value::Array(items) => items.first().unwrap_or(&Value::Null),
            other => other,
        }
    }

    /// A string, or a number rendered as one.
    #[must_use]
    pub fn text(value: &Value) -> Option<String> {
        match first(value) {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// An integer from a number (truncated) or a numeric string.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn int(value: &Value) -> Option<i64> {
        match first(value) {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// A float from a number or a numeric string.
    #[must_use]
    pub fn float(value: &Value) -> Option<f64> {
        match first(value) {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// A boolean, or `"true"`/`"false"`.
    #[must_use]
    pub fn flag(value: &Value) -> Option<bool> {
        match first(value) {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// Unified search record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchDocument {
    /// Entity id, without prefix.
    pub id: String,
    /// `activity`, `plan` or `subscription`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Activity title.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub titulo: String,
    /// Activity description.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub descripcion: String,
    /// Activity category.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub categoria: String,
    /// Instructor name.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub instructor: String,
    /// Day of week.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dia: String,
    /// Start time.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub horario_inicio: String,
    /// End time.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub horario_final: String,
    /// Branch id.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sucursal_id: String,
    /// Branch name.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sucursal_nombre: String,
    /// Restricted to full-access plans.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub requiere_premium: bool,
    /// Seat capacity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cupo: Option<i64>,
    /// Seats left.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cupo_disponible: Option<i64>,

    /// Plan name.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub plan_nombre: String,
    /// Plan monthly price.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_precio: Option<f64>,
    /// Plan access type.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub plan_tipo_acceso: String,

    /// Subscription owner.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub usuario_id: String,
    /// Subscription plan.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub plan_id: String,
    /// Subscription state.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub estado: String,

    /// Creation time as sent by the producer.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub created_at: String,
    /// Last change as sent by the producer.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub updated_at: String,
}

impl SearchDocument {
    /// Decode any JSON object, tolerating scalar-or-array fields and the
    /// payload spellings each producer uses. `None` unless `value` is an
    /// object.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let text = |keys: &[&str]| lookup(object, keys).and_then(fields::text).unwrap_or_default();

        Some(Self {
            id: text(&["id", "id_actividad"]),
            kind: text(&["type"]),
            titulo: text(&["titulo"]),
            descripcion: text(&["descripcion"]),
            categoria: text(&["categoria"]),
            instructor: text(&["instructor"]),
            dia: text(&["dia"]),
            horario_inicio: text(&["horario_inicio"]),
            horario_final: text(&["horario_final"]),
            sucursal_id: text(&["sucursal_id"]),
            sucursal_nombre: text(&["sucursal_nombre"]),
            requiere_premium: lookup(object, &["requiere_premium"])
                .and_then(fields::flag)
                .unwrap_or(false),
            cupo: lookup(object, &["cupo"]).and_then(fields::int),
            cupo_disponible: lookup(object, &["cupo_disponible"]).and_then(fields::int),
            plan_nombre: text(&["plan_nombre", "nombre"]),
            plan_precio: lookup(object, &["plan_precio", "precio_mensual"]).and_then(fields::float),
            plan_tipo_acceso: text(&["plan_tipo_acceso", "tipo_acceso"]),
            usuario_id: text(&["usuario_id"]),
            plan_id: text(&["plan_id"]),
            estado: text(&["estado"]),
            created_at: text(&["created_at"]),
            updated_at: text(&["updated_at"]),
        })
    }

    /// Build the document an event describes. The envelope's `type` and `id`
    /// win over anything in the payload.
    #[must_use]
    pub fn from_event(kind: &str, id: &str, data: Option<&Value>) -> Self {
        let mut document = data.and_then(Self::from_value).unwrap_or_default();
        kind.clone_into(&mut document.kind);
        id.clone_into(&mut document.id);
        document
    }

    /// Whether the document satisfies the request's type, text and filters.
    ///
    /// Text matching is a case-insensitive substring test over title,
    /// description, category, instructor and plan name.
    #[must_use]
    pub fn matches(&self, request: &SearchRequest) -> bool {
        if !request.kind.is_empty() && self.kind != request.kind {
            return false;
        }

        if !request.query.is_empty() {
            let needle = request.query.to_lowercase();
            let found = [
                &self.titulo,
                &self.descripcion,
                &self.categoria,
                &self.instructor,
                &self.plan_nombre,
            ]
            .iter()
            .any(|field| field.to_lowercase().contains(&needle));
            if !found {
                return false;
            }
        }

        request.filters.iter().all(|(key, value)| match key.as_str() {
            "categoria" => self.categoria == *value,
            "dia" => self.dia == *value,
            "instructor" => self.instructor == *value,
            "sucursal_id" => self.sucursal_id == *value,
            "requiere_premium" => self.requiere_premium == (value == "true"),
            "estado" => self.estado == *value,
            _ => true,
        })
    }
}

fn lookup<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| object.get(*key).filter(|v| !v.is_null()))
}

impl<'de> Deserialize<'de> for SearchDocument {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).ok_or_else(|| D::Error::custom("search document must be a JSON object"))
    }
}

/// A search query.
///
/// Serialized form feeds the cache key, so `filters` is ordered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Free text.
    #[serde(default)]
    pub query: String,
    /// Exact-match filters (see [`FILTER_KEYS`]).
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
    /// Restrict to one document type.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// 1-based page.
    #[serde(default)]
    pub page: i64,
    /// Results per page.
    #[serde(default)]
    pub page_size: i64,
}

impl SearchRequest {
    /// Apply paging defaults: `page < 1` becomes 1, `page_size < 1` becomes
    /// [`DEFAULT_PAGE_SIZE`]; both are capped at [`MAX_PAGE`] and
    /// [`MAX_PAGE_SIZE`]. Empty filter values are dropped.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.page = self.page.clamp(1, MAX_PAGE);
        if self.page_size < 1 {
            self.page_size = DEFAULT_PAGE_SIZE;
        }
        self.page_size = self.page_size.min(MAX_PAGE_SIZE);
        self.filters.retain(|_, value| !value.is_empty());
        self
    }

    /// Results per page, within `1..=MAX_PAGE_SIZE`.
    #[must_use]
    pub fn limit(&self) -> i64 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    /// Index of the first result on the page.
    #[must_use]
    pub fn offset(&self) -> i64 {
        self.page.clamp(1, MAX_PAGE).saturating_sub(1).saturating_mul(self.limit())
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Documents on this page.
    pub results: Vec<SearchDocument>,
    /// Matches across all pages.
    pub total_count: i64,
    /// 1-based page.
    pub page: i64,
    /// Results per page.
    pub page_size: i64,
    /// `ceil(total_count / page_size)`.
    pub total_pages: i64,
}

impl SearchResponse {
    /// Wrap a page of results for a normalized request.
    #[must_use]
    pub fn new(results: Vec<SearchDocument>, total_count: i64, request: &SearchRequest) -> Self {
        let page_size = request.limit();
        let total_pages = if total_count > 0 { (total_count - 1) / page_size + 1 } else { 0 };
        Self {
            results,
            total_count,
            page: request.page,
            page_size,
            total_pages,
        }
    }
}

/// Index statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    /// Documents in the in-memory index.
    pub total_documents: usize,
    /// Counts per document type.
    pub documents_by_type: BTreeMap<String, usize>,
    /// Whether searches currently skip the primary backend.
    pub degraded: bool,
}
