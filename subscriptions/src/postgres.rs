//! `PostgreSQL` subscription store.

use crate::error::SubscriptionError;
use crate::store::SubscriptionStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gym_core::domain::{AccessType, Plan, RenewalEntry, Subscription, SubscriptionState};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::Row;

const PLAN_COLUMNS: &str = "id, nombre, descripcion, precio_mensual, tipo_acceso, duracion_dias, \
     activo, actividades_permitidas, actividades_por_semana";

const SUBSCRIPTION_COLUMNS: &str = "id, usuario_id, plan_id, estado, fecha_inicio, fecha_vencimiento, \
     pago_id, metodo_pago, auto_renovacion, notas, historial_renovaciones, created_at, updated_at, version";

/// Subscription store over the shared relational schema.
#[derive(Clone, Debug)]
pub struct PostgresSubscriptionStore {
    pool: PgPool,
}

impl PostgresSubscriptionStore {
    /// Wrap a pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode_error(column: &str, value: &str) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("unexpected value {value:?}").into(),
    }
}

fn plan_from_row(row: &PgRow) -> Result<Plan, sqlx::Error> {
    let access: String = row.try_get("tipo_acceso")?;
    Ok(Plan {
        id: row.try_get("id")?,
        name: row.try_get("nombre")?,
        description: row.try_get("descripcion")?,
        monthly_price: row.try_get("precio_mensual")?,
        access_type: AccessType::parse(&access).ok_or_else(|| decode_error("tipo_acceso", &access))?,
        duration_days: row.try_get("duracion_dias")?,
        active: row.try_get("activo")?,
        allowed_activities: row.try_get("actividades_permitidas")?,
        activities_per_week: row.try_get("actividades_por_semana")?,
    })
}

fn subscription_from_row(row: &PgRow) -> Result<Subscription, sqlx::Error> {
    let state: String = row.try_get("estado")?;
    let Json(renewals): Json<Vec<RenewalEntry>> = row.try_get("historial_renovaciones")?;
    Ok(Subscription {
        id: row.try_get("id")?,
        user_id: row.try_get("usuario_id")?,
        plan_id: row.try_get("plan_id")?,
        state: SubscriptionState::parse(&state).ok_or_else(|| decode_error("estado", &state))?,
        started_at: row.try_get("fecha_inicio")?,
        expires_at: row.try_get("fecha_vencimiento")?,
        payment_id: row.try_get("pago_id")?,
        payment_method: row.try_get("metodo_pago")?,
        auto_renew: row.try_get("auto_renovacion")?,
        notes: row.try_get("notas")?,
        renewals,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        version: row.try_get("version")?,
    })
}

fn decode_all<T>(
    rows: &[PgRow],
    decode: fn(&PgRow) -> Result<T, sqlx::Error>,
) -> Result<Vec<T>, SubscriptionError> {
    rows.iter()
        .map(decode)
        .collect::<Result<_, _>>()
        .map_err(|e| SubscriptionError::database(&e, "Failed to decode row"))
}

#[async_trait]
impl SubscriptionStore for PostgresSubscriptionStore {
    async fn plan(&self, plan_id: &str) -> Result<Plan, SubscriptionError> {
        let row = sqlx::query(&format!("SELECT {PLAN_COLUMNS} FROM planes WHERE id = $1"))
            .bind(plan_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SubscriptionError::database(&e, "Failed to load plan"))?
            .ok_or_else(|| SubscriptionError::PlanNotFound(plan_id.to_string()))?;
        plan_from_row(&row).map_err(|e| SubscriptionError::database(&e, "Failed to decode plan"))
    }

    async fn plans(&self) -> Result<Vec<Plan>, SubscriptionError> {
        let rows = sqlx::query(&format!("SELECT {PLAN_COLUMNS} FROM planes ORDER BY id"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SubscriptionError::database(&e, "Failed to list plans"))?;
        decode_all(&rows, plan_from_row)
    }

    async fn insert(&self, subscription: &Subscription) -> Result<(), SubscriptionError> {
        sqlx::query(
            r"
            INSERT INTO subscriptions
                (id, usuario_id, plan_id, estado, fecha_inicio, fecha_vencimiento, pago_id,
                 metodo_pago, auto_renovacion, notas, historial_renovaciones, created_at, updated_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 0)
            ",
        )
        .bind(&subscription.id)
        .bind(&subscription.user_id)
        .bind(&subscription.plan_id)
        .bind(subscription.state.as_str())
        .bind(subscription.started_at)
        .bind(subscription.expires_at)
        .bind(subscription.payment_id.as_deref())
        .bind(&subscription.payment_method)
        .bind(subscription.auto_renew)
        .bind(&subscription.notes)
        .bind(Json(&subscription.renewals))
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| SubscriptionError::database(&e, "Failed to insert subscription"))?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Subscription, SubscriptionError> {
        let row = sqlx::query(&format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SubscriptionError::database(&e, "Failed to load subscription"))?
            .ok_or_else(|| SubscriptionError::NotFound(id.to_string()))?;
        subscription_from_row(&row).map_err(|e| SubscriptionError::database(&e, "Failed to decode subscription"))
    }

    async fn for_user(&self, user_id: &str) -> Result<Vec<Subscription>, SubscriptionError> {
        let rows = sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE usuario_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SubscriptionError::database(&e, "Failed to list subscriptions"))?;
        decode_all(&rows, subscription_from_row)
    }

    async fn replace(&self, next: &Subscription) -> Result<bool, SubscriptionError> {
        let result = sqlx::query(
            r"
            UPDATE subscriptions
            SET estado = $3,
                fecha_vencimiento = $4,
                pago_id = $5,
                notas = $6,
                historial_renovaciones = $7,
                updated_at = $8,
                version = version + 1
            WHERE id = $1 AND version = $2
            ",
        )
        .bind(&next.id)
        .bind(next.version)
        .bind(next.state.as_str())
        .bind(next.expires_at)
        .bind(next.payment_id.as_deref())
        .bind(&next.notes)
        .bind(Json(&next.renewals))
        .bind(next.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| SubscriptionError::database(&e, "Failed to update subscription"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn overdue(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>, SubscriptionError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
            WHERE estado = 'active' AND fecha_vencimiento <= $1
            ORDER BY fecha_vencimiento
            "
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SubscriptionError::database(&e, "Failed to list overdue subscriptions"))?;
        decode_all(&rows, subscription_from_row)
    }
}
