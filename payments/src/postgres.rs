//! `PostgreSQL` payment store.

use crate::error::PaymentError;
use crate::store::{Inserted, PaymentFilter, PaymentStore};
use async_trait::async_trait;
use gym_core::domain::{Payment, PaymentStatus};
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::Row;

const PAYMENT_COLUMNS: &str = "id, entity_type, entity_id, user_id, amount, currency, status, \
     payment_method, payment_gateway, transaction_id, idempotency_key, metadata, created_at, \
     updated_at, processed_at";

/// Payment store over the shared relational schema.
#[derive(Clone, Debug)]
pub struct PostgresPaymentStore {
    pool: PgPool,
}

impl PostgresPaymentStore {
    /// Wrap a pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn by_idempotency_key(&self, key: &str) -> Result<Option<Payment>, PaymentError> {
        let row = sqlx::query(&format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE idempotency_key = $1"))
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PaymentError::database(&e, "Failed to look up idempotency key"))?;
        row.as_ref()
            .map(payment_from_row)
            .transpose()
            .map_err(|e| PaymentError::database(&e, "Failed to decode payment"))
    }
}

fn payment_from_row(row: &PgRow) -> Result<Payment, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let Json(metadata): Json<Map<String, Value>> = row.try_get("metadata")?;
    Ok(Payment {
        id: row.try_get("id")?,
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        user_id: row.try_get("user_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        status: PaymentStatus::parse(&status).ok_or_else(|| sqlx::Error::ColumnDecode {
            index: "status".to_string(),
            source: format!("unexpected value {status:?}").into(),
        })?,
        payment_method: row.try_get("payment_method")?,
        payment_gateway: row.try_get("payment_gateway")?,
        transaction_id: row.try_get("transaction_id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        metadata,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

#[async_trait]
impl PaymentStore for PostgresPaymentStore {
    async fn insert(&self, payment: &Payment) -> Result<Inserted, PaymentError> {
        let written = sqlx::query(
            r"
            INSERT INTO payments
                (id, entity_type, entity_id, user_id, amount, currency, status, payment_method,
                 payment_gateway, transaction_id, idempotency_key, metadata, created_at, updated_at,
                 processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (idempotency_key) DO NOTHING
            ",
        )
        .bind(&payment.id)
        .bind(&payment.entity_type)
        .bind(&payment.entity_id)
        .bind(&payment.user_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(&payment.payment_method)
        .bind(&payment.payment_gateway)
        .bind(payment.transaction_id.as_deref())
        .bind(payment.idempotency_key.as_deref())
        .bind(Json(&payment.metadata))
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .bind(payment.processed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| PaymentError::database(&e, "Failed to insert payment"))?
        .rows_affected();

        if written == 1 {
            return Ok(Inserted::Created(payment.clone()));
        }

        // Only the idempotency key can make the insert a no-op
        let key = payment.idempotency_key.as_deref().unwrap_or_default();
        self.by_idempotency_key(key)
            .await?
            .map(Inserted::Existing)
            .ok_or_else(|| PaymentError::Database {
                kind: gym_core::ErrorKind::Transient,
                message: format!("Payment with idempotency key {key} vanished after conflict"),
            })
    }

    async fn get(&self, id: &str) -> Result<Payment, PaymentError> {
        let row = sqlx::query(&format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PaymentError::database(&e, "Failed to load payment"))?
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))?;
        payment_from_row(&row).map_err(|e| PaymentError::database(&e, "Failed to decode payment"))
    }

    async fn list(&self, filter: &PaymentFilter) -> Result<Vec<Payment>, PaymentError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {PAYMENT_COLUMNS} FROM payments
            WHERE ($1::TEXT IS NULL OR user_id = $1)
              AND ($2::TEXT IS NULL OR entity_type = $2)
              AND ($3::TEXT IS NULL OR entity_id = $3)
              AND ($4::TEXT IS NULL OR status = $4)
            ORDER BY created_at DESC, id DESC
            "
        ))
        .bind(filter.user_id.as_deref())
        .bind(filter.entity_type.as_deref())
        .bind(filter.entity_id.as_deref())
        .bind(filter.status.map(PaymentStatus::as_str))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PaymentError::database(&e, "Failed to list payments"))?;

        rows.iter()
            .map(payment_from_row)
            .collect::<Result<_, _>>()
            .map_err(|e| PaymentError::database(&e, "Failed to decode payment"))
    }

    async fn update(&self, expected: PaymentStatus, next: &Payment) -> Result<bool, PaymentError> {
        let result = sqlx::query(
            r"
            UPDATE payments
            SET status = $3,
                transaction_id = $4,
                metadata = $5,
                updated_at = $6,
                processed_at = $7
            WHERE id = $1 AND status = $2
            ",
        )
        .bind(&next.id)
        .bind(expected.as_str())
        .bind(next.status.as_str())
        .bind(next.transaction_id.as_deref())
        .bind(Json(&next.metadata))
        .bind(next.updated_at)
        .bind(next.processed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| PaymentError::database(&e, "Failed to update payment"))?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        // Distinguish a lost race from a missing row
        self.get(&next.id).await.map(|_| false)
    }
}
