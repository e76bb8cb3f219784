//! `PostgreSQL` inscription store.
//!
//! Admission and capacity updates lock the activity row with
//! `SELECT ... FOR UPDATE` and count active inscriptions inside the same
//! transaction. Under READ COMMITTED a second admission for the same activity
//! blocks on the lock and then sees the first one's insert.

use crate::error::ActivityError;
use crate::store::{Admission, InscriptionStore, Seats, user_column};
use async_trait::async_trait;
use gym_core::domain::{Activity, Inscription};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};

const ACTIVITY_COLUMNS: &str = "id_actividad, titulo, descripcion, cupo, dia, horario_inicio, \
     horario_final, instructor, categoria, sucursal_id, activa";

const INSCRIPTION_COLUMNS: &str =
    "id, usuario_id, actividad_id, is_activa, suscripcion_id, fecha_inscripcion";

/// Inscription store over the shared relational schema.
#[derive(Clone, Debug)]
pub struct PostgresInscriptionStore {
    pool: PgPool,
}

impl PostgresInscriptionStore {
    /// Wrap a pool; the schema comes from `gym_postgres::migrate`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, ActivityError> {
        self.pool
            .begin()
            .await
            .map_err(|e| ActivityError::database(&e, "Failed to start transaction"))
    }
}

fn activity_from_row(row: &PgRow) -> Result<Activity, sqlx::Error> {
    Ok(Activity {
        id: row.try_get("id_actividad")?,
        title: row.try_get("titulo")?,
        description: row.try_get("descripcion")?,
        capacity: row.try_get("cupo")?,
        day: row.try_get("dia")?,
        starts_at: row.try_get("horario_inicio")?,
        ends_at: row.try_get("horario_final")?,
        instructor: row.try_get("instructor")?,
        category: row.try_get("categoria")?,
        branch_id: row.try_get("sucursal_id")?,
        active: row.try_get("activa")?,
    })
}

fn inscription_from_row(row: &PgRow) -> Result<Inscription, sqlx::Error> {
    Ok(Inscription {
        id: row.try_get("id")?,
        user_id: row.try_get("usuario_id")?,
        activity_id: row.try_get("actividad_id")?,
        active: row.try_get("is_activa")?,
        subscription_id: row.try_get("suscripcion_id")?,
        enrolled_at: row.try_get("fecha_inscripcion")?,
    })
}

/// Lock the activity row and return its capacity.
async fn lock_activity(
    tx: &mut Transaction<'static, Postgres>,
    activity_id: i64,
) -> Result<i32, ActivityError> {
    sqlx::query_scalar::<_, i32>(
        "SELECT cupo FROM actividades WHERE id_actividad = $1 AND deleted_at IS NULL FOR UPDATE",
    )
    .bind(activity_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| ActivityError::database(&e, "Failed to lock activity"))?
    .ok_or(ActivityError::ActivityNotFound(activity_id))
}

async fn count_active(
    tx: &mut Transaction<'static, Postgres>,
    activity_id: i64,
) -> Result<i64, ActivityError> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM inscripciones WHERE actividad_id = $1 AND is_activa",
    )
    .bind(activity_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| ActivityError::database(&e, "Failed to count inscriptions"))
}

async fn commit(tx: Transaction<'static, Postgres>) -> Result<(), ActivityError> {
    tx.commit()
        .await
        .map_err(|e| ActivityError::database(&e, "Failed to commit transaction"))
}

#[async_trait]
impl InscriptionStore for PostgresInscriptionStore {
    async fn activity(&self, activity_id: i64) -> Result<Activity, ActivityError> {
        let row = sqlx::query(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM actividades WHERE id_actividad = $1 AND deleted_at IS NULL"
        ))
        .bind(activity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ActivityError::database(&e, "Failed to load activity"))?
        .ok_or(ActivityError::ActivityNotFound(activity_id))?;

        activity_from_row(&row).map_err(|e| ActivityError::database(&e, "Failed to decode activity"))
    }

    async fn seats(&self, activity_id: i64) -> Result<Seats, ActivityError> {
        let row = sqlx::query(
            r"
            SELECT a.cupo,
                   (SELECT COUNT(*) FROM inscripciones i
                     WHERE i.actividad_id = a.id_actividad AND i.is_activa) AS activas
            FROM actividades a
            WHERE a.id_actividad = $1 AND a.deleted_at IS NULL
            ",
        )
        .bind(activity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ActivityError::database(&e, "Failed to read seats"))?
        .ok_or(ActivityError::ActivityNotFound(activity_id))?;

        let capacity: i32 = row
            .try_get("cupo")
            .map_err(|e| ActivityError::database(&e, "Failed to decode seats"))?;
        let active: i64 = row
            .try_get("activas")
            .map_err(|e| ActivityError::database(&e, "Failed to decode seats"))?;
        Ok(Seats::new(activity_id, capacity, active))
    }

    async fn admit(&self, admission: &Admission) -> Result<Inscription, ActivityError> {
        let user_id = user_column(admission.user_id)?;
        let mut tx = self.begin().await?;

        // Serializes every admission for this activity until commit
        let capacity = lock_activity(&mut tx, admission.activity_id).await?;

        let existing: Option<(i64, bool)> = sqlx::query_as(
            "SELECT id, is_activa FROM inscripciones WHERE usuario_id = $1 AND actividad_id = $2",
        )
        .bind(user_id)
        .bind(admission.activity_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| ActivityError::database(&e, "Failed to look up inscription"))?;

        if matches!(existing, Some((_, true))) {
            return Err(ActivityError::AlreadyEnrolled {
                user_id: admission.user_id,
                activity_id: admission.activity_id,
            });
        }

        let active = count_active(&mut tx, admission.activity_id).await?;
        if active >= i64::from(capacity) {
            tracing::info!(
                activity_id = admission.activity_id,
                capacity,
                active,
                "Admission refused, activity full"
            );
            return Err(ActivityError::CapacityExceeded {
                activity_id: admission.activity_id,
            });
        }

        let row = match existing {
            Some((id, _)) => sqlx::query(&format!(
                r"
                UPDATE inscripciones
                SET is_activa = TRUE,
                    fecha_inscripcion = $2,
                    suscripcion_id = COALESCE($3, suscripcion_id)
                WHERE id = $1
                RETURNING {INSCRIPTION_COLUMNS}
                "
            ))
            .bind(id)
            .bind(admission.at)
            .bind(admission.subscription_id.as_deref())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| ActivityError::database(&e, "Failed to reactivate inscription"))?,
            None => sqlx::query(&format!(
                r"
                INSERT INTO inscripciones (usuario_id, actividad_id, is_activa, suscripcion_id, fecha_inscripcion)
                VALUES ($1, $2, TRUE, $3, $4)
                RETURNING {INSCRIPTION_COLUMNS}
                "
            ))
            .bind(user_id)
            .bind(admission.activity_id)
            .bind(admission.subscription_id.as_deref())
            .bind(admission.at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| ActivityError::database(&e, "Failed to insert inscription"))?,
        };

        let inscription = inscription_from_row(&row)
            .map_err(|e| ActivityError::database(&e, "Failed to decode inscription"))?;
        commit(tx).await?;
        Ok(inscription)
    }

    async fn deactivate(&self, user_id: u64, activity_id: i64) -> Result<Inscription, ActivityError> {
        let row = sqlx::query(&format!(
            r"
            UPDATE inscripciones SET is_activa = FALSE
            WHERE usuario_id = $1 AND actividad_id = $2 AND is_activa
            RETURNING {INSCRIPTION_COLUMNS}
            "
        ))
        .bind(user_column(user_id)?)
        .bind(activity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ActivityError::database(&e, "Failed to deactivate inscription"))?
        .ok_or(ActivityError::InscriptionNotFound { user_id, activity_id })?;

        inscription_from_row(&row).map_err(|e| ActivityError::database(&e, "Failed to decode inscription"))
    }

    async fn deactivate_all_for_user(&self, user_id: u64) -> Result<Vec<i64>, ActivityError> {
        sqlx::query_scalar::<_, i64>(
            r"
            UPDATE inscripciones SET is_activa = FALSE
            WHERE usuario_id = $1 AND is_activa
            RETURNING actividad_id
            ",
        )
        .bind(user_column(user_id)?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ActivityError::database(&e, "Failed to deactivate inscriptions"))
    }

    async fn update_capacity(&self, activity_id: i64, capacity: i32) -> Result<Activity, ActivityError> {
        let mut tx = self.begin().await?;
        lock_activity(&mut tx, activity_id).await?;

        let active = count_active(&mut tx, activity_id).await?;
        if i64::from(capacity) < active {
            return Err(ActivityError::CapacityConflict {
                activity_id,
                requested: capacity,
                active,
            });
        }

        let row = sqlx::query(&format!(
            "UPDATE actividades SET cupo = $2 WHERE id_actividad = $1 RETURNING {ACTIVITY_COLUMNS}"
        ))
        .bind(activity_id)
        .bind(capacity)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| ActivityError::database(&e, "Failed to update capacity"))?;

        let activity =
            activity_from_row(&row).map_err(|e| ActivityError::database(&e, "Failed to decode activity"))?;
        commit(tx).await?;
        Ok(activity)
    }

    async fn active_for_user(&self, user_id: u64) -> Result<Vec<Inscription>, ActivityError> {
        let rows = sqlx::query(&format!(
            "SELECT {INSCRIPTION_COLUMNS} FROM inscripciones WHERE usuario_id = $1 AND is_activa ORDER BY id"
        ))
        .bind(user_column(user_id)?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ActivityError::database(&e, "Failed to list inscriptions"))?;

        rows.iter()
            .map(inscription_from_row)
            .collect::<Result<_, _>>()
            .map_err(|e| ActivityError::database(&e, "Failed to decode inscription"))
    }
}
