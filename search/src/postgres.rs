//! Relational fallback over the activities schema.
//!
//! Text matching uses `ILIKE '%term%'` across title, description, category
//! and instructor. Seats left are computed as `cupo` minus the activity's
//! active inscriptions. Only activities live here: a request for another
//! document type yields an empty page.

use crate::backend::ActivitySource;
use crate::document::{SearchDocument, SearchRequest};
use crate::error::SearchError;
use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgRow};

const SELECT: &str = "SELECT a.id_actividad, a.titulo, a.descripcion, a.cupo, a.dia, \
     a.horario_inicio, a.horario_final, a.instructor, a.categoria, a.sucursal_id, \
     COALESCE(s.nombre, '') AS sucursal_nombre, \
     a.cupo - (SELECT COUNT(*) FROM inscripciones i \
               WHERE i.actividad_id = a.id_actividad AND i.is_activa) AS cupo_disponible";

const FROM: &str = "FROM actividades a LEFT JOIN sucursales s ON s.id_sucursal = a.sucursal_id";

const WHERE: &str = "WHERE a.deleted_at IS NULL \
     AND ($1::TEXT IS NULL OR a.titulo ILIKE $1 OR a.descripcion ILIKE $1 \
          OR a.categoria ILIKE $1 OR a.instructor ILIKE $1) \
     AND ($2::TEXT IS NULL OR a.categoria = $2) \
     AND ($3::TEXT IS NULL OR a.dia = $3) \
     AND ($4::TEXT IS NULL OR a.instructor = $4) \
     AND ($5::TEXT IS NULL OR a.sucursal_id::TEXT = $5)";

/// Activity source over the shared relational schema.
#[derive(Clone, Debug)]
pub struct PostgresActivitySource {
    pool: PgPool,
}

impl PostgresActivitySource {
    /// Wrap a pool; the schema comes from `gym_postgres::migrate`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// `%term%` with `LIKE` wildcards in the term escaped.
fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Whether the request can match an activity at all.
fn targets_activities(request: &SearchRequest) -> bool {
    if !request.kind.is_empty() && request.kind != "activity" {
        return false;
    }
    // Activities carry no subscription state and are never premium-only
    !request.filters.contains_key("estado")
        && request.filters.get("requiere_premium").is_none_or(|v| v != "true")
}

fn document_from_row(row: &PgRow) -> Result<SearchDocument, sqlx::Error> {
    let id: i64 = row.try_get("id_actividad")?;
    let cupo: i32 = row.try_get("cupo")?;
    let sucursal_id: Option<i64> = row.try_get("sucursal_id")?;
    let seats: i64 = row.try_get("cupo_disponible")?;

    Ok(SearchDocument {
        id: id.to_string(),
        kind: "activity".to_string(),
        titulo: row.try_get("titulo")?,
        descripcion: row.try_get("descripcion")?,
        categoria: row.try_get("categoria")?,
        instructor: row.try_get("instructor")?,
        dia: row.try_get("dia")?,
        horario_inicio: row.try_get("horario_inicio")?,
        horario_final: row.try_get("horario_final")?,
        sucursal_id: sucursal_id.map(|id| id.to_string()).unwrap_or_default(),
        sucursal_nombre: row.try_get("sucursal_nombre")?,
        cupo: Some(i64::from(cupo)),
        cupo_disponible: Some(seats.max(0)),
        ..SearchDocument::default()
    })
}

#[async_trait]
impl ActivitySource for PostgresActivitySource {
    async fn search(&self, request: &SearchRequest) -> Result<(Vec<SearchDocument>, i64), SearchError> {
        if !targets_activities(request) {
            return Ok((Vec::new(), 0));
        }

        let query = request.query.trim();
        let text = (!query.is_empty()).then(|| like_pattern(query));
        let filter = |key: &str| request.filters.get(key).cloned();

        let rows = sqlx::query(&format!(
            "{SELECT}, COUNT(*) OVER () AS total_count {FROM} {WHERE} \
             ORDER BY a.titulo, a.id_actividad LIMIT $6 OFFSET $7"
        ))
        .bind(&text)
        .bind(filter("categoria"))
        .bind(filter("dia"))
        .bind(filter("instructor"))
        .bind(filter("sucursal_id"))
        .bind(request.limit())
        .bind(request.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SearchError::database(&e, "Failed to search activities"))?;

        let total = match rows.first() {
            Some(row) => row
                .try_get::<i64, _>("total_count")
                .map_err(|e| SearchError::database(&e, "Failed to decode total"))?,
            // Past the last page the window count is unavailable
            None if request.offset() > 0 => sqlx::query_scalar::<_, i64>(&format!(
                "SELECT COUNT(*) {FROM} {WHERE}"
            ))
            .bind(&text)
            .bind(filter("categoria"))
            .bind(filter("dia"))
            .bind(filter("instructor"))
            .bind(filter("sucursal_id"))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SearchError::database(&e, "Failed to count activities"))?,
            None => 0,
        };

        let documents = rows
            .iter()
            .map(document_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SearchError::database(&e, "Failed to decode activity"))?;
        Ok((documents, total))
    }

    async fn activity(&self, id: &str) -> Result<Option<SearchDocument>, SearchError> {
        let Ok(activity_id) = id.parse::<i64>() else {
            return Ok(None);
        };

        let row = sqlx::query(&format!(
            "{SELECT} {FROM} WHERE a.id_actividad = $1 AND a.deleted_at IS NULL"
        ))
        .bind(activity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SearchError::database(&e, "Failed to load activity"))?;

        row.as_ref()
            .map(document_from_row)
            .transpose()
            .map_err(|e| SearchError::database(&e, "Failed to decode activity"))
    }

    async fn activities(&self) -> Result<Vec<SearchDocument>, SearchError> {
        let rows = sqlx::query(&format!(
            "{SELECT} {FROM} WHERE a.deleted_at IS NULL ORDER BY a.id_actividad"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SearchError::database(&e, "Failed to list activities"))?;

        rows.iter()
            .map(document_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SearchError::database(&e, "Failed to decode activity"))
    }
}
