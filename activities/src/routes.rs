//! HTTP surface of the activities service.

use crate::service::{ActivityService, NewInscription};
use crate::store::Seats;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
};
use gym_core::domain::{Activity, Inscription};
use gym_web::{AppError, WebResult};
use serde::Deserialize;

/// Body of `PUT /actividades/:id/cupo`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CapacityRequest {
    /// New capacity.
    pub cupo: i32,
}

/// Build the activities router.
///
/// # Routes
///
/// - `POST /inscripciones` - Enrol a user
/// - `DELETE /inscripciones/:usuario_id/:actividad_id` - Release a seat
/// - `GET /usuarios/:usuario_id/inscripciones` - Active inscriptions of a user
/// - `PUT /actividades/:id/cupo` - Change capacity
/// - `GET /actividades/:id/lugares` - Remaining seats
pub fn activity_routes(service: ActivityService) -> Router {
    Router::new()
        .route("/inscripciones", post(create_inscription))
        .route(
            "/inscripciones/:usuario_id/:actividad_id",
            delete(delete_inscription),
        )
        .route("/usuarios/:usuario_id/inscripciones", get(user_inscriptions))
        .route("/actividades/:id/cupo", put(update_capacity))
        .route("/actividades/:id/lugares", get(remaining_seats))
        .with_state(service)
}

/// Enrol a user.
///
/// # Endpoint
///
/// ```text
/// POST /inscripciones
/// { "usuario_id": 42, "actividad_id": 7 }
/// ```
///
/// `201` with the inscription, `409 CAPACITY_EXCEEDED` when full.
async fn create_inscription(
    State(service): State<ActivityService>,
    Json(request): Json<NewInscription>,
) -> WebResult<(StatusCode, Json<Inscription>)> {
    let inscription = service.create_inscription(request).await?;
    Ok((StatusCode::CREATED, Json(inscription)))
}

async fn delete_inscription(
    State(service): State<ActivityService>,
    Path((user_id, activity_id)): Path<(u64, i64)>,
) -> WebResult<StatusCode> {
    service.deactivate_inscription(user_id, activity_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn user_inscriptions(
    State(service): State<ActivityService>,
    Path(user_id): Path<u64>,
) -> WebResult<Json<Vec<Inscription>>> {
    Ok(Json(service.inscriptions_for_user(user_id).await?))
}

/// Change capacity; `409 CAPACITY_CONFLICT` when below the active count.
async fn update_capacity(
    State(service): State<ActivityService>,
    Path(activity_id): Path<i64>,
    Json(request): Json<CapacityRequest>,
) -> WebResult<Json<Activity>> {
    Ok(Json(service.update_capacity(activity_id, request.cupo).await?))
}

async fn remaining_seats(
    State(service): State<ActivityService>,
    Path(activity_id): Path<i64>,
) -> Result<Json<Seats>, AppError> {
    Ok(Json(service.remaining_seats(activity_id).await?))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::memory::InMemoryInscriptionStore;
    use axum_test::TestServer;
    use gym_runtime::PermissiveUserDirectory;
    use gym_testing::{RecordingPublisher, test_clock};
    use serde_json::{Value, json};
    use std::sync::Arc;

    async fn server(capacity: i32) -> TestServer {
        let store = Arc::new(InMemoryInscriptionStore::new());
        store
            .insert_activity(Activity {
                id: 7,
                title: "Crossfit".into(),
                description: String::new(),
                capacity,
                day: "jueves".into(),
                starts_at: "07:00".into(),
                ends_at: "08:00".into(),
                instructor: "Sol".into(),
                category: "fuerza".into(),
                branch_id: Some(2),
                active: true,
            })
            .await;
        let service = ActivityService::new(
            store,
            Arc::new(PermissiveUserDirectory),
            Arc::new(RecordingPublisher::new()),
            Arc::new(test_clock()),
        );
        TestServer::new(activity_routes(service)).unwrap()
    }

    #[tokio::test]
    async fn full_activity_answers_capacity_exceeded() {
        let server = server(1).await;

        let first = server
            .post("/inscripciones")
            .json(&json!({"usuario_id": 1, "actividad_id": 7}))
            .await;
        first.assert_status(StatusCode::CREATED);
        assert_eq!(first.json::<Value>()["is_activa"], true);

        let second = server
            .post("/inscripciones")
            .json(&json!({"usuario_id": 2, "actividad_id": 7}))
            .await;
        second.assert_status(StatusCode::CONFLICT);
        assert_eq!(second.json::<Value>()["code"], "CAPACITY_EXCEEDED");
    }

    #[tokio::test]
    async fn shrinking_below_enrolment_answers_capacity_conflict() {
        let server = server(3).await;
        for user in 1..=2 {
            server
                .post("/inscripciones")
                .json(&json!({"usuario_id": user, "actividad_id": 7}))
                .await
                .assert_status(StatusCode::CREATED);
        }

        let response = server.put("/actividades/7/cupo").json(&json!({"cupo": 1})).await;
        response.assert_status(StatusCode::CONFLICT);
        assert_eq!(response.json::<Value>()["code"], "CAPACITY_CONFLICT");

        let seats = server.get("/actividades/7/lugares").await.json::<Value>();
        assert_eq!(seats["lugares_disponibles"], 1);
    }

    #[tokio::test]
    async fn releasing_a_seat_frees_it() {
        let server = server(1).await;
        server
            .post("/inscripciones")
            .json(&json!({"usuario_id": 5, "actividad_id": 7}))
            .await
            .assert_status(StatusCode::CREATED);

        let held = server.get("/usuarios/5/inscripciones").await.json::<Vec<Value>>();
        assert_eq!(held.len(), 1);

        server
            .delete("/inscripciones/5/7")
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server
            .delete("/inscripciones/5/7")
            .await
            .assert_status(StatusCode::NOT_FOUND);

        let seats = server.get("/actividades/7/lugares").await.json::<Value>();
        assert_eq!(seats["lugares_disponibles"], 1);
    }

    #[tokio::test]
    async fn negative_capacity_is_a_validation_error() {
        let server = server(1).await;
        let response = server.put("/actividades/7/cupo").json(&json!({"cupo": -1})).await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_activity_is_not_found() {
        server(1)
            .await
            .get("/actividades/99/lugares")
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
}
