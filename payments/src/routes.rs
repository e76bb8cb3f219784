//! HTTP surface of the payments service.

use crate::service::{NewPayment, PaymentService, StatusUpdate};
use crate::store::PaymentFilter;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use gym_core::domain::{Payment, PaymentStatus};
use gym_web::{AppError, WebResult};
use serde::Deserialize;

/// Build the payments router.
///
/// # Routes
///
/// - `POST /payments` - Record a payment (`201`, or `200` for an idempotent replay)
/// - `GET /payments` - List, filtered by `user_id`, `entity_type`, `entity_id`, `status`
/// - `GET /payments/:id` - Payment details
/// - `PUT /payments/:id/status` - Change status (`PATCH` accepted too)
/// - `POST /payments/:id/refund` - Refund a completed payment
/// - `GET /users/:user_id/payments` - Payments of a user
pub fn payment_routes(service: PaymentService) -> Router {
    Router::new()
        .route("/payments", post(create_payment).get(list_payments))
        .route("/payments/:id", get(get_payment))
        .route("/payments/:id/status", axum::routing::put(update_status).patch(update_status))
        .route("/payments/:id/refund", post(refund_payment))
        .route("/users/:user_id/payments", get(user_payments))
        .with_state(service)
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    user_id: Option<String>,
    entity_type: Option<String>,
    entity_id: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RefundRequest {
    #[serde(default)]
    amount: Option<f64>,
}

/// Record a payment.
///
/// # Endpoint
///
/// ```text
/// POST /payments
/// {
///   "entity_type": "subscription", "entity_id": "65f1...", "user_id": "42",
///   "amount": 5000, "currency": "ARS", "payment_method": "cash",
///   "idempotency_key": "sub-65f1-first"
/// }
/// ```
async fn create_payment(
    State(service): State<PaymentService>,
    Json(request): Json<NewPayment>,
) -> WebResult<(StatusCode, Json<Payment>)> {
    let recorded = service.create(request).await?;
    let status = if recorded.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(recorded.payment)))
}

async fn list_payments(
    State(service): State<PaymentService>,
    Query(query): Query<ListQuery>,
) -> WebResult<Json<Vec<Payment>>> {
    let status = query
        .status
        .as_deref()
        .map(|s| PaymentStatus::parse(s).ok_or_else(|| AppError::bad_request(format!("unknown status {s:?}"))))
        .transpose()?;
    let filter = PaymentFilter {
        user_id: query.user_id,
        entity_type: query.entity_type,
        entity_id: query.entity_id,
        status,
    };
    Ok(Json(service.list(&filter).await?))
}

async fn get_payment(State(service): State<PaymentService>, Path(id): Path<String>) -> WebResult<Json<Payment>> {
    Ok(Json(service.get(&id).await?))
}

async fn update_status(
    State(service): State<PaymentService>,
    Path(id): Path<String>,
    Json(update): Json<StatusUpdate>,
) -> WebResult<Json<Payment>> {
    Ok(Json(service.update_status(&id, update).await?))
}

async fn refund_payment(
    State(service): State<PaymentService>,
    Path(id): Path<String>,
    body: Option<Json<RefundRequest>>,
) -> WebResult<Json<Payment>> {
    let amount = body.and_then(|Json(request)| request.amount);
    Ok(Json(service.refund(&id, amount).await?))
}

async fn user_payments(
    State(service): State<PaymentService>,
    Path(user_id): Path<String>,
) -> WebResult<Json<Vec<Payment>>> {
    Ok(Json(service.for_user(&user_id).await?))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::memory::InMemoryPaymentStore;
    use axum_test::TestServer;
    use gym_testing::{RecordingPublisher, test_clock};
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn server() -> (TestServer, Arc<RecordingPublisher>) {
        let publisher = Arc::new(RecordingPublisher::new());
        let service = PaymentService::new(
            Arc::new(InMemoryPaymentStore::new()),
            publisher.clone(),
            Arc::new(test_clock()),
        );
        (TestServer::new(payment_routes(service)).unwrap(), publisher)
    }

    fn body(key: &str, amount: f64) -> Value {
        json!({
            "entity_type": "subscription",
            "entity_id": "sub-1",
            "user_id": "42",
            "amount": amount,
            "currency": "ARS",
            "payment_method": "cash",
            "idempotency_key": key
        })
    }

    #[tokio::test]
    async fn replay_answers_ok_with_the_same_payment() {
        let (server, publisher) = server();

        let first = server.post("/payments").json(&body("k-1", 5000.0)).await;
        first.assert_status(StatusCode::CREATED);
        let second = server.post("/payments").json(&body("k-1", 5000.0)).await;
        second.assert_status_ok();

        assert_eq!(first.json::<Value>()["id"], second.json::<Value>()["id"]);
        assert_eq!(publisher.count("payment.created.subscription"), 1);
    }

    #[tokio::test]
    async fn reused_key_with_new_amount_is_conflict() {
        let (server, _) = server();
        server.post("/payments").json(&body("k-2", 5000.0)).await;

        let response = server.post("/payments").json(&body("k-2", 100.0)).await;
        response.assert_status(StatusCode::CONFLICT);
        assert_eq!(response.json::<Value>()["code"], "IDEMPOTENCY_CONFLICT");
    }

    #[tokio::test]
    async fn status_flow_over_http() {
        let (server, publisher) = server();
        let created = server.post("/payments").json(&body("k-3", 5000.0)).await.json::<Value>();
        let id = created["id"].as_str().unwrap();

        let completed = server
            .put(&format!("/payments/{id}/status"))
            .json(&json!({"status": "completed", "transaction_id": "tx-1"}))
            .await;
        completed.assert_status_ok();
        assert_eq!(completed.json::<Value>()["status"], "completed");

        server
            .put(&format!("/payments/{id}/status"))
            .json(&json!({"status": "pending"}))
            .await
            .assert_status(StatusCode::CONFLICT);

        server.post(&format!("/payments/{id}/refund")).await.assert_status_ok();
        assert_eq!(
            publisher.routing_keys(),
            vec![
                "payment.created.subscription",
                "payment.completed.subscription",
                "payment.refunded.subscription"
            ]
        );
    }

    #[tokio::test]
    async fn listing_filters_by_user_and_status() {
        let (server, _) = server();
        server.post("/payments").json(&body("k-4", 5000.0)).await;

        assert_eq!(server.get("/users/42/payments").await.json::<Vec<Value>>().len(), 1);
        assert_eq!(server.get("/users/7/payments").await.json::<Vec<Value>>().len(), 0);
        assert_eq!(
            server.get("/payments?status=completed").await.json::<Vec<Value>>().len(),
            0
        );
        server.get("/payments?status=lost").await.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_payment_is_not_found() {
        let (server, _) = server();
        server.get("/payments/nope").await.assert_status(StatusCode::NOT_FOUND);
    }
}
