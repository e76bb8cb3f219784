//! HTTP surface of the subscriptions service.

use crate::service::{CancelReason, NewSubscription, SubscriptionService};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use gym_core::domain::{Plan, Subscription};
use gym_web::WebResult;

/// Build the subscriptions router.
///
/// # Routes
///
/// - `POST /subscriptions` - Create a subscription awaiting payment
/// - `GET /subscriptions/:id` - Subscription details
/// - `POST /subscriptions/:id/cancel` - Cancel on request
/// - `GET /users/:usuario_id/subscriptions` - Subscriptions of a user
/// - `GET /users/:usuario_id/subscriptions/active` - Current active subscription
/// - `GET /plans`, `GET /plans/:id` - Plan catalogue
pub fn subscription_routes(service: SubscriptionService) -> Router {
    Router::new()
        .route("/subscriptions", post(create_subscription))
        .route("/subscriptions/:id", get(get_subscription))
        .route("/subscriptions/:id/cancel", post(cancel_subscription))
        .route("/users/:usuario_id/subscriptions", get(user_subscriptions))
        .route("/users/:usuario_id/subscriptions/active", get(active_subscription))
        .route("/plans", get(list_plans))
        .route("/plans/:id", get(get_plan))
        .with_state(service)
}

/// Create a subscription.
///
/// # Endpoint
///
/// ```text
/// POST /subscriptions
/// { "usuario_id": "42", "plan_id": "PLAN_BASIC", "metodo_pago": "cash" }
/// ```
///
/// `201` with `estado: "pending_payment"`.
async fn create_subscription(
    State(service): State<SubscriptionService>,
    Json(request): Json<NewSubscription>,
) -> WebResult<(StatusCode, Json<Subscription>)> {
    let subscription = service.create(request).await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

async fn get_subscription(
    State(service): State<SubscriptionService>,
    Path(id): Path<String>,
) -> WebResult<Json<Subscription>> {
    Ok(Json(service.get(&id).await?))
}

async fn cancel_subscription(
    State(service): State<SubscriptionService>,
    Path(id): Path<String>,
) -> WebResult<Json<Subscription>> {
    Ok(Json(service.cancel(&id, CancelReason::Request).await?))
}

async fn user_subscriptions(
    State(service): State<SubscriptionService>,
    Path(user_id): Path<u64>,
) -> WebResult<Json<Vec<Subscription>>> {
    Ok(Json(service.for_user(user_id).await?))
}

async fn active_subscription(
    State(service): State<SubscriptionService>,
    Path(user_id): Path<u64>,
) -> WebResult<Json<Subscription>> {
    Ok(Json(service.active_for_user(user_id).await?))
}

async fn list_plans(State(service): State<SubscriptionService>) -> WebResult<Json<Vec<Plan>>> {
    Ok(Json(service.plans().await?))
}

async fn get_plan(
    State(service): State<SubscriptionService>,
    Path(id): Path<String>,
) -> WebResult<Json<Plan>> {
    Ok(Json(service.plan(&id).await?))
}
