use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{head, post};
use axum::{Extension, Json, Router, middleware};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use courier_types::api::{
    Claims, CreateUserRequest, CreateUserResponse, DeleteUserRequest, FindUserResponse,
    LoginRequest, LoginResponse, LogoutRequest, LogoutResponse, MessagePayload,
    SendMessageResponse,
};

use crate::error::ApiError;
use crate::middleware::require_auth;
use crate::service::DeliveryService;

pub type AppState = Arc<DeliveryService>;

/// Full route table. Account creation, login, and the health probe are
/// public; everything else sits behind the bearer middleware.
pub fn router(service: AppState) -> Router {
    let public = Router::new()
        .route("/users", post(create_user))
        .route("/login", post(login))
        .route("/health", head(health))
        .with_state(service.clone());

    let protected = Router::new()
        .route(
            "/users",
            axum::routing::get(find_user).delete(delete_user),
        )
        .route("/logout", post(logout))
        .route("/messages", post(send_message))
        .layer(middleware::from_fn_with_state(service.clone(), require_auth))
        .with_state(service);

    public.merge(protected)
}

/// Missing or mistyped body fields are a plain validation error (400), not
/// the extractor's default rejection.
fn parse_body<T: DeserializeOwned>(body: serde_json::Value) -> Result<T, ApiError> {
    serde_json::from_value(body).map_err(|_| ApiError::Validation("Validation error.".into()))
}

pub async fn create_user(
    State(service): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let req: CreateUserRequest = parse_body(body)?;
    let user_id = service.create_user(&req)?;
    Ok((StatusCode::CREATED, Json(CreateUserResponse { user_id })))
}

#[derive(Debug, Deserialize)]
pub struct FindUserQuery {
    pub username: Option<String>,
}

pub async fn find_user(
    State(service): State<AppState>,
    Query(query): Query<FindUserQuery>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let username = query
        .username
        .ok_or_else(|| ApiError::Validation("Validation error.".into()))?;

    let (user_id, public_key) = service.find_user(&username)?;
    Ok(Json(FindUserResponse {
        user_id,
        public_key,
    }))
}

pub async fn delete_user(
    State(service): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let req: DeleteUserRequest = parse_body(body)?;
    // Deleting an already-absent user is an idempotent no-op.
    service.delete_user(req.user_id)?;
    Ok(Json(serde_json::json!({ "msg": "User deleted." })))
}

pub async fn login(
    State(service): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let req: LoginRequest = parse_body(body)?;
    let (user_id, token) = service.login(&req).await?;
    Ok(Json(LoginResponse {
        msg: "Login successful.".into(),
        user_id,
        token,
    }))
}

pub async fn logout(
    State(service): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let req: LogoutRequest = parse_body(body)?;
    service.logout(&req.username)?;
    Ok(Json(LogoutResponse {
        msg: "Logout successful.".into(),
        username: req.username,
    }))
}

pub async fn send_message(
    State(service): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let msg: MessagePayload = parse_body(body)?;
    let outcome = service.send_message(&claims, &msg).await?;
    Ok(Json(SendMessageResponse {
        msg: "Message processed.".into(),
        status: outcome.as_str().into(),
    }))
}

pub async fn health() -> StatusCode {
    StatusCode::OK
}
