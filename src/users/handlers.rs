use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    error::AppError,
    state::AppState,
    users::{
        dto::{
            CreateUserRequest, LoginRequest, MessageResponse, PublicUser, UpdateUserRequest,
            UserResponse,
        },
        services,
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
}

/// Ids that are not integers cannot name a row.
fn parse_id(raw: &str) -> Result<i64, AppError> {
    raw.parse::<i64>()
        .map_err(|_| AppError::NotFound("User not found".into()))
}

/// A request with no JSON body at all is read as `{}`; anything that claims
/// to be JSON but does not decode is rejected.
fn body_or_empty<T: Default>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    match payload {
        Ok(Json(body)) => Ok(body),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
        Err(rejection) => Err(AppError::Validation(rejection.body_text())),
    }
}

fn body_required<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::Validation(rejection.body_text()))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, AppError> {
    let req = body_or_empty(payload)?;
    let user = services::authenticate(state.users.as_ref(), req).await?;
    Ok(Json(UserResponse::ok(user, "Login successful")))
}

#[instrument(skip(state))]
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<PublicUser>>, AppError> {
    let users = services::list_users(state.users.as_ref()).await?;
    Ok(Json(users))
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let req = body_or_empty(payload)?;
    let user = services::create_user(state.users.as_ref(), req).await?;
    Ok((
        StatusCode::CREATED,
        Json(UserResponse::ok(user, "User created successfully")),
    ))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PublicUser>, AppError> {
    let user = services::get_user(state.users.as_ref(), parse_id(&id)?).await?;
    Ok(Json(user))
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, AppError> {
    let id = parse_id(&id)?;
    let req = body_required(payload)?;
    let user = services::update_user(state.users.as_ref(), id, req).await?;
    Ok(Json(UserResponse::ok(user, "User updated successfully")))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    services::delete_user(state.users.as_ref(), parse_id(&id)?).await?;
    Ok(Json(MessageResponse {
        success: true,
        message: "User deleted successfully",
    }))
}
