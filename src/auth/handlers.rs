use axum::{
    extract::{FromRef, Path, State},
    http::{header::SET_COOKIE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Json, Router,
};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthResponse, ForgotPasswordRequest, LoginRequest, MessageResponse, PublicUser,
            ResetPasswordRequest, SignupRequest, UpdatePasswordRequest, UserData, UserListResponse,
            UsersData,
        },
        jwt::{CurrentUser, JwtKeys, RequireAdmin, SESSION_COOKIE},
        validation::{normalize_email, validate_new_password},
    },
    error::AppError,
    extract::JsonBody,
    security::request_time::RequestTime,
    state::AppState,
    users::{Lookup, UserRecord},
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users/signup", post(signup))
        .route("/users/login", post(login))
        .route("/users/forgotPassword", post(forgot_password))
        .route("/users/resetPassword/:token", patch(reset_password))
        .route("/users/updateMyPassword", patch(update_my_password))
        .route("/users/me", get(get_me))
        .route("/users/deleteMe", delete(delete_me))
        .route("/users", get(list_users))
}

/// Signs a session token for `user` and returns it as body and cookie.
fn send_token(state: &AppState, user: UserRecord, status: StatusCode) -> Result<Response, AppError> {
    let keys = JwtKeys::from_ref(state);
    let token = keys.sign(user.id)?;

    let mut cookie = format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        keys.ttl.whole_seconds()
    );
    if !state.config.profile.is_development() {
        cookie.push_str("; Secure");
    }
    let cookie = HeaderValue::from_str(&cookie).map_err(anyhow::Error::from)?;

    let body = AuthResponse {
        status: "success",
        token,
        data: UserData {
            user: PublicUser::from(user),
        },
    };
    Ok((status, [(SET_COOKIE, cookie)], Json(body)).into_response())
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<SignupRequest>,
) -> Result<Response, AppError> {
    let user = state.credentials.register(payload.into()).await?;
    send_token(&state, user, StatusCode::CREATED)
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> Result<Response, AppError> {
    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return Err(AppError::BadRequest("Please provide email and password!".into()));
    }
    let LoginRequest { email, password } = payload;
    let user = state.credentials.authenticate(&email, password).await?;
    info!(user_id = %user.id, "user logged in");
    send_token(&state, user, StatusCode::OK)
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let email = normalize_email(&payload.email);
    let user = state
        .credentials
        .find_active(&Lookup::Email(email))
        .await?
        .ok_or(AppError::NotFound("There is no user with that email address."))?;

    let token = state.credentials.issue_reset_token(&user).await?;
    let reset_url = format!(
        "{}/api/v1/users/resetPassword/{}",
        state.config.public_base_url.trim_end_matches('/'),
        token.expose()
    );

    if let Err(e) = state.delivery.deliver(&user, &reset_url).await {
        error!(error = %e, user_id = %user.id, "reset link delivery failed");
        state.credentials.cancel_reset_token(&user).await?;
        return Err(AppError::Internal(anyhow::anyhow!(
            "There was an error sending the email. Try again later!"
        )));
    }

    Ok(Json(MessageResponse {
        status: "success",
        message: "Token sent to email!",
    }))
}

#[instrument(skip_all)]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    JsonBody(payload): JsonBody<ResetPasswordRequest>,
) -> Result<Response, AppError> {
    validate_new_password(&payload.password, &payload.password_confirm)?;
    let ResetPasswordRequest { password, .. } = payload;
    let user = state.credentials.consume_reset_token(&token, password).await?;
    send_token(&state, user, StatusCode::OK)
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_my_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    JsonBody(payload): JsonBody<UpdatePasswordRequest>,
) -> Result<Response, AppError> {
    let UpdatePasswordRequest {
        password_current,
        password,
        password_confirm,
    } = payload;
    if !state.credentials.verify_password(&user, password_current).await? {
        warn!("wrong current password");
        return Err(AppError::Unauthorized("Your current password is wrong."));
    }
    validate_new_password(&password, &password_confirm)?;
    let user = state.credentials.change_password(&user, password).await?;
    send_token(&state, user, StatusCode::OK)
}

#[instrument(skip_all)]
pub async fn get_me(CurrentUser(user): CurrentUser) -> Json<UserData> {
    Json(UserData {
        user: PublicUser::from(user),
    })
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn delete_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<StatusCode, AppError> {
    state.credentials.deactivate(&user).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip_all)]
pub async fn list_users(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    RequestTime(requested_at): RequestTime,
) -> Result<Json<UserListResponse>, AppError> {
    let users: Vec<PublicUser> = state
        .credentials
        .list_active()
        .await?
        .into_iter()
        .map(PublicUser::from)
        .collect();
    Ok(Json(UserListResponse {
        status: "success",
        requested_at,
        results: users.len(),
        data: UsersData { users },
    }))
}
