use axum::{
    extract::{rejection::JsonRejection, FromRef, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::auth::{
    dto::{LoginRequest, PublicUser, RegisterRequest},
    jwt::JwtKeys,
    password::{hash_password, verify_password},
    repo::{NewUser, User},
};
use crate::error::{route_not_found, ApiError};
use crate::state::AppState;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register).fallback(route_not_found))
        .route("/login", post(login).fallback(route_not_found))
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(mut payload) =
        payload.map_err(|_| ApiError::BadRequest("Body JSON tidak valid".into()))?;
    payload.email = payload.email.trim().to_lowercase();

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(ApiError::BadRequest("Email tidak valid".into()));
    }
    if payload.password.len() < 6 {
        return Err(ApiError::BadRequest("Password minimal 6 karakter".into()));
    }

    if User::find_by_email(&state.db, &payload.email).await?.is_some() {
        warn!(email = %payload.email, "email already registered");
        return Err(ApiError::BadRequest("Email sudah terdaftar".into()));
    }

    let hash = hash_password(&payload.password)?;
    let user = User::create(
        &state.db,
        NewUser {
            name: &payload.name,
            email: &payload.email,
            password_hash: &hash,
            birth_place: payload.birth_place.as_deref(),
            birth_date: payload.birth_date.as_deref(),
            gender: payload.gender.as_deref(),
        },
    )
    .await?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Register sukses",
            "data": { "id": user.id },
        })),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(mut payload) =
        payload.map_err(|_| ApiError::BadRequest("Body JSON tidak valid".into()))?;
    payload.email = payload.email.trim().to_lowercase();

    // Unknown email and wrong password get the same answer on purpose
    let credential_failure = || ApiError::Unauthorized("Email atau password salah".into());

    let user = match User::find_by_email(&state.db, &payload.email).await? {
        Some(u) => u,
        None => {
            warn!(email = %payload.email, "login unknown email");
            return Err(credential_failure());
        }
    };

    if !verify_password(&payload.password, &user.password_hash)? {
        warn!(email = %payload.email, user_id = %user.id, "login invalid password");
        return Err(credential_failure());
    }

    let role: crate::auth::claims::Role = user.role.parse()?;
    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(user.id, &user.email, role)?;

    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(Json(json!({
        "message": "Login berhasil",
        "data": {
            "token": token,
            "user": PublicUser::from(user),
        },
    })))
}
