use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use bytes::Bytes;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::{
    claims::Role,
    dto::PublicUser,
    extractors::{AdminUser, AuthUser, RegularUser},
    repo::User,
};
use crate::error::{route_not_found, ApiError};
use crate::history::dto::{HistoryItem, HistoryWithOwner, UpdateHistoryRequest};
use crate::history::repo::{self, HistoryPatch};
use crate::state::AppState;
use crate::storage;

const MAX_IMAGE_BYTES: usize = 1024 * 1024; // 1 MiB

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/admin/history",
            get(list_all_history).fallback(route_not_found),
        )
        .route(
            "/admin/users/:user_id/history",
            get(user_detail_with_history).fallback(route_not_found),
        )
        .route(
            "/admin/users/:user_id/history/:history_id",
            put(update_user_history)
                .delete(delete_user_history)
                .fallback(route_not_found),
        )
}

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/user/history",
            axum::routing::post(create_history)
                .get(own_history)
                .fallback(route_not_found),
        )
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
}

pub fn generic_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/history/user/:user_id",
            get(history_by_user).fallback(route_not_found),
        )
        .route(
            "/history/:history_id",
            put(update_history).delete(delete_history).fallback(route_not_found),
        )
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        _ => None,
    }
}

/// POST /user/history (multipart: result, score, notes?, photo?)
/// The record is always attributed to the authenticated caller; a userId in
/// the form data is ignored.
#[instrument(skip(state, multipart))]
pub async fn create_history(
    State(state): State<AppState>,
    RegularUser(claims): RegularUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let mut result: Option<String> = None;
    let mut score_raw: Option<String> = None;
    let mut notes: Option<String> = None;
    let mut photo: Option<(Bytes, &'static str)> = None;

    let bad_body = || ApiError::BadRequest("Body multipart tidak valid".into());

    while let Some(field) = multipart.next_field().await.map_err(|_| bad_body())? {
        let name = field.name().map(|s| s.to_string());
        match name.as_deref() {
            Some("result") => result = Some(field.text().await.map_err(|_| bad_body())?),
            Some("score") => score_raw = Some(field.text().await.map_err(|_| bad_body())?),
            Some("notes") => notes = Some(field.text().await.map_err(|_| bad_body())?),
            Some("photo") => {
                let content_type = field.content_type().unwrap_or("").to_string();
                let Some(ext) = ext_from_mime(&content_type) else {
                    warn!(content_type = %content_type, "upload rejected");
                    return Err(ApiError::BadRequest(
                        "Hanya file gambar yang diperbolehkan".into(),
                    ));
                };
                let data = field
                    .bytes()
                    .await
                    .map_err(|_| ApiError::BadRequest("Ukuran gambar maksimal 1MB".into()))?;
                if data.len() > MAX_IMAGE_BYTES {
                    return Err(ApiError::BadRequest("Ukuran gambar maksimal 1MB".into()));
                }
                photo = Some((data, ext));
            }
            _ => {}
        }
    }

    let result = match result.as_deref().map(str::trim) {
        Some(r) if !r.is_empty() => r.to_string(),
        _ => return Err(ApiError::BadRequest("Field result wajib diisi".into())),
    };
    let score = match score_raw.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s
            .parse::<f64>()
            .map_err(|_| ApiError::BadRequest("Field score harus berupa angka".into()))?,
        _ => return Err(ApiError::BadRequest("Field score wajib diisi".into())),
    };

    let image_url = match photo {
        Some((body, ext)) => {
            let name = format!("{}.{}", Uuid::new_v4(), ext);
            state.storage.save(&name, body).await?;
            Some(storage::public_url(&name))
        }
        None => None,
    };

    let history = repo::insert(
        &state.db,
        claims.sub,
        &result,
        score,
        notes.as_deref(),
        image_url.as_deref(),
    )
    .await?;

    info!(history_id = %history.id, user_id = %claims.sub, "history created");
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Hasil analisis ditambahkan",
            "data": { "id": history.id, "file": history.image_url },
        })),
    ))
}

/// GET /admin/history — every record, annotated with its owner.
#[instrument(skip(state))]
pub async fn list_all_history(
    State(state): State<AppState>,
    AdminUser(_claims): AdminUser,
) -> Result<Json<Value>, ApiError> {
    let rows = repo::list_all_with_owner(&state.db).await?;
    let items: Vec<HistoryWithOwner> = rows.into_iter().map(Into::into).collect();
    Ok(Json(json!({
        "message": "Daftar history berhasil diambil",
        "data": items,
    })))
}

/// GET /user/history — the caller's own records.
#[instrument(skip(state))]
pub async fn own_history(
    State(state): State<AppState>,
    RegularUser(claims): RegularUser,
) -> Result<Json<Value>, ApiError> {
    let items = repo::list_by_user(&state.db, claims.sub).await?;
    Ok(Json(json!({
        "message": "Daftar history berhasil diambil",
        "data": items,
    })))
}

/// GET /history/user/:user_id — self, or any user when the caller is admin.
#[instrument(skip(state))]
pub async fn history_by_user(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    if claims.role != Role::Admin && claims.sub != user_id {
        return Err(ApiError::Forbidden("Akses ditolak".into()));
    }
    let items = repo::list_by_user(&state.db, user_id).await?;
    Ok(Json(json!({
        "message": "Daftar history berhasil diambil",
        "data": items,
    })))
}

/// GET /admin/users/:user_id/history — profile plus full history.
#[instrument(skip(state))]
pub async fn user_detail_with_history(
    State(state): State<AppState>,
    AdminUser(_claims): AdminUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let user = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User tidak ditemukan".into()))?;

    let histories: Vec<HistoryItem> = repo::list_by_user(&state.db, user_id)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(json!({
        "message": "Detail user berhasil diambil",
        "data": {
            "user": PublicUser::from(user),
            "histories": histories,
        },
    })))
}

async fn apply_update(
    state: &AppState,
    history_id: Uuid,
    owner: Option<Uuid>,
    payload: Result<Json<UpdateHistoryRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(payload) =
        payload.map_err(|_| ApiError::BadRequest("Body JSON tidak valid".into()))?;

    if payload.result.as_deref().is_some_and(|r| r.trim().is_empty()) {
        return Err(ApiError::BadRequest("Field result wajib diisi".into()));
    }

    let patch = HistoryPatch {
        result: payload.result.as_deref(),
        score: payload.score,
        notes: payload.notes.as_deref(),
        image_url: payload.image_url.as_deref(),
    };

    let updated = repo::update(&state.db, history_id, owner, patch)
        .await?
        .ok_or_else(|| ApiError::NotFound("History tidak ditemukan".into()))?;

    info!(history_id = %updated.id, "history updated");
    Ok(Json(json!({
        "message": "History diperbarui",
        "data": updated,
    })))
}

/// PUT /history/:history_id — admin update, no owner check.
#[instrument(skip(state, payload))]
pub async fn update_history(
    State(state): State<AppState>,
    AdminUser(_claims): AdminUser,
    Path(history_id): Path<Uuid>,
    payload: Result<Json<UpdateHistoryRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    apply_update(&state, history_id, None, payload).await
}

/// PUT /admin/users/:user_id/history/:history_id — a record owned by a
/// different user is a 404, never a cross-user update.
#[instrument(skip(state, payload))]
pub async fn update_user_history(
    State(state): State<AppState>,
    AdminUser(_claims): AdminUser,
    Path((user_id, history_id)): Path<(Uuid, Uuid)>,
    payload: Result<Json<UpdateHistoryRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    apply_update(&state, history_id, Some(user_id), payload).await
}

async fn apply_delete(
    state: &AppState,
    history_id: Uuid,
    owner: Option<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let deleted = repo::delete(&state.db, history_id, owner)
        .await?
        .ok_or_else(|| ApiError::NotFound("History tidak ditemukan".into()))?;

    // Best-effort image cleanup; the record deletion already succeeded, so a
    // failure here is only logged.
    if let Some(name) = deleted
        .image_url
        .as_deref()
        .and_then(storage::file_name_from_url)
    {
        let storage = state.storage.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            if let Err(e) = storage.delete(&name).await {
                warn!(error = %e, file = %name, "failed to delete history image");
            }
        });
    }

    info!(history_id = %deleted.id, "history deleted");
    Ok(Json(json!({ "message": "History dihapus" })))
}

/// DELETE /history/:history_id — admin delete, no owner check.
#[instrument(skip(state))]
pub async fn delete_history(
    State(state): State<AppState>,
    AdminUser(_claims): AdminUser,
    Path(history_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    apply_delete(&state, history_id, None).await
}

/// DELETE /admin/users/:user_id/history/:history_id — ownership-scoped.
#[instrument(skip(state))]
pub async fn delete_user_history(
    State(state): State<AppState>,
    AdminUser(_claims): AdminUser,
    Path((user_id, history_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>, ApiError> {
    apply_delete(&state, history_id, Some(user_id)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ext_from_mime_accepts_only_images() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("image/webp"), None);
        assert_eq!(ext_from_mime("application/pdf"), None);
        assert_eq!(ext_from_mime(""), None);
    }
}
