use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// Analysis history record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct History {
    pub id: Uuid,
    pub user_id: Uuid,
    pub result: String,
    pub score: f64,
    pub notes: Option<String>,
    pub image_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
}

/// History row joined to its owning user, for the admin listing.
#[derive(Debug, Clone, FromRow)]
pub struct HistoryOwnerRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub result: String,
    pub score: f64,
    pub notes: Option<String>,
    pub image_url: Option<String>,
    pub date: OffsetDateTime,
    pub name: String,
    pub email: String,
}

/// Partial update; `None` keeps the stored value.
#[derive(Debug, Default)]
pub struct HistoryPatch<'a> {
    pub result: Option<&'a str>,
    pub score: Option<f64>,
    pub notes: Option<&'a str>,
    pub image_url: Option<&'a str>,
}

const HISTORY_COLUMNS: &str = "id, user_id, result, score, notes, image_url, date";

pub async fn insert(
    db: &PgPool,
    user_id: Uuid,
    result: &str,
    score: f64,
    notes: Option<&str>,
    image_url: Option<&str>,
) -> anyhow::Result<History> {
    let row = sqlx::query_as::<_, History>(&format!(
        r#"
        INSERT INTO histories (user_id, result, score, notes, image_url)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {HISTORY_COLUMNS}
        "#
    ))
    .bind(user_id)
    .bind(result)
    .bind(score)
    .bind(notes)
    .bind(image_url)
    .fetch_one(db)
    .await?;
    Ok(row)
}

/// All records with their owner's name and email, newest first.
pub async fn list_all_with_owner(db: &PgPool) -> anyhow::Result<Vec<HistoryOwnerRow>> {
    let rows = sqlx::query_as::<_, HistoryOwnerRow>(
        r#"
        SELECT h.id, h.user_id, h.result, h.score, h.notes, h.image_url, h.date,
               u.name, u.email
        FROM histories h
        JOIN users u ON u.id = h.user_id
        ORDER BY h.date DESC
        "#,
    )
    .fetch_all(db)
    .await?;
    Ok(rows)
}

/// One user's records, newest first. An empty list is not an error.
pub async fn list_by_user(db: &PgPool, user_id: Uuid) -> anyhow::Result<Vec<History>> {
    let rows = sqlx::query_as::<_, History>(&format!(
        r#"
        SELECT {HISTORY_COLUMNS}
        FROM histories
        WHERE user_id = $1
        ORDER BY date DESC
        "#
    ))
    .bind(user_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

/// Merge `patch` into a record. With `owner` set, a record belonging to a
/// different user is treated as missing rather than updated across users.
pub async fn update(
    db: &PgPool,
    id: Uuid,
    owner: Option<Uuid>,
    patch: HistoryPatch<'_>,
) -> anyhow::Result<Option<History>> {
    let row = sqlx::query_as::<_, History>(&format!(
        r#"
        UPDATE histories
        SET result = COALESCE($3, result),
            score = COALESCE($4, score),
            notes = COALESCE($5, notes),
            image_url = COALESCE($6, image_url)
        WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2)
        RETURNING {HISTORY_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(owner)
    .bind(patch.result)
    .bind(patch.score)
    .bind(patch.notes)
    .bind(patch.image_url)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

/// Delete a record, with the same ownership scoping as [`update`]. Returns
/// the deleted row so the caller can clean up its image file.
pub async fn delete(db: &PgPool, id: Uuid, owner: Option<Uuid>) -> anyhow::Result<Option<History>> {
    let row = sqlx::query_as::<_, History>(&format!(
        r#"
        DELETE FROM histories
        WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2)
        RETURNING {HISTORY_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(owner)
    .fetch_optional(db)
    .await?;
    Ok(row)
}
