use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::history::repo::{History, HistoryOwnerRow};

/// Owner projection attached to each record in the admin listing.
#[derive(Debug, Serialize)]
pub struct HistoryOwner {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryWithOwner {
    pub id: Uuid,
    pub user_id: Uuid,
    pub result: String,
    pub score: f64,
    pub notes: Option<String>,
    pub image_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    pub user: HistoryOwner,
}

impl From<HistoryOwnerRow> for HistoryWithOwner {
    fn from(r: HistoryOwnerRow) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            result: r.result,
            score: r.score,
            notes: r.notes,
            image_url: r.image_url,
            date: r.date,
            user: HistoryOwner {
                name: r.name,
                email: r.email,
            },
        }
    }
}

/// Record projection used inside the admin composite view.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub id: Uuid,
    pub result: String,
    pub score: f64,
    pub notes: Option<String>,
    pub image_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
}

impl From<History> for HistoryItem {
    fn from(h: History) -> Self {
        Self {
            id: h.id,
            result: h.result,
            score: h.score,
            notes: h.notes,
            image_url: h.image_url,
            date: h.date,
        }
    }
}

/// Request body for (partial) history updates.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateHistoryRequest {
    pub result: Option<String>,
    pub score: Option<f64>,
    pub notes: Option<String>,
    pub image_url: Option<String>,
}
