use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::Request,
    http::{header, Method, StatusCode},
    middleware::{self, Next},
    response::Response,
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::error::route_not_found;
use crate::state::AppState;
use crate::{auth, history};

/// Every OPTIONS request is answered 204 with no body. Runs outside the CORS
/// layer so the allow-* headers are already attached.
async fn options_no_content(req: Request, next: Next) -> Response {
    let is_options = req.method() == Method::OPTIONS;
    let mut res = next.run(req).await;
    if is_options {
        *res.status_mut() = StatusCode::NO_CONTENT;
        *res.body_mut() = Body::empty();
        res.headers_mut().remove(header::CONTENT_LENGTH);
        res.headers_mut().remove(header::CONTENT_TYPE);
    }
    res
}

pub fn build_app(state: AppState) -> Router {
    let uploads = ServeDir::new(&state.config.upload_dir);

    Router::new()
        .merge(auth::router())
        .merge(history::router())
        .nest_service("/uploads", uploads)
        .fallback(route_not_found)
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        )
        .layer(middleware::from_fn(options_no_content))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router, host: &str, port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{host}:{port}").parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}


// Database-backed coverage: these run against a live Postgres pointed at by
// DATABASE_URL and are skipped by default (`cargo test -- --ignored`).
#[cfg(test)]
mod db_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::extract::FromRef;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::build_app;
    use super::tests::multipart_body;
    use crate::auth::claims::Role;
    use crate::auth::jwt::JwtKeys;
    use crate::config::{AppConfig, JwtConfig};
    use crate::state::AppState;
    use crate::storage::{DiskStorage, ImageStorage};

    const PHOTO_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nnot-a-real-png-but-bytes-enough";

    async fn live_state() -> AppState {
        dotenvy::dotenv().ok();
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let upload_dir =
            std::env::temp_dir().join(format!("brainomaly-uploads-{}", Uuid::new_v4()));
        let config = Arc::new(AppConfig {
            host: "127.0.0.1".into(),
            port: 0,
            database_url: database_url.clone(),
            jwt: JwtConfig {
                secret: "integration-secret".into(),
                ttl_hours: 1,
            },
            upload_dir: upload_dir.clone(),
        });
        let db = PgPoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await
            .expect("connect to database");
        sqlx::migrate!("./migrations").run(&db).await.expect("migrate");
        let storage =
            Arc::new(DiskStorage::new(&upload_dir).await.expect("storage")) as Arc<dyn ImageStorage>;
        AppState {
            db,
            config,
            storage,
        }
    }

    fn unique_email(tag: &str) -> String {
        format!("{tag}-{}@example.com", Uuid::new_v4())
    }

    fn token(state: &AppState, user_id: Uuid, role: Role) -> String {
        JwtKeys::from_ref(state)
            .sign(user_id, "integration@example.com", role)
            .expect("sign token")
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.clone().oneshot(req).await.expect("request");
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.expect("body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, body)
    }

    async fn post_json(app: &Router, path: &str, body: Value) -> (StatusCode, Value) {
        send(
            app,
            Request::post(path)
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn register_user(app: &Router, email: &str, password: &str) -> Uuid {
        let (status, body) = post_json(
            app,
            "/register",
            json!({ "name": "Integrasi", "email": email, "password": password }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["data"]["id"].as_str().expect("id").parse().expect("uuid")
    }

    async fn create_history(
        app: &Router,
        state: &AppState,
        user_id: Uuid,
        with_photo: bool,
    ) -> (Uuid, Option<String>) {
        let user_token = token(state, user_id, Role::User);
        let boundary = "XINTEGRATIONX";
        let mut parts: Vec<(&str, Option<&str>, &[u8])> = vec![
            ("result", None, b"anomali terdeteksi".as_slice()),
            ("score", None, b"87.5".as_slice()),
            ("notes", None, b"catatan awal".as_slice()),
        ];
        if with_photo {
            parts.push(("photo", Some("image/png"), PHOTO_BYTES));
        }
        let body = multipart_body(boundary, &parts);
        let (status, json) = send(
            app,
            Request::post("/user/history")
                .header("Authorization", format!("Bearer {user_token}"))
                .header(
                    "Content-Type",
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = json["data"]["id"].as_str().expect("id").parse().expect("uuid");
        let file = json["data"]["file"].as_str().map(|s| s.to_string());
        (id, file)
    }

    #[tokio::test]
    #[ignore]
    async fn duplicate_email_registers_only_one_user() {
        let state = live_state().await;
        let app = build_app(state.clone());

        let email = unique_email("dup");
        register_user(&app, &email, "secret1").await;

        let (status, body) = post_json(
            &app,
            "/register",
            json!({ "name": "Kedua", "email": email, "password": "secret2" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Email sudah terdaftar");

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = $1")
            .bind(&email)
            .fetch_one(&state.db)
            .await
            .expect("count");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    #[ignore]
    async fn login_failures_are_indistinguishable() {
        let state = live_state().await;
        let app = build_app(state);

        let email = unique_email("login");
        register_user(&app, &email, "benar-123").await;

        let (wrong_pw_status, wrong_pw) = post_json(
            &app,
            "/login",
            json!({ "email": email, "password": "salah-123" }),
        )
        .await;
        let (ghost_status, ghost) = post_json(
            &app,
            "/login",
            json!({ "email": unique_email("ghost"), "password": "salah-123" }),
        )
        .await;
        assert_eq!(wrong_pw_status, StatusCode::UNAUTHORIZED);
        assert_eq!(ghost_status, StatusCode::UNAUTHORIZED);
        assert_eq!(wrong_pw["message"], ghost["message"]);

        let (status, body) = post_json(
            &app,
            "/login",
            json!({ "email": email, "password": "benar-123" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["token"].as_str().is_some());
        let user = &body["data"]["user"];
        assert_eq!(user["email"], email);
        assert!(user.get("password").is_none());
        assert!(user.get("passwordHash").is_none());
    }

    #[tokio::test]
    #[ignore]
    async fn empty_history_list_is_200() {
        let state = live_state().await;
        let app = build_app(state.clone());

        let user_id = register_user(&app, &unique_email("empty"), "secret1").await;
        let user_token = token(&state, user_id, Role::User);

        let (status, body) = send(
            &app,
            Request::get("/user/history")
                .header("Authorization", format!("Bearer {user_token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!([]));
    }

    #[tokio::test]
    #[ignore]
    async fn scoped_update_does_not_cross_users() {
        let state = live_state().await;
        let app = build_app(state.clone());

        let bystander = register_user(&app, &unique_email("u1"), "secret1").await;
        let owner = register_user(&app, &unique_email("u2"), "secret1").await;
        let (history_id, _) = create_history(&app, &state, owner, false).await;
        let admin_token = token(&state, Uuid::new_v4(), Role::Admin);

        // Scoped to the wrong owner: a miss, not a cross-user update
        let (status, body) = send(
            &app,
            Request::put(format!("/admin/users/{bystander}/history/{history_id}"))
                .header("Authorization", format!("Bearer {admin_token}"))
                .header("Content-Type", "application/json")
                .body(Body::from(json!({ "result": "diubah" }).to_string()))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "History tidak ditemukan");

        let stored: String = sqlx::query_scalar("SELECT result FROM histories WHERE id = $1")
            .bind(history_id)
            .fetch_one(&state.db)
            .await
            .expect("fetch result");
        assert_eq!(stored, "anomali terdeteksi");

        // Scoped to the actual owner: the merge applies
        let (status, body) = send(
            &app,
            Request::put(format!("/admin/users/{owner}/history/{history_id}"))
                .header("Authorization", format!("Bearer {admin_token}"))
                .header("Content-Type", "application/json")
                .body(Body::from(json!({ "result": "diubah" }).to_string()))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["result"], "diubah");
        assert_eq!(body["data"]["notes"], "catatan awal");
    }

    #[tokio::test]
    #[ignore]
    async fn composite_view_round_trips_created_record() {
        let state = live_state().await;
        let app = build_app(state.clone());

        let email = unique_email("composite");
        let user_id = register_user(&app, &email, "secret1").await;
        let (history_id, file) = create_history(&app, &state, user_id, true).await;
        let file = file.expect("image url");
        assert!(file.starts_with("/uploads/"));

        let admin_token = token(&state, Uuid::new_v4(), Role::Admin);
        let (status, body) = send(
            &app,
            Request::get(format!("/admin/users/{user_id}/history"))
                .header("Authorization", format!("Bearer {admin_token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["user"]["email"], email);

        let histories = body["data"]["histories"].as_array().expect("histories");
        let entry = histories
            .iter()
            .find(|h| h["id"] == history_id.to_string())
            .expect("created record in composite view");
        assert_eq!(entry["result"], "anomali terdeteksi");
        assert_eq!(entry["score"], 87.5);
        assert_eq!(entry["notes"], "catatan awal");
        assert_eq!(entry["imageUrl"], file);
        assert!(entry["date"].as_str().is_some());
    }

    #[tokio::test]
    #[ignore]
    async fn delete_removes_record_and_stored_image() {
        let state = live_state().await;
        let app = build_app(state.clone());

        let user_id = register_user(&app, &unique_email("delete"), "secret1").await;
        let (history_id, file) = create_history(&app, &state, user_id, true).await;
        let name = file
            .as_deref()
            .and_then(crate::storage::file_name_from_url)
            .expect("file name");
        let path = state.config.upload_dir.join(name);
        assert!(path.exists());

        let admin_token = token(&state, Uuid::new_v4(), Role::Admin);
        let (status, body) = send(
            &app,
            Request::delete(format!("/history/{history_id}"))
                .header("Authorization", format!("Bearer {admin_token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "History dihapus");

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM histories WHERE id = $1")
            .bind(history_id)
            .fetch_one(&state.db)
            .await
            .expect("count");
        assert_eq!(count, 0);

        // Cleanup runs in a spawned task; give it a moment
        let mut gone = false;
        for _ in 0..20 {
            if !path.exists() {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(gone, "image file was not cleaned up");

        // A repeat delete is a plain miss
        let (status, _) = send(
            &app,
            Request::delete(format!("/history/{history_id}"))
                .header("Authorization", format!("Bearer {admin_token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
