//! # Session REST API Handlers
//!
//! Read-only views of the session registry plus transcript export for
//! sessions driven over the WebSocket.
//!
//! ## Available Endpoints:
//! - `GET /sessions` - Registry summary with one entry per live session
//! - `GET /sessions/{id}` - One session's state and progress
//! - `POST /sessions/{id}/export` - Export the session's transcript

use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn list_sessions(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let summary = state.sessions.get_sessions_summary().await;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "summary": summary
    })))
}

pub async fn get_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    let session = state
        .sessions
        .get_session(&session_id)
        .ok_or_else(|| AppError::NotFound(format!("session '{}'", session_id)))?;

    Ok(HttpResponse::Ok().json(session.info().await))
}

pub async fn export_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    let session = state
        .sessions
        .get_session(&session_id)
        .ok_or_else(|| AppError::NotFound(format!("session '{}'", session_id)))?;

    let export_path = session.export_transcript().await?;

    Ok(HttpResponse::Ok().json(json!({
        "session_id": session_id,
        "path": session.storage().public_path(&export_path)
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::settings::tests::sample_settings;
    use crate::state::tests::test_state;
    use actix_web::{http::StatusCode, test, App};

    #[actix_web::test]
    async fn test_session_endpoints() {
        let root = tempfile::tempdir().unwrap();
        let state = web::Data::new(test_state(root.path()));
        let session = state.sessions.create_session(Some("abc".to_string())).unwrap();

        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/sessions", web::get().to(list_sessions))
                .route("/sessions/{id}", web::get().to(get_session))
                .route("/sessions/{id}/export", web::post().to(export_session)),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/sessions").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["summary"]["total_sessions"], 1);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/sessions/nope").to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        // Export needs an initialized session
        let resp = test::call_service(
            &app,
            test::TestRequest::post().uri("/sessions/abc/export").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        session.initialize(sample_settings()).await.unwrap();
        let resp = test::call_service(
            &app,
            test::TestRequest::post().uri("/sessions/abc/export").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        let path = body["path"].as_str().unwrap();
        assert!(path.starts_with("/temp/abc/chats/"));
        assert!(path.ends_with(".json"));

        let resp = test::call_service(&app, test::TestRequest::get().uri("/sessions/abc").to_request()).await;
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["state"], "ready");
        assert_eq!(body["candidate"], "Ada Lovelace");
    }
}
