//! Notes REST API: CRUD plus PDF export.

use actix_web::{error::JsonPayloadError, web, HttpRequest, HttpResponse, Responder};

use super::{error_response, ApiResponse};
use crate::models::{NewNote, NotePatch};
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error));
    cfg.service(
        web::resource("/api/notes")
            .route(web::get().to(list_notes))
            .route(web::post().to(create_note)),
    );
    cfg.service(
        web::resource("/api/notes/{id}")
            .route(web::get().to(get_note))
            .route(web::patch().to(update_note))
            .route(web::delete().to(delete_note)),
    );
    cfg.service(web::resource("/api/notes/{id}/export").route(web::post().to(export_note)));
}

/// Malformed bodies get the same envelope as every other error.
fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let message = format!("Invalid request body: {}", err);
    actix_web::error::InternalError::from_response(err, HttpResponse::BadRequest().json(ApiResponse::err(message)))
        .into()
}

async fn list_notes(state: web::Data<AppState>) -> impl Responder {
    match state.notes.list().await {
        Ok(notes) => HttpResponse::Ok().json(ApiResponse::ok(notes)),
        Err(e) => error_response(&e),
    }
}

async fn get_note(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    match state.notes.get(&path).await {
        Ok(note) => HttpResponse::Ok().json(ApiResponse::ok(note)),
        Err(e) => error_response(&e),
    }
}

async fn create_note(state: web::Data<AppState>, body: web::Json<NewNote>) -> impl Responder {
    match state.notes.create(body.into_inner()).await {
        Ok(note) => HttpResponse::Created().json(ApiResponse::ok(note)),
        Err(e) => error_response(&e),
    }
}

async fn update_note(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<NotePatch>,
) -> impl Responder {
    match state.notes.update(&path, body.into_inner()).await {
        Ok(note) => HttpResponse::Ok().json(ApiResponse::ok(note)),
        Err(e) => error_response(&e),
    }
}

async fn delete_note(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    match state.notes.delete(&path).await {
        Ok(deleted) => HttpResponse::Ok().json(ApiResponse::ok(deleted)),
        Err(e) => error_response(&e),
    }
}

async fn export_note(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    match state.exporter.export_note(&path).await {
        Ok(result) => HttpResponse::Ok().json(ApiResponse::ok(result)),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::{exports, test_support};
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use serde_json::{json, Value};
    use std::sync::atomic::Ordering;
    use tempfile::tempdir;

    #[actix_web::test]
    async fn test_note_lifecycle_over_http() {
        let dir = tempdir().unwrap();
        let (state, _script) = test_support::state(dir.path());
        let app = test::init_service(App::new().app_data(state).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/notes")
            .set_json(json!({"title": "Groceries", "content": "milk", "tags": ["home"]}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], true);
        let id = body["data"]["id"].as_str().unwrap().to_string();
        assert_eq!(body["data"]["tags"], json!(["home"]));

        let req = test::TestRequest::patch()
            .uri(&format!("/api/notes/{}", id))
            .set_json(json!({"content": "milk, eggs"}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["title"], "Groceries");
        assert_eq!(body["data"]["content"], "milk, eggs");

        let req = test::TestRequest::get().uri("/api/notes").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"][0]["content"], "milk, eggs");

        let req = test::TestRequest::delete().uri(&format!("/api/notes/{}", id)).to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, json!({"success": true, "data": true}));

        let req = test::TestRequest::get().uri(&format!("/api/notes/{}", id)).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
    }

    #[actix_web::test]
    async fn test_invalid_input_is_rejected() {
        let dir = tempdir().unwrap();
        let (state, _script) = test_support::state(dir.path());
        let app = test::init_service(App::new().app_data(state).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/notes")
            .set_json(json!({"title": "  "}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/notes")
            .insert_header(("content-type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);

        let req = test::TestRequest::patch()
            .uri("/api/notes/missing")
            .set_json(json!({"title": "x"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_export_then_download() {
        let dir = tempdir().unwrap();
        let (state, _script) = test_support::state(dir.path());
        let note = state
            .notes
            .create(NewNote {
                title: "Report".into(),
                content: "Numbers".into(),
                tags: None,
            })
            .await
            .unwrap();
        let app = test::init_service(
            App::new()
                .app_data(state)
                .configure(config)
                .configure(exports::config),
        )
        .await;

        let req = test::TestRequest::post()
            .uri(&format!("/api/notes/{}/export", note.id))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert!(body["data"]["expiresAt"].is_string());
        let url = body["data"]["url"].as_str().unwrap();
        let path = url.strip_prefix(test_support::PUBLIC_URL).unwrap();

        let resp = test::call_service(&app, test::TestRequest::get().uri(path).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("content-type").unwrap(), "application/pdf");
        let pdf = test::read_body(resp).await;
        assert!(pdf.starts_with(b"%PDF"));
    }

    #[actix_web::test]
    async fn test_export_failures_map_to_status() {
        let dir = tempdir().unwrap();
        let (state, script) = test_support::state(dir.path());
        let note = state
            .notes
            .create(NewNote {
                title: "Report".into(),
                content: String::new(),
                tags: None,
            })
            .await
            .unwrap();
        let app = test::init_service(App::new().app_data(state).configure(config)).await;

        let req = test::TestRequest::post().uri("/api/notes/nope/export").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        script.fail.store(true, Ordering::SeqCst);
        let req = test::TestRequest::post()
            .uri(&format!("/api/notes/{}/export", note.id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Export failed during render");
    }
}
