//! Download endpoint for signed export links.

use actix_web::{web, HttpResponse, Responder};
use chrono::Utc;
use serde::Deserialize;

use super::ApiResponse;
use crate::export::{BlobError, LinkError};
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/exports/{key:.*}").route(web::get().to(download_export)));
}

#[derive(Debug, Deserialize)]
struct LinkQuery {
    expires: i64,
    signature: String,
}

async fn download_export(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<LinkQuery>,
) -> impl Responder {
    let key = path.into_inner();

    if let Err(e) = state.blobs.verify_link(&key, query.expires, &query.signature, Utc::now()) {
        log::debug!("[BLOBS] Refused link for {}: {}", key, e);
        let message = match e {
            LinkError::Expired => "Link has expired",
            LinkError::BadSignature => "Invalid link signature",
        };
        return HttpResponse::Forbidden().json(ApiResponse::err(message));
    }

    match state.blobs.read(&key).await {
        Ok((bytes, content_type)) => {
            let filename = key.rsplit('/').next().unwrap_or("export.pdf");
            HttpResponse::Ok()
                .content_type(content_type)
                .insert_header(("Content-Disposition", format!("inline; filename=\"{}\"", filename)))
                .body(bytes)
        }
        Err(BlobError::Missing(_)) | Err(BlobError::InvalidKey(_)) => {
            HttpResponse::NotFound().json(ApiResponse::err("Export not found"))
        }
        Err(e) => {
            log::error!("[BLOBS] Failed to read {}: {}", key, e);
            HttpResponse::InternalServerError().json(ApiResponse::err("Failed to read export"))
        }
    }
}
