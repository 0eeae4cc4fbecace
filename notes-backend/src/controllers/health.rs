use actix_web::{web, HttpResponse, Responder};
use std::collections::BTreeMap;

use crate::AppState;

/// Version from Cargo.toml, available at compile time
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn config_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/health").route(web::get().to(health_check)));
    cfg.service(web::resource("/api/version").route(web::get().to(get_version)));
}

async fn health_check(state: web::Data<AppState>) -> impl Responder {
    let cache = state.notes.cache();
    let layers: BTreeMap<String, usize> = cache.layer_sizes().into_iter().collect();
    let pool = state.exporter.pool();

    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "version": VERSION,
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "cache": {
            "stats": cache.stats(),
            "layers": layers,
            "default_ttl_ms": cache.default_ttl().as_millis() as u64,
        },
        "render_pool": {
            "size": pool.size(),
            "in_use": pool.in_use(),
            "engines_created": pool.engines_created(),
        }
    }))
}

async fn get_version() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "version": VERSION
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::test_support;
    use actix_web::{test, App};
    use tempfile::tempdir;

    #[actix_web::test]
    async fn test_health_reports_cache_and_pool() {
        let dir = tempdir().unwrap();
        let (state, _script) = test_support::state(dir.path());
        let app = test::init_service(App::new().app_data(state.clone()).configure(config_routes)).await;

        // one miss, one hit
        state.notes.list().await.unwrap();
        state.notes.list().await.unwrap();

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], VERSION);
        assert_eq!(body["cache"]["stats"]["hits"], 1);
        assert_eq!(body["cache"]["stats"]["misses"], 1);
        assert_eq!(body["cache"]["layers"]["lru"], 1);
        assert_eq!(body["render_pool"]["size"], 2);
    }
}
