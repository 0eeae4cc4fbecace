pub mod exports;
pub mod health;
pub mod notes;

use actix_web::HttpResponse;
use serde::Serialize;

use crate::error::NotesError;

/// Envelope shared by every JSON endpoint
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Map a domain error to its HTTP status. Store and export internals stay in
/// the log; clients only see the category (and the export stage).
pub fn error_response(err: &NotesError) -> HttpResponse {
    match err {
        NotesError::NotFound(_) | NotesError::Validation(_) => {}
        other => log::error!("[API] {}", other),
    }
    match err {
        NotesError::NotFound(id) => HttpResponse::NotFound().json(ApiResponse::err(format!("Note not found: {}", id))),
        NotesError::Validation(msg) => HttpResponse::BadRequest().json(ApiResponse::err(msg.clone())),
        NotesError::StoreUnavailable(_) => {
            HttpResponse::ServiceUnavailable().json(ApiResponse::err("Note store unavailable"))
        }
        NotesError::ExportFailed { stage, .. } => {
            HttpResponse::BadGateway().json(ApiResponse::err(format!("Export failed during {}", stage)))
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use actix_web::web;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Arc;

    use crate::config::Config;
    use crate::export::pool::tests::{FakeFactory, EngineScript};
    use crate::AppState;

    pub(crate) const PUBLIC_URL: &str = "http://notes.test";

    /// App state over a scratch directory with a scripted render engine.
    pub(crate) fn state(dir: &Path) -> (web::Data<AppState>, Arc<EngineScript>) {
        let vars: HashMap<&str, String> = HashMap::from([
            ("DATABASE_URL", dir.join("notes.db").to_string_lossy().to_string()),
            ("BLOB_DIR", dir.join("blobs").to_string_lossy().to_string()),
            ("PUBLIC_URL", PUBLIC_URL.to_string()),
            ("EXPORT_SIGNING_SECRET", "route-test-secret".to_string()),
            ("APP_ENV", "test".to_string()),
        ]);
        let config = Config::from_lookup(|name| vars.get(name).cloned()).unwrap();
        let script = Arc::new(EngineScript::default());
        let engines = Arc::new(FakeFactory { script: Arc::clone(&script) });
        (web::Data::new(AppState::build(config, engines).unwrap()), script)
    }
}
