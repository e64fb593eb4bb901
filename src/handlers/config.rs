use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Current effective configuration.
///
/// `live.api_key` is marked skip-on-serialize, so the credential can never
/// appear in this response no matter how it was loaded.
pub async fn get_config(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config
    }))
}
