use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Effective configuration with secrets reduced to a configured flag.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port,
                "static_dir": config.server.static_dir.display().to_string()
            },
            "completion": {
                "base_url": config.completion.base_url,
                "model": config.completion.model,
                "timeout_secs": config.completion.timeout_secs,
                "api_key_configured": !config.completion.api_key.is_empty()
            },
            "speech": {
                "region": config.speech.region,
                "synthesis_timeout_secs": config.speech.synthesis_timeout_secs,
                "recognition_timeout_secs": config.speech.recognition_timeout_secs,
                "key_configured": !config.speech.key.is_empty()
            },
            "storage": {
                "root": config.storage.root.display().to_string(),
                "download_timeout_secs": config.storage.download_timeout_secs
            },
            "performance": {
                "max_concurrent_sessions": config.performance.max_concurrent_sessions
            }
        }
    })))
}
