use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let active_sessions = state.sessions.active_session_count();
    let missing = config.missing_credentials();

    HttpResponse::Ok().json(json!({
        "status": if missing.is_empty() { "healthy" } else { "degraded" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": overall_error_rate(&metrics),
            "active_sessions": active_sessions
        },
        "memory": get_memory_info(),
        "providers": {
            "completion": {
                "model": config.completion.model,
                "configured": !config.completion.api_key.is_empty()
            },
            "speech": {
                "region": config.speech.region,
                "configured": !config.speech.key.is_empty()
            },
            "missing_credentials": missing
        },
        "system": get_system_status(state.sessions.max_sessions(), active_sessions)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();

    let event_stats: Vec<_> = metrics
        .event_metrics
        .iter()
        .map(|(event, metric)| {
            json!({
                "event": event,
                "count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms()
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": overall_error_rate(&metrics),
            "active_sessions": state.sessions.active_session_count(),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "endpoints": endpoint_stats,
        "events": event_stats,
        "memory": get_memory_info(),
        "performance": {
            "max_concurrent_sessions": state.sessions.max_sessions()
        }
    }))
}

fn overall_error_rate(metrics: &AppMetrics) -> f64 {
    if metrics.request_count > 0 {
        metrics.error_count as f64 / metrics.request_count as f64
    } else {
        0.0
    }
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", process::id())) {
            let read_kb = |prefix: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(prefix))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .unwrap_or(0)
                    * 1024
            };

            return json!({
                "resident_memory_bytes": read_kb("VmRSS:"),
                "virtual_memory_bytes": read_kb("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "pid": process::id(),
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

fn get_system_status(max_sessions: usize, active_sessions: usize) -> serde_json::Value {
    let session_usage = if max_sessions > 0 {
        active_sessions as f64 / max_sessions as f64
    } else {
        0.0
    };

    let status = if session_usage > 0.9 {
        "high_load"
    } else if session_usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "session_usage_percent": (session_usage * 100.0).round(),
        "max_sessions": max_sessions,
        "current_sessions": active_sessions,
        "load_warnings": if session_usage > 0.8 {
            vec!["High session usage - consider increasing max_concurrent_sessions"]
        } else {
            vec![]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;
    use actix_web::{test as web_test, App};

    #[actix_web::test]
    async fn test_health_reports_sessions_and_credentials() {
        let root = tempfile::tempdir().unwrap();
        let state = web::Data::new(test_state(root.path()));
        let _session = state.sessions.create_session(None).unwrap();

        let app = web_test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/health", web::get().to(health_check))
                .route("/metrics", web::get().to(detailed_metrics)),
        )
        .await;

        let resp = web_test::call_service(&app, web_test::TestRequest::get().uri("/health").to_request()).await;
        assert!(resp.status().is_success());
        let body: serde_json::Value = web_test::read_body_json(resp).await;
        // Default config carries no provider keys
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["metrics"]["active_sessions"], 1);
        assert_eq!(body["system"]["session_usage_percent"], 50.0);

        state.record_event("init", 40, false);
        let resp = web_test::call_service(&app, web_test::TestRequest::get().uri("/metrics").to_request()).await;
        let body: serde_json::Value = web_test::read_body_json(resp).await;
        assert_eq!(body["events"][0]["event"], "init");
        assert_eq!(body["performance"]["max_concurrent_sessions"], 2);
    }

    #[test]
    fn test_system_status_thresholds() {
        assert_eq!(get_system_status(10, 2)["status"], "normal");
        assert_eq!(get_system_status(10, 8)["status"], "moderate_load");
        assert_eq!(get_system_status(0, 0)["session_usage_percent"], 0.0);
        let busy = get_system_status(10, 10);
        assert_eq!(busy["status"], "high_load");
        assert_eq!(busy["load_warnings"].as_array().unwrap().len(), 1);
    }
}
