//! # Application State
//!
//! Shared by every HTTP handler and WebSocket actor:
//!
//! - **config**: immutable after startup
//! - **sessions**: the registry of live interview sessions
//! - **metrics**: HTTP request counters and socket event counters, updated
//!   by the metrics middleware and the socket actors
//! - **start_time**: for uptime reporting

use crate::config::AppConfig;
use crate::session::SessionRegistry;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub sessions: Arc<SessionRegistry>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub start_time: Instant,
}

/// Counters collected since server start.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Keyed by `"{METHOD} {path}"`
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
    /// Keyed by socket event name (`init`, `message`, `export`)
    pub event_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, sessions: Arc<SessionRegistry>) -> Self {
        Self {
            config: Arc::new(config),
            sessions,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    /// Record one finished HTTP request.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.request_count += 1;
        if is_error {
            metrics.error_count += 1;
        }
        metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default()
            .record(duration_ms, is_error);
    }

    /// Record one handled socket event.
    pub fn record_event(&self, event: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics
            .event_metrics
            .entry(event.to_string())
            .or_default()
            .record(duration_ms, is_error);
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    fn record(&mut self, duration_ms: u64, is_error: bool) {
        self.request_count += 1;
        self.total_duration_ms += duration_ms;
        if is_error {
            self.error_count += 1;
        }
    }

    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of failed requests, from 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
