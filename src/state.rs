//! # Application State Management
//!
//! Shared state accessed by every HTTP handler and WebSocket actor: the
//! configuration, the session manager, the context store, and the metrics
//! counters.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - Allows many handlers to share ownership of the same data
//! - Cleans up automatically when the last reference is dropped
//!
//! ### RwLock (Reader-Writer Lock)
//! - Many readers OR one writer at a time
//! - Handlers mostly read (config, metrics snapshots), so reads stay cheap
//!
//! ### Arc<RwLock<T>> Pattern
//! Thread-safe shared mutable state; every mutable field below uses it, and
//! the immutable ones (start time, manager, store) ride plain Arcs.

use crate::config::AppConfig;
use crate::session::SessionManager;
use crate::storage::ContextStore;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state shared across all handlers.
///
/// ## Thread Safety Pattern:
/// Cloning an AppState clones Arcs, not data; all clones observe the same
/// configuration, sessions, and metrics.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<RwLock<AppConfig>>,

    /// Live voice session registry, shared with every WebSocket actor
    pub session_manager: Arc<SessionManager>,

    /// Read access to user profile/schedule/reflection data
    pub context_store: Arc<dyn ContextStore>,

    /// Performance metrics (updated by every request and session)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started (Instant is Copy, no lock needed)
    pub start_time: Instant,
}

/// Counters collected across all HTTP requests and voice sessions.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Current number of active voice sessions
    pub active_sessions: u32,

    /// Voice sessions opened since server start
    pub total_sessions: u64,

    /// Client audio frames forwarded to the backend
    pub frames_forwarded: u64,

    /// Backend events relayed to clients
    pub events_relayed: u64,

    /// Backend failures (session open failures and mid-session errors)
    pub backend_errors: u64,

    /// Detailed metrics for each API endpoint (URL path)
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    /// Number of requests to this specific endpoint
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    /// Number of errors that occurred for this endpoint
    pub error_count: u64,
}

impl AppState {
    /// Create the shared state from a loaded configuration and context store.
    pub fn new(config: AppConfig, context_store: Arc<dyn ContextStore>) -> Self {
        let session_manager = Arc::new(SessionManager::new(
            config.session.max_concurrent_sessions,
        ));

        Self {
            config: Arc::new(RwLock::new(config)),
            session_manager,
            context_store,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the read lock immediately; AppConfig is cheap to
    /// clone.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    /// Increment the total error counter (called when any request fails).
    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// A voice session opened: bump both the live gauge and the lifetime
    /// total.
    pub fn increment_active_sessions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_sessions += 1;
        metrics.total_sessions += 1;
    }

    /// A voice session closed. Guarded against underflow so a double close
    /// cannot wrap the gauge.
    pub fn decrement_active_sessions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    /// One client audio frame was forwarded to the backend.
    pub fn record_frame_forwarded(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.frames_forwarded += 1;
    }

    /// One backend event was relayed to a client.
    pub fn record_event_relayed(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.events_relayed += 1;
    }

    /// A backend session failed to open or errored mid-conversation.
    pub fn record_backend_error(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.backend_errors += 1;
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    ///
    /// Clones the data so no lock is held while the HTTP response is built.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_sessions: metrics.active_sessions,
            total_sessions: metrics.total_sessions,
            frames_forwarded: metrics.frames_forwarded,
            events_relayed: metrics.events_relayed,
            backend_errors: metrics.backend_errors,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time for this endpoint in milliseconds.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate for this endpoint as a fraction (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
