//! # Context Storage Collaborator
//!
//! Read-only access to the main application's user data (profile, timetable,
//! reflections). The bridge never writes here and never depends on the reads
//! succeeding: context is a nice-to-have at session start, not a
//! prerequisite.
//!
//! Two implementations sit behind the `ContextStore` trait: an HTTP client
//! against the main app's internal read API (the deployed configuration) and
//! an in-memory store used in tests and when no service is configured.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ContextServiceConfig;
use crate::context::{ContextBundle, Reflection, TeacherProfile, TimetableEntry};
use crate::error::{AppError, AppResult};

/// Read API the bridge consumes. Every method is per-user and tolerant of
/// absent data.
#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn get_profile(&self, user_id: &str) -> AppResult<Option<TeacherProfile>>;
    async fn get_timetable(&self, user_id: &str) -> AppResult<Vec<TimetableEntry>>;
    async fn get_reflections(&self, user_id: &str) -> AppResult<Vec<Reflection>>;
}

/// Assemble the session's ContextBundle, best-effort.
///
/// A failed read degrades to that part being empty with a warning; this
/// function cannot fail, so a storage outage never blocks a conversation.
pub async fn build_context_bundle(store: &dyn ContextStore, user_id: &str) -> ContextBundle {
    let profile = match store.get_profile(user_id).await {
        Ok(profile) => profile,
        Err(err) => {
            warn!(user_id, "profile fetch failed, continuing without: {}", err);
            None
        }
    };

    let timetable = match store.get_timetable(user_id).await {
        Ok(timetable) => timetable,
        Err(err) => {
            warn!(user_id, "timetable fetch failed, continuing without: {}", err);
            Vec::new()
        }
    };

    let reflections = match store.get_reflections(user_id).await {
        Ok(reflections) => reflections,
        Err(err) => {
            warn!(
                user_id,
                "reflections fetch failed, continuing without: {}", err
            );
            Vec::new()
        }
    };

    let bundle = ContextBundle {
        profile,
        timetable,
        reflections,
    };
    debug!(
        user_id,
        has_profile = bundle.profile.is_some(),
        timetable_entries = bundle.timetable.len(),
        reflections = bundle.reflections.len(),
        "context bundle assembled"
    );
    bundle
}

/// Build the store the server should use: HTTP when a service is configured,
/// otherwise an empty in-memory store (every session gets a bare persona).
pub fn from_config(config: &ContextServiceConfig) -> AppResult<Arc<dyn ContextStore>> {
    match &config.base_url {
        Some(base_url) => Ok(Arc::new(HttpContextStore::new(
            base_url.clone(),
            Duration::from_secs(config.request_timeout_seconds),
        )?)),
        None => {
            warn!("no context service configured, sessions will start with empty context");
            Ok(Arc::new(MemoryContextStore::default()))
        }
    }
}

/// HTTP client for the main app's internal context endpoints.
pub struct HttpContextStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpContextStore {
    pub fn new(base_url: String, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("HTTP client build failed: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// GET one resource; 404 means "nothing stored", anything else
    /// non-successful is an error for the caller to degrade on.
    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        user_id: &str,
        resource: &str,
    ) -> AppResult<Option<T>> {
        let url = format!(
            "{}/api/internal/context/{}/{}",
            self.base_url, user_id, resource
        );
        let response = self.client.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AppError::Internal(format!(
                "context service returned {} for {}",
                response.status(),
                resource
            )));
        }

        Ok(Some(response.json::<T>().await?))
    }
}

#[async_trait]
impl ContextStore for HttpContextStore {
    async fn get_profile(&self, user_id: &str) -> AppResult<Option<TeacherProfile>> {
        self.fetch(user_id, "profile").await
    }

    async fn get_timetable(&self, user_id: &str) -> AppResult<Vec<TimetableEntry>> {
        Ok(self
            .fetch(user_id, "timetable")
            .await?
            .unwrap_or_default())
    }

    async fn get_reflections(&self, user_id: &str) -> AppResult<Vec<Reflection>> {
        Ok(self
            .fetch(user_id, "reflections")
            .await?
            .unwrap_or_default())
    }
}

/// In-memory store for tests and for running without a context service.
#[derive(Default)]
pub struct MemoryContextStore {
    profiles: RwLock<HashMap<String, TeacherProfile>>,
    timetables: RwLock<HashMap<String, Vec<TimetableEntry>>>,
    reflections: RwLock<HashMap<String, Vec<Reflection>>>,
}

impl MemoryContextStore {
    pub fn set_profile(&self, user_id: &str, profile: TeacherProfile) {
        self.profiles
            .write()
            .unwrap()
            .insert(user_id.to_string(), profile);
    }

    pub fn set_timetable(&self, user_id: &str, entries: Vec<TimetableEntry>) {
        self.timetables
            .write()
            .unwrap()
            .insert(user_id.to_string(), entries);
    }

    pub fn add_reflection(&self, user_id: &str, reflection: Reflection) {
        self.reflections
            .write()
            .unwrap()
            .entry(user_id.to_string())
            .or_default()
            .push(reflection);
    }
}

#[async_trait]
impl ContextStore for MemoryContextStore {
    async fn get_profile(&self, user_id: &str) -> AppResult<Option<TeacherProfile>> {
        Ok(self.profiles.read().unwrap().get(user_id).cloned())
    }

    async fn get_timetable(&self, user_id: &str) -> AppResult<Vec<TimetableEntry>> {
        Ok(self
            .timetables
            .read()
            .unwrap()
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_reflections(&self, user_id: &str) -> AppResult<Vec<Reflection>> {
        Ok(self
            .reflections
            .read()
            .unwrap()
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }
}
