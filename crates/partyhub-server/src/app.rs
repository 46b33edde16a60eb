use axum::{
    routing::{get, post},
    Router,
};
use partyhub_core::PartyhubConfig;
use partyhub_jobs::{ContentGenerationOrchestrator, RetentionCleanup};
use partyhub_scheduler::Scheduler;
use std::sync::Arc;

/// Shared state handed to every Axum handler.
pub struct AppState {
    pub config: PartyhubConfig,
    pub scheduler: Arc<Scheduler>,
    pub generation: Arc<ContentGenerationOrchestrator>,
    pub cleanup: Arc<RetentionCleanup>,
}

impl AppState {
    pub fn new(
        config: PartyhubConfig,
        scheduler: Arc<Scheduler>,
        generation: Arc<ContentGenerationOrchestrator>,
        cleanup: Arc<RetentionCleanup>,
    ) -> Self {
        Self {
            config,
            scheduler,
            generation,
            cleanup,
        }
    }
}

/// Assemble the admin router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/jobs", get(crate::http::jobs::list_jobs))
        .route("/jobs/{name}/run", post(crate::http::jobs::run_job))
        .route("/generate", post(crate::http::content::generate))
        .route("/cleanup/preview", get(crate::http::content::cleanup_preview))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use partyhub_agent::{OpenAiProvider, PromptTemplates};
    use partyhub_content::{db::init_db, SqliteContentStore};
    use partyhub_jobs::GenerationSettings;
    use partyhub_scheduler::Job;
    use rusqlite::Connection;
    use tower::ServiceExt;

    use super::*;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        conn
    }

    /// State with an unconfigured provider, empty catalog and the given jobs.
    pub fn state_with(jobs: Vec<Job>) -> Arc<AppState> {
        let store = Arc::new(SqliteContentStore::new(memory_db()));
        let provider = Arc::new(OpenAiProvider::new(
            String::new(),
            None,
            "gpt-test".to_string(),
            Duration::from_secs(1),
        ));
        let generation = Arc::new(ContentGenerationOrchestrator::new(
            provider,
            Arc::new(PromptTemplates::default()),
            store.clone(),
            store,
            GenerationSettings::from_config(&Default::default()),
        ));
        let cleanup = Arc::new(RetentionCleanup::new(memory_db(), 6));

        let scheduler = Arc::new(Scheduler::new(Duration::from_secs(1)));
        for job in jobs {
            scheduler.add_job(job).unwrap();
        }
        Arc::new(AppState::new(
            PartyhubConfig::default(),
            scheduler,
            generation,
            cleanup,
        ))
    }

    /// Send one request through the router; returns status and JSON body.
    pub async fn send(
        router: Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }
}
