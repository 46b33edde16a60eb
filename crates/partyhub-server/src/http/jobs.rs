use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use partyhub_scheduler::{JobInfo, SchedulerError};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use super::{api_error, ApiError};
use crate::app::AppState;

/// GET /jobs: registered jobs in registration order.
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobInfo>> {
    Json(state.scheduler.get_jobs())
}

/// POST /jobs/{name}/run: run a job now and wait for it to finish.
pub async fn run_job(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    info!(job = %name, "manual run requested");
    state
        .scheduler
        .run_job_now(&name)
        .await
        .map_err(scheduler_error)?;

    let info = state.scheduler.get_jobs().into_iter().find(|j| j.name == name);
    Ok(Json(json!({ "status": "ok", "job": info })))
}

fn scheduler_error(e: SchedulerError) -> ApiError {
    let status = match &e {
        SchedulerError::JobNotFound { .. } => StatusCode::NOT_FOUND,
        SchedulerError::JobAlreadyRunning { .. } => StatusCode::CONFLICT,
        SchedulerError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        SchedulerError::JobFailed { .. }
        | SchedulerError::InvalidSchedule { .. }
        | SchedulerError::DuplicateJob { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(status = status.as_u16(), error = %e, "manual run rejected");
    api_error(status, e)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use partyhub_scheduler::{job_fn, Job, JobError};
    use tokio::sync::Notify;

    use crate::app::{build_router, test_support::*};

    fn ok_job(name: &str) -> Job {
        Job::new(name, "0 3 * * *", job_fn(|_ctx| async { Ok(()) }))
    }

    #[tokio::test]
    async fn lists_jobs_in_registration_order() {
        let state = state_with(vec![ok_job("zeta"), ok_job("alpha")]);
        let (status, body) = send(build_router(state), "GET", "/jobs", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["name"], "zeta");
        assert_eq!(body[1]["name"], "alpha");
        assert_eq!(body[1]["run_count"], 0);
    }

    #[tokio::test]
    async fn run_maps_scheduler_errors_to_status_codes() {
        let failing = Job::new(
            "broken",
            "0 3 * * *",
            job_fn(|_ctx| async { Err(JobError::Failed(anyhow_err())) }),
        );
        let state = state_with(vec![ok_job("fine"), failing]);
        let router = build_router(Arc::clone(&state));

        let (status, body) = send(router.clone(), "POST", "/jobs/fine/run", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["job"]["run_count"], 1);
        assert_eq!(body["job"]["last_status"], "succeeded");

        let (status, _) = send(router.clone(), "POST", "/jobs/missing/run", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(router.clone(), "POST", "/jobs/broken/run", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("broken"));

        let _ = state.scheduler.stop();
        let (status, _) = send(router, "POST", "/jobs/fine/run", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn overlapping_manual_run_conflicts() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let (st, rl) = (Arc::clone(&started), Arc::clone(&release));
        let slow = Job::new(
            "slow",
            "0 3 * * *",
            job_fn(move |_ctx| {
                let (st, rl) = (Arc::clone(&st), Arc::clone(&rl));
                async move {
                    st.notify_one();
                    rl.notified().await;
                    Ok(())
                }
            }),
        );
        let router = build_router(state_with(vec![slow]));

        let first = tokio::spawn(send(router.clone(), "POST", "/jobs/slow/run", None));
        started.notified().await;

        let (status, _) = send(router, "POST", "/jobs/slow/run", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        release.notify_one();
        let (status, _) = first.await.unwrap();
        assert_eq!(status, StatusCode::OK);
    }

    fn anyhow_err() -> anyhow::Error {
        anyhow::anyhow!("disk full")
    }
}
