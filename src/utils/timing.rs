use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::info;

use crate::utils::logging::TIMING_TARGET;

#[derive(Debug)]
pub struct BatchTimer {
    batch: String,
    result_count: usize,
    started_at: DateTime<Utc>,
    started_perf: Instant,
    status: String,
    detail: Option<String>,
    completed: bool,
}

impl BatchTimer {
    pub fn new(batch: &str, result_count: usize) -> Self {
        BatchTimer {
            batch: batch.to_string(),
            result_count,
            started_at: Utc::now(),
            started_perf: Instant::now(),
            status: "success".to_string(),
            detail: None,
            completed: false,
        }
    }

    pub fn log_started(&self) {
        info!(
            target: TIMING_TARGET,
            "event=batch_started batch={} result_count={} started_at={}",
            self.batch,
            self.result_count,
            self.started_at.to_rfc3339()
        );
    }

    pub fn mark_status(&mut self, status: &str, detail: Option<String>) {
        self.status = status.to_string();
        self.detail = detail;
    }

    pub fn log_completed(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;
        let completed_at = Utc::now();
        let duration = self.started_perf.elapsed().as_secs_f64();
        info!(
            target: TIMING_TARGET,
            "event=batch_completed batch={} result_count={} started_at={} completed_at={} duration_s={:.3} status={} detail={}",
            self.batch,
            self.result_count,
            self.started_at.to_rfc3339(),
            completed_at.to_rfc3339(),
            duration,
            self.status,
            self.detail.clone().unwrap_or_default()
        );
    }
}

impl Drop for BatchTimer {
    fn drop(&mut self) {
        if !self.completed {
            self.mark_status("dropped", None);
            self.log_completed();
        }
    }
}

pub fn start_batch_timer(batch: &str, result_count: usize) -> BatchTimer {
    let timer = BatchTimer::new(batch, result_count);
    timer.log_started();
    timer
}

pub fn complete_batch_timer(timer: &mut BatchTimer, status: &str, detail: Option<String>) {
    timer.mark_status(status, detail);
    timer.log_completed();
}

pub async fn log_llm_timing<T, E, F, Fut>(
    provider: &str,
    model: &str,
    operation: &str,
    metadata: Option<JsonValue>,
    call: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let started_at = Utc::now();
    let started_perf = Instant::now();
    let metadata_text = metadata
        .as_ref()
        .map(|value| value.to_string())
        .unwrap_or_else(|| "{}".to_string());
    info!(
        target: TIMING_TARGET,
        "event=llm_request provider={} model={} operation={} started_at={} metadata={}",
        provider,
        model,
        operation,
        started_at.to_rfc3339(),
        metadata_text
    );

    let mut status = "success";
    let result = call().await;
    if result.is_err() {
        status = "error";
    }

    let completed_at = Utc::now();
    let duration = started_perf.elapsed().as_secs_f64();
    info!(
        target: TIMING_TARGET,
        "event=llm_response provider={} model={} operation={} completed_at={} duration_s={:.3} status={} metadata={}",
        provider,
        model,
        operation,
        completed_at.to_rfc3339(),
        duration,
        status,
        metadata_text
    );

    result
}
