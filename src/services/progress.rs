use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use utoipa::ToSchema;

const LOG_INTERVAL: Duration = Duration::from_secs(3);
const LOG_PERCENT_STEP: f64 = 5.0;

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub job_id: String,
    pub total_bytes: u64,
    pub uploaded_bytes: u64,
    pub percent: f64,
    pub elapsed_secs: f64,
    pub bytes_per_sec: f64,
    pub done: bool,
}

/// Byte counter for one upload job. Emits a log line when enough time or
/// progress has passed since the last one, so large uploads stay visible
/// without flooding.
pub struct ProgressTracker {
    job_id: String,
    started: Instant,
    total_bytes: AtomicU64,
    uploaded_bytes: AtomicU64,
    done: AtomicBool,
    log_state: Mutex<(Instant, f64)>,
}

impl ProgressTracker {
    fn new(job_id: String, total_bytes: u64) -> Self {
        Self {
            job_id,
            started: Instant::now(),
            total_bytes: AtomicU64::new(total_bytes),
            uploaded_bytes: AtomicU64::new(0),
            done: AtomicBool::new(false),
            log_state: Mutex::new((Instant::now(), 0.0)),
        }
    }

    fn percent(&self) -> f64 {
        let total = self.total_bytes.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.uploaded_bytes.load(Ordering::Relaxed) as f64 / total as f64 * 100.0
    }

    pub fn record(&self, bytes: u64) {
        self.uploaded_bytes.fetch_add(bytes, Ordering::Relaxed);

        let percent = self.percent();
        let mut state = self.log_state.lock().unwrap();
        if state.0.elapsed() >= LOG_INTERVAL || percent - state.1 >= LOG_PERCENT_STEP {
            tracing::info!(
                job_id = %self.job_id,
                uploaded = self.uploaded_bytes.load(Ordering::Relaxed),
                total = self.total_bytes.load(Ordering::Relaxed),
                percent = format!("{percent:.1}"),
                "upload progress"
            );
            *state = (Instant::now(), percent);
        }
    }

    /// Total size is not always known up front (streamed multipart bodies).
    pub fn set_total(&self, total_bytes: u64) {
        self.total_bytes.store(total_bytes, Ordering::Relaxed);
    }

    pub fn complete(&self) {
        self.done.store(true, Ordering::Relaxed);
        tracing::info!(job_id = %self.job_id, "upload complete");
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let uploaded = self.uploaded_bytes.load(Ordering::Relaxed);
        let elapsed_secs = self.started.elapsed().as_secs_f64();
        let bytes_per_sec = if elapsed_secs > 0.0 {
            uploaded as f64 / elapsed_secs
        } else {
            0.0
        };
        ProgressSnapshot {
            job_id: self.job_id.clone(),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            uploaded_bytes: uploaded,
            percent: self.percent(),
            elapsed_secs,
            bytes_per_sec,
            done: self.done.load(Ordering::Relaxed),
        }
    }
}

/// Live upload jobs, keyed by a caller-supplied job id.
#[derive(Default)]
pub struct ProgressRegistry {
    jobs: Mutex<HashMap<String, Arc<ProgressTracker>>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, job_id: &str, total_bytes: u64) -> Arc<ProgressTracker> {
        let tracker = Arc::new(ProgressTracker::new(job_id.to_string(), total_bytes));
        self.jobs
            .lock()
            .unwrap()
            .insert(job_id.to_string(), tracker.clone());
        tracker
    }

    pub fn snapshot(&self, job_id: &str) -> Option<ProgressSnapshot> {
        self.jobs
            .lock()
            .unwrap()
            .get(job_id)
            .map(|tracker| tracker.snapshot())
    }
}
