use crate::models::result::JobStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// 进度快照，每次任务状态变化时发出一次
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub batch_id: Uuid,
    pub source_name: String,
    pub job_id: Uuid,
    pub label: String,
    pub status: JobStatus,
    pub completed_jobs: usize,
    pub total_jobs: usize,
    /// 取值范围 [0, 1]
    pub progress_fraction: f64,
    pub next_retry: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub aggregated_text_so_far: Option<String>,
}

/// 进度回调
pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// 把进度转发到无界通道，返回 (回调, 接收端)
///
/// 接收端被丢弃后回调静默丢弃后续进度。
pub fn progress_channel() -> (ProgressCallback, mpsc::UnboundedReceiver<ProgressUpdate>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: ProgressCallback = Arc::new(move |update| {
        let _ = tx.send(update);
    });
    (callback, rx)
}

/// 不关心进度时使用
pub fn ignore_progress() -> ProgressCallback {
    Arc::new(|_| {})
}

pub fn progress_fraction(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (completed as f64 / total as f64).clamp(0.0, 1.0)
}

/// OCR 客户端在单个任务内部上报的状态变化
#[derive(Debug, Clone, PartialEq)]
pub struct JobEvent {
    pub status: JobStatus,
    pub message: Option<String>,
    /// 下一次重试前的等待时间
    pub retry_after: Option<Duration>,
}

impl JobEvent {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status,
            message: None,
            retry_after: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

/// 任务内部状态的接收方
pub type JobEventSink<'a> = &'a (dyn Fn(JobEvent) + Send + Sync);
