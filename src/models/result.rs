use serde::Serialize;
use std::time::Duration;

/// 任务状态
///
/// `Queued → Running → Waiting(0..N) → Completed | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    Queued,
    /// 提交中
    Running,
    /// 轮询中
    Waiting,
    Completed,
    Failed,
}

/// 单个任务的最终结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResult {
    pub status: JobStatus,
    pub text: Option<String>,
    pub error_message: Option<String>,
    pub retry_after: Option<Duration>,
    pub suggested_poll_delay: Option<Duration>,
    pub operation_id: Option<String>,
}

impl JobResult {
    pub fn completed(text: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Completed,
            text: Some(text.into()),
            error_message: None,
            retry_after: None,
            suggested_poll_delay: None,
            operation_id: None,
        }
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            text: None,
            error_message: Some(error_message.into()),
            retry_after: None,
            suggested_poll_delay: None,
            operation_id: None,
        }
    }

    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn with_poll_delay(mut self, delay: Option<Duration>) -> Self {
        self.suggested_poll_delay = delay;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }
}
