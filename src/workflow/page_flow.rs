//! 单页处理流程 - 流程层
//!
//! 核心职责：定义"一页"的完整处理流程
//!
//! 流程顺序：
//! 1. 在全局限流器上取得准入
//! 2. 交给 OCR 客户端识别
//! 3. 客户端的错误和 panic 都收敛为 `Failed` 结果
//!
//! 只有取消会以 `Err` 返回，其余情况都保证产出一个终态结果。

use crate::error::{AppError, AppResult};
use crate::infrastructure::RateLimiter;
use crate::models::{Job, JobEventSink, JobResult};
use crate::services::OcrJobClient;
use crate::workflow::job_ctx::JobCtx;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 单页处理流程
///
/// - 不持有任务数据，只依赖客户端和限流器
/// - 所有文档共享同一个流程实例
pub struct PageFlow {
    client: Arc<dyn OcrJobClient>,
    limiter: Arc<RateLimiter>,
}

impl PageFlow {
    pub fn new(client: Arc<dyn OcrJobClient>, limiter: Arc<RateLimiter>) -> Self {
        Self { client, limiter }
    }

    pub async fn run(
        &self,
        job: &Job,
        ctx: &JobCtx,
        events: JobEventSink<'_>,
        cancel: &CancellationToken,
    ) -> AppResult<JobResult> {
        let admission = self.limiter.acquire(cancel).await?;
        if !admission.waited.is_zero() {
            info!("{} ⏳ 限流等待 {:?}", ctx, admission.waited);
        }
        debug!("{} 开始识别 {}", ctx, job.label);

        let analyzed = AssertUnwindSafe(self.client.analyze(job, events, cancel))
            .catch_unwind()
            .await;

        let result = match analyzed {
            Ok(Ok(result)) => result,
            Ok(Err(AppError::Cancelled)) => return Err(AppError::Cancelled),
            Ok(Err(e)) => {
                error!("{} ❌ OCR 客户端返回错误: {}", ctx, e);
                JobResult::failed(e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("{} ❌ OCR 客户端 panic: {}", ctx, message);
                JobResult::failed(format!("OCR 客户端内部错误: {}", message))
            }
        };

        if result.is_completed() {
            info!(
                "{} ✓ 识别完成，{} 个字符",
                ctx,
                result.text.as_deref().map_or(0, |text| text.chars().count())
            );
        } else {
            warn!(
                "{} ⚠️ 识别失败: {}",
                ctx,
                result.error_message.as_deref().unwrap_or("未知错误")
            );
        }

        Ok(result)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::MemorySource;
    use crate::models::{ContentType, JobStatus};
    use crate::services::DisabledOcrJobClient;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};
    use uuid::Uuid;

    struct PanickingClient;

    #[async_trait]
    impl OcrJobClient for PanickingClient {
        async fn analyze(
            &self,
            _job: &Job,
            _events: JobEventSink<'_>,
            _cancel: &CancellationToken,
        ) -> AppResult<JobResult> {
            panic!("decoder exploded");
        }
    }

    struct ErroringClient;

    #[async_trait]
    impl OcrJobClient for ErroringClient {
        async fn analyze(
            &self,
            job: &Job,
            _events: JobEventSink<'_>,
            _cancel: &CancellationToken,
        ) -> AppResult<JobResult> {
            Err(AppError::io(job.source_name.clone(), std::io::Error::other("disk gone")))
        }
    }

    fn job() -> Job {
        Job::new(
            "a.png",
            1,
            "a.png",
            ContentType::Png,
            Arc::new(MemorySource::new("a.png", vec![0u8; 4])),
        )
    }

    fn ctx() -> JobCtx {
        JobCtx::new(Uuid::new_v4(), 1, "a.png", 1, 1)
    }

    fn limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(20, Duration::from_secs(60)))
    }

    #[tokio::test]
    async fn test_panic_becomes_failed_result() {
        let flow = PageFlow::new(Arc::new(PanickingClient), limiter());
        let cancel = CancellationToken::new();

        let result = assert_ok!(flow.run(&job(), &ctx(), &|_| {}, &cancel).await);
        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.error_message.unwrap().contains("decoder exploded"));
    }

    #[tokio::test]
    async fn test_client_error_becomes_failed_result() {
        let flow = PageFlow::new(Arc::new(ErroringClient), limiter());
        let cancel = CancellationToken::new();

        let result = assert_ok!(flow.run(&job(), &ctx(), &|_| {}, &cancel).await);
        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.error_message.unwrap().contains("disk gone"));
    }

    #[tokio::test]
    async fn test_each_run_takes_one_admission() {
        let limiter = limiter();
        let flow = PageFlow::new(Arc::new(DisabledOcrJobClient::new("测试")), limiter.clone());
        let cancel = CancellationToken::new();

        for _ in 0..3 {
            assert_ok!(flow.run(&job(), &ctx(), &|_| {}, &cancel).await);
        }
        assert_eq!(limiter.in_window().await, 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_admission() {
        let flow = PageFlow::new(Arc::new(DisabledOcrJobClient::new("测试")), limiter());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = assert_err!(flow.run(&job(), &ctx(), &|_| {}, &cancel).await);
        assert!(error.is_cancelled());
    }
}
