//! 单个文档处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块负责处理单个文档拆出的所有页面，是文档级别的编排器。
//!
//! ## 核心功能
//!
//! 1. **逐页处理**：按页码顺序依次交给 `PageFlow`，同一文档内不并发
//! 2. **进度上报**：每次状态变化都发出一个 `ProgressUpdate`
//! 3. **结果汇总**：失败的页面不影响后续页面，最后拼接成功页面的文本
//! 4. **响应取消**：取消后不再开始新的页面，已完成的页面保留

use crate::error::AppError;
use crate::models::{
    aggregate_text, progress_fraction, Batch, BatchResult, Job, JobEvent, JobResult, JobStatus,
    ProgressCallback, ProgressUpdate,
};
use crate::utils::logging::{log_document_complete, log_document_start};
use crate::workflow::{JobCtx, PageFlow};
use chrono::Utc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

/// 为某个文档构造进度快照
pub(crate) struct ProgressReporter<'a> {
    batch_id: Uuid,
    source_name: &'a str,
    total_jobs: usize,
    progress: &'a ProgressCallback,
}

impl<'a> ProgressReporter<'a> {
    pub(crate) fn new(
        batch_id: Uuid,
        source_name: &'a str,
        total_jobs: usize,
        progress: &'a ProgressCallback,
    ) -> Self {
        Self {
            batch_id,
            source_name,
            total_jobs,
            progress,
        }
    }

    pub(crate) fn emit(
        &self,
        job: &Job,
        status: JobStatus,
        completed_jobs: usize,
        message: Option<String>,
        retry_after: Option<Duration>,
        aggregated_text_so_far: Option<String>,
    ) {
        let next_retry = retry_after
            .and_then(|delay| chrono::Duration::from_std(delay).ok())
            .map(|delay| Utc::now() + delay);

        (self.progress)(ProgressUpdate {
            batch_id: self.batch_id,
            source_name: self.source_name.to_string(),
            job_id: job.id,
            label: job.label.clone(),
            status,
            completed_jobs,
            total_jobs: self.total_jobs,
            progress_fraction: progress_fraction(completed_jobs, self.total_jobs),
            next_retry,
            message,
            aggregated_text_so_far,
        });
    }

    pub(crate) fn queued(&self, job: &Job) {
        self.emit(job, JobStatus::Queued, 0, None, None, None);
    }
}

/// 处理单个文档
///
/// # 参数
/// - `flow`: 单页处理流程（所有文档共享）
/// - `batch`: 预处理得到的批次
/// - `document_index`: 文档索引（用于日志）
/// - `progress`: 进度回调
/// - `cancel`: 整体取消信号
///
/// # 返回
/// 文档的处理结果，永远不会失败
pub async fn process_document(
    flow: &PageFlow,
    batch: Batch,
    document_index: usize,
    progress: &ProgressCallback,
    cancel: &CancellationToken,
) -> BatchResult {
    let Batch {
        batch_id,
        source_name,
        jobs,
        truncated_by_tier_limit,
    } = batch;
    let total_jobs = jobs.len();

    log_document_start(document_index, &source_name, total_jobs, truncated_by_tier_limit);

    let reporter = ProgressReporter::new(batch_id, &source_name, total_jobs, progress);
    let mut job_results: Vec<(Job, JobResult)> = Vec::with_capacity(total_jobs);
    let mut completed_jobs = 0;
    let mut cancelled = false;

    for job in jobs {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }

        let ctx = JobCtx::new(
            batch_id,
            document_index,
            source_name.clone(),
            job.page_number,
            total_jobs,
        );

        let events = |event: JobEvent| {
            reporter.emit(
                &job,
                event.status,
                completed_jobs,
                event.message,
                event.retry_after,
                None,
            );
        };

        let result = match flow.run(&job, &ctx, &events, cancel).await {
            Ok(result) => result,
            Err(AppError::Cancelled) => {
                info!("{} ⏹️ 已取消", ctx);
                cancelled = true;
                break;
            }
            Err(e) => {
                error!("{} ❌ 处理过程中发生错误: {}", ctx, e);
                JobResult::failed(e.to_string())
            }
        };

        if result.is_completed() {
            completed_jobs += 1;
        }

        let status = result.status;
        let message = result.error_message.clone();
        let retry_after = result.retry_after;
        job_results.push((job, result));

        let (job, _) = &job_results[job_results.len() - 1];
        reporter.emit(
            job,
            status,
            completed_jobs,
            message,
            retry_after,
            Some(aggregate_text(&job_results)),
        );
    }

    let result = BatchResult::from_results(
        batch_id,
        source_name.clone(),
        job_results,
        truncated_by_tier_limit,
        cancelled,
    );

    log_document_complete(document_index, &result);
    result
}
