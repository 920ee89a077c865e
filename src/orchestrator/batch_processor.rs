//! 批量文档处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块负责一组文档的预处理、并发调度和结果收集。
//!
//! ## 核心功能
//!
//! 1. **顺序预处理**：逐个把源文档拆成批次，失败的文档单独记为无法处理
//! 2. **排队通知**：每个任务进入队列时发出 `Queued` 进度
//! 3. **并发控制**：使用 Semaphore 限制同时处理的文档数量
//! 4. **结果收集**：按输入顺序返回每个文档的结果
//!
//! ## 设计特点
//!
//! - **不做业务判断**：单页的识别与重试都在下层完成
//! - **故障隔离**：任何一个文档失败都不影响其他文档
//! - **向下委托**：委托 document_processor 处理单个文档

use crate::error::AppError;
use crate::infrastructure::DocumentSource;
use crate::models::{BatchResult, ProgressCallback};
use crate::orchestrator::document_processor::{process_document, ProgressReporter};
use crate::services::DocumentPreprocessor;
use crate::utils::logging::log_documents_loaded;
use crate::workflow::PageFlow;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 批量编排器
pub struct BatchOrchestrator {
    preprocessor: Arc<DocumentPreprocessor>,
    flow: Arc<PageFlow>,
    max_parallel_documents: usize,
}

/// 每个输入文档的处理单元
enum Unit {
    /// 预处理阶段就已经有了结果
    Finished(BatchResult),
    /// 已派发到后台任务
    Running {
        document_index: usize,
        source_name: String,
        handle: JoinHandle<BatchResult>,
    },
}

impl BatchOrchestrator {
    pub fn new(
        preprocessor: Arc<DocumentPreprocessor>,
        flow: Arc<PageFlow>,
        max_parallel_documents: usize,
    ) -> Self {
        Self {
            preprocessor,
            flow,
            max_parallel_documents: max_parallel_documents.max(1),
        }
    }

    /// 处理一组文档
    ///
    /// # 参数
    /// - `sources`: 源文档列表
    /// - `progress`: 进度回调，同一文档内的进度按发生顺序到达
    /// - `cancel`: 整体取消信号
    ///
    /// # 返回
    /// 与输入顺序一致的文档结果，所有文档都结束后才返回
    pub async fn process(
        &self,
        sources: Vec<Arc<dyn DocumentSource>>,
        progress: ProgressCallback,
        cancel: &CancellationToken,
    ) -> Vec<BatchResult> {
        log_documents_loaded(sources.len(), self.max_parallel_documents);

        let semaphore = Arc::new(Semaphore::new(self.max_parallel_documents));
        let mut units = Vec::with_capacity(sources.len());

        for (idx, source) in sources.into_iter().enumerate() {
            let document_index = idx + 1;
            let source_name = source.file_name().to_string();

            let batch = match self.preprocessor.prepare(source, cancel).await {
                Ok(batch) => batch,
                Err(AppError::Cancelled) => {
                    warn!("[文档 {}] ⏹️ 预处理前已取消: {}", document_index, source_name);
                    units.push(Unit::Finished(BatchResult::cancelled_before_start(
                        uuid::Uuid::new_v4(),
                        source_name,
                    )));
                    continue;
                }
                Err(e) => {
                    error!("[文档 {}] ❌ 预处理失败: {}", document_index, e);
                    units.push(Unit::Finished(BatchResult::not_prepared(
                        source_name,
                        e.to_string(),
                    )));
                    continue;
                }
            };

            let reporter =
                ProgressReporter::new(batch.batch_id, &batch.source_name, batch.total_jobs(), &progress);
            for job in &batch.jobs {
                reporter.queued(job);
            }

            let flow = self.flow.clone();
            let semaphore = semaphore.clone();
            let progress = progress.clone();
            let cancel = cancel.clone();

            let handle = tokio::spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit else {
                    return BatchResult::cancelled_before_start(batch.batch_id, batch.source_name);
                };

                process_document(&flow, batch, document_index, &progress, &cancel).await
            });

            units.push(Unit::Running {
                document_index,
                source_name,
                handle,
            });
        }

        // 按输入顺序等待所有文档完成
        let mut results = Vec::with_capacity(units.len());
        for unit in units {
            match unit {
                Unit::Finished(result) => results.push(result),
                Unit::Running {
                    document_index,
                    source_name,
                    handle,
                } => match handle.await {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        error!("[文档 {}] 任务执行失败: {}", document_index, e);
                        results.push(BatchResult::not_prepared(
                            source_name,
                            format!("任务执行失败: {}", e),
                        ));
                    }
                },
            }
        }

        info!("✓ {} 个文档全部结束", results.len());
        results
    }
}
