//! 应用入口
//!
//! 负责组装各层组件、运行一次批量识别，并把结果写到输出目录。

use crate::clients::ReadClient;
use crate::config::Config;
use crate::infrastructure::{expand_paths, load_sources, DocumentSource, LoadedSource, RateLimiter};
use crate::models::{progress_channel, BatchOutcome, BatchResult, JobStatus, ProgressUpdate};
use crate::orchestrator::BatchOrchestrator;
use crate::services::{DisabledOcrJobClient, DocumentPreprocessor, OcrJobClient, RemoteOcrJobClient};
use crate::utils::logging::{append_log_line, init_log_file, log_startup, truncate_text};
use crate::workflow::PageFlow;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 应用主结构
pub struct App {
    config: Config,
    orchestrator: BatchOrchestrator,
}

impl App {
    /// 初始化应用
    pub fn initialize(config: Config) -> Result<Self> {
        config.validate()?;

        // 初始化日志文件
        init_log_file(&config.output_log_file)?;

        log_startup(&config);

        let limiter = Arc::new(RateLimiter::from_config(&config.policy.rate_limit));
        let pacer = Arc::new(RateLimiter::new(
            config.policy.max_parallel_requests,
            config.request_pacing_window(),
        ));

        let client = build_client(&config, pacer)?;
        let flow = Arc::new(PageFlow::new(client, limiter));
        let preprocessor = Arc::new(DocumentPreprocessor::new((&config.policy).into()));
        let orchestrator =
            BatchOrchestrator::new(preprocessor, flow, config.policy.max_parallel_documents);

        Ok(Self {
            config,
            orchestrator,
        })
    }

    /// 运行应用主逻辑
    ///
    /// # 参数
    /// - `paths`: 文件或目录
    /// - `cancel`: 整体取消信号（Ctrl-C）
    pub async fn run(&self, paths: Vec<PathBuf>, cancel: &CancellationToken) -> Result<Vec<BatchResult>> {
        info!("\n📁 正在扫描待识别的文档...");
        let files = expand_paths(&paths).await?;

        if files.is_empty() {
            warn!("⚠️ 没有找到待识别的文档，程序结束");
            return Ok(Vec::new());
        }

        // 打不开的文件直接记为无法处理，其余交给编排器，最后按输入顺序合并
        let mut slots: Vec<Option<BatchResult>> = Vec::with_capacity(files.len());
        let mut sources: Vec<Arc<dyn DocumentSource>> = Vec::new();
        for loaded in load_sources(&files).await {
            match loaded {
                LoadedSource::Ready(source) => {
                    sources.push(source);
                    slots.push(None);
                }
                LoadedSource::Unreadable { name, error } => {
                    slots.push(Some(BatchResult::not_prepared(name, error.to_string())));
                }
            }
        }

        let (progress, receiver) = progress_channel();
        let reporter = tokio::spawn(report_progress(receiver));

        let processed = self.orchestrator.process(sources, progress, cancel).await;

        // 编排器返回后所有发送端都已释放，等待进度日志输出完毕
        if let Err(e) = reporter.await {
            warn!("进度输出任务异常结束: {}", e);
        }

        let mut processed = processed.into_iter();
        let results: Vec<BatchResult> = slots
            .into_iter()
            .filter_map(|slot| slot.or_else(|| processed.next()))
            .collect();

        let summaries = self.write_outputs(&results).await?;
        print_final_stats(&RunStats::from_results(&results), &self.config);

        if cancel.is_cancelled() {
            warn!("⏹️ 运行被取消，已完成的页面已保存");
        }
        debug!("共写出 {} 条摘要", summaries.len());

        Ok(results)
    }

    /// 写出每个文档的文本和 JSON 摘要
    async fn write_outputs(&self, results: &[BatchResult]) -> Result<Vec<DocumentSummary>> {
        let output_folder = Path::new(&self.config.output_folder);
        tokio::fs::create_dir_all(output_folder)
            .await
            .with_context(|| format!("无法创建输出目录: {}", output_folder.display()))?;

        let mut summaries = Vec::with_capacity(results.len());
        let mut used_names = HashSet::new();
        for result in results {
            let transcript = if result.preparation_error.is_none() {
                let file_name = transcript_file_name(&result.source_name, &mut used_names);
                let path = output_folder.join(file_name);
                tokio::fs::write(&path, &result.aggregated_text)
                    .await
                    .with_context(|| format!("无法写入识别结果: {}", path.display()))?;
                info!("💾 {} → {}", result.source_name, path.display());
                Some(path.display().to_string())
            } else {
                None
            };

            let summary = DocumentSummary::new(result, transcript);
            append_log_line(
                &self.config.output_log_file,
                &format!(
                    "{}: {} (成功 {}/{} 页)",
                    summary.source_name, summary.outcome, summary.completed_pages, summary.total_pages
                ),
            )?;
            summaries.push(summary);
        }

        let summary_path = output_folder.join("summary.json");
        let json = serde_json::to_string_pretty(&summaries)?;
        tokio::fs::write(&summary_path, json)
            .await
            .with_context(|| format!("无法写入摘要: {}", summary_path.display()))?;

        Ok(summaries)
    }
}

/// 根据配置选择远程客户端或禁用客户端
fn build_client(config: &Config, pacer: Arc<RateLimiter>) -> Result<Arc<dyn OcrJobClient>> {
    if !config.has_credentials() {
        warn!("⚠️ 未配置 OCR_API_KEY，所有页面都会被标记为失败");
        return Ok(Arc::new(DisabledOcrJobClient::new("未配置 OCR 服务密钥 (OCR_API_KEY)")));
    }

    let api = ReadClient::new(config)?;
    Ok(Arc::new(RemoteOcrJobClient::new(
        api,
        pacer,
        config.retry.clone(),
        config.poll.clone(),
    )))
}

/// 把进度快照输出到日志
async fn report_progress(mut receiver: mpsc::UnboundedReceiver<ProgressUpdate>) {
    while let Some(update) = receiver.recv().await {
        let percent = (update.progress_fraction * 100.0).round();
        match update.status {
            JobStatus::Queued => debug!("🕒 {} {} 已排队", update.source_name, update.label),
            JobStatus::Running | JobStatus::Waiting => debug!(
                "⏳ {} {} {:?}{}",
                update.source_name,
                update.label,
                update.status,
                update
                    .next_retry
                    .map(|at| format!("，下次重试 {}", at.with_timezone(&chrono::Local).format("%H:%M:%S")))
                    .unwrap_or_default()
            ),
            JobStatus::Completed => info!(
                "📈 {} {} 完成 ({}/{}，{}%)",
                update.source_name, update.label, update.completed_jobs, update.total_jobs, percent
            ),
            JobStatus::Failed => warn!(
                "📉 {} {} 失败: {} ({}/{}，{}%)",
                update.source_name,
                update.label,
                truncate_text(update.message.as_deref().unwrap_or("未知错误"), 120),
                update.completed_jobs,
                update.total_jobs,
                percent
            ),
        }
    }
}

/// `report.pdf` → `report.pdf.txt`，同名时依次加 `-2`、`-3` 后缀
fn transcript_file_name(source_name: &str, used: &mut HashSet<String>) -> String {
    let base = Path::new(source_name)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "document".to_string());

    let mut candidate = format!("{}.txt", base);
    let mut n = 2;
    while !used.insert(candidate.to_lowercase()) {
        candidate = format!("{}-{}.txt", base, n);
        n += 1;
    }
    candidate
}

/// 单个文档的摘要
#[derive(Debug, Serialize)]
pub struct DocumentSummary {
    pub source_name: String,
    pub outcome: &'static str,
    pub completed_pages: usize,
    pub total_pages: usize,
    pub failed_pages: Vec<u32>,
    pub truncated_by_tier_limit: bool,
    pub error: Option<String>,
    pub transcript: Option<String>,
}

impl DocumentSummary {
    fn new(result: &BatchResult, transcript: Option<String>) -> Self {
        let outcome = match result.outcome() {
            BatchOutcome::Succeeded => "succeeded",
            BatchOutcome::PartiallySucceeded { .. } => "partially_succeeded",
            BatchOutcome::NotPrepared { .. } => "not_prepared",
            BatchOutcome::Cancelled => "cancelled",
        };
        Self {
            source_name: result.source_name.clone(),
            outcome,
            completed_pages: result.completed_jobs(),
            total_pages: result.job_results.len(),
            failed_pages: result.failed_pages(),
            truncated_by_tier_limit: result.truncated_by_tier_limit,
            error: result.preparation_error.clone(),
            transcript,
        }
    }
}

/// 处理统计
#[derive(Debug, Default, PartialEq)]
pub struct RunStats {
    pub total: usize,
    pub succeeded: usize,
    pub partial: usize,
    pub not_prepared: usize,
    pub cancelled: usize,
    pub pages_completed: usize,
    pub pages_failed: usize,
}

impl RunStats {
    pub fn from_results(results: &[BatchResult]) -> Self {
        let mut stats = RunStats {
            total: results.len(),
            ..Default::default()
        };
        for result in results {
            match result.outcome() {
                BatchOutcome::Succeeded => stats.succeeded += 1,
                BatchOutcome::PartiallySucceeded { .. } => stats.partial += 1,
                BatchOutcome::NotPrepared { .. } => stats.not_prepared += 1,
                BatchOutcome::Cancelled => stats.cancelled += 1,
            }
            stats.pages_completed += result.completed_jobs();
            stats.pages_failed += result.failed_pages().len();
        }
        stats
    }
}

// ========== 日志辅助函数 ==========

fn print_final_stats(stats: &RunStats, config: &Config) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 全部成功: {}/{}", stats.succeeded, stats.total);
    info!("⚠️ 部分成功: {}", stats.partial);
    info!("❌ 无法处理: {}", stats.not_prepared);
    if stats.cancelled > 0 {
        info!("⏹️ 已取消: {}", stats.cancelled);
    }
    info!("📄 页面: 成功 {}，失败 {}", stats.pages_completed, stats.pages_failed);
    info!("{}", "=".repeat(60));
    info!("\n结果已保存至: {}", config.output_folder);
    info!("日志已保存至: {}", config.output_log_file);
}
