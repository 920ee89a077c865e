/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::{BatchOutcome, BatchResult};
use std::fs::{self, OpenOptions};
use std::io::Write;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// 初始化 tracing 订阅器
///
/// 优先使用 `RUST_LOG`，否则默认 `info`，`verbose` 时为 `debug`。
/// 重复调用不会报错。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &str) -> AppResult<()> {
    let log_header = format!(
        "{}\nOCR 批处理日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header).map_err(|e| AppError::io(log_file_path, e))
}

/// 在日志文件末尾追加一行
pub fn append_log_line(log_file_path: &str, line: &str) -> AppResult<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)
        .map_err(|e| AppError::io(log_file_path, e))?;
    writeln!(file, "{}", line).map_err(|e| AppError::io(log_file_path, e))
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - OCR 批量识别模式");
    info!("🌐 服务地址: {}", display_or_unset(&config.endpoint));
    info!("📊 最大并发文档数: {}", config.policy.max_parallel_documents);
    info!(
        "🚦 限流: {} 次 / {} 秒，请求节流: {} 次 / {} 毫秒",
        config.policy.rate_limit.calls,
        config.policy.rate_limit.window_seconds,
        config.policy.max_parallel_requests,
        config.request_pacing_window_ms
    );
    if config.policy.use_free_tier {
        info!(
            "🆓 免费档: 每个文档最多 {} 页",
            config.policy.free_tier_page_limit.max(1)
        );
    }
    info!("{}", "=".repeat(60));
}

/// 记录文档加载信息
///
/// # 参数
/// - `total`: 文档总数
/// - `max_parallel`: 最大并发文档数
pub fn log_documents_loaded(total: usize, max_parallel: usize) {
    info!("✓ 找到 {} 个待识别的文档", total);
    info!("📋 最多同时处理 {} 个文档，文档内逐页处理\n", max_parallel);
}

/// 记录单个文档开始
pub fn log_document_start(document_index: usize, source_name: &str, total_jobs: usize, truncated: bool) {
    info!("\n{}", "─".repeat(60));
    info!("[文档 {}] 📄 开始处理: {}", document_index, source_name);
    info!("[文档 {}] 页数: {}", document_index, total_jobs);
    if truncated {
        warn!("[文档 {}] ⚠️ 超出免费档页数上限，只处理前 {} 页", document_index, total_jobs);
    }
}

/// 记录单个文档结束
pub fn log_document_complete(document_index: usize, result: &BatchResult) {
    match result.outcome() {
        BatchOutcome::Succeeded => info!(
            "[文档 {}] ✅ 全部 {} 页识别成功",
            document_index,
            result.completed_jobs()
        ),
        BatchOutcome::PartiallySucceeded { failed_pages } => warn!(
            "[文档 {}] ⚠️ 部分完成: 成功 {} 页，失败页码 {:?}",
            document_index,
            result.completed_jobs(),
            failed_pages
        ),
        BatchOutcome::NotPrepared { reason } => {
            warn!("[文档 {}] ❌ 无法处理: {}", document_index, reason)
        }
        BatchOutcome::Cancelled => warn!(
            "[文档 {}] ⏹️ 已取消，完成 {} 页",
            document_index,
            result.completed_jobs()
        ),
    }
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度（按字符计）
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

fn display_or_unset(value: &str) -> &str {
    if value.trim().is_empty() {
        "(未配置)"
    } else {
        value
    }
}
