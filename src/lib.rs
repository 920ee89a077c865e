//! # OCR Batch
//!
//! 一个把图片和多页 PDF 批量送去远程 OCR 服务识别的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有共享资源，只暴露能力
//! - `RateLimiter` - 滑动窗口限流，进程内唯一的共享可变状态
//! - `DocumentSource` - 按需打开的字节流（磁盘文件 / 内存）
//! - `clients/ReadClient` - 远程 Read API 的 HTTP 边界
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个文档或单个任务
//! - `DocumentPreprocessor` - 文档 → 按页排列的任务
//! - `OcrJobClient` - 单个任务的提交、轮询、重试
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一页"的完整处理流程
//! - `JobCtx` - 上下文封装（文档索引 + 页码）
//! - `PageFlow` - 流程编排（限流 → 识别 → 错误收敛）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 批量文档处理器，管理并发
//! - `orchestrator/document_processor` - 单个文档处理器，逐页处理并上报进度
//!
//! ## 模块结构

pub mod app;
pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use app::App;
pub use config::{Config, OcrPolicy, PollPolicy, RateLimitConfig, RetryPolicy};
pub use error::{AppError, AppResult, ConfigError, DocumentError, OcrError};
pub use infrastructure::{DocumentSource, FileSource, MemorySource, RateLimiter};
pub use models::{
    progress_channel, Batch, BatchOutcome, BatchResult, ContentType, Job, JobResult, JobStatus,
    ProgressCallback, ProgressUpdate,
};
pub use orchestrator::BatchOrchestrator;
pub use services::{DisabledOcrJobClient, DocumentPreprocessor, OcrJobClient, RemoteOcrJobClient};
pub use workflow::{JobCtx, PageFlow};
