//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量处理和流程调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批量文档处理器
//! - 逐个预处理源文档（`Vec<DocumentSource>` → `Batch`）
//! - 控制同时处理的文档数量（Semaphore）
//! - 按输入顺序收集结果
//!
//! ### `document_processor` - 单个文档处理器
//! - 按页码顺序遍历文档的所有页面（`Vec<Job>`）
//! - 复用共享的 `PageFlow`
//! - 发出进度快照，汇总文本
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<DocumentSource>)
//!     ↓
//! document_processor (处理 Vec<Job>)
//!     ↓
//! workflow::PageFlow (处理单个 Job)
//!     ↓
//! services (能力层：preprocess / ocr)
//!     ↓
//! infrastructure (基础设施：RateLimiter / DocumentSource)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一职责**：batch_processor 管批量，document_processor 管单个文档
//! 2. **向下依赖**：编排层 → workflow → services → infrastructure
//! 3. **无业务逻辑**：只做调度和统计，不做具体业务判断

pub mod batch_processor;
pub mod document_processor;

// 重新导出主要类型
pub use batch_processor::BatchOrchestrator;
pub use document_processor::process_document;
