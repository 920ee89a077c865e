//! 任务处理上下文
//!
//! 封装"我正在处理第几个文档的第几页"这一信息

use std::fmt::Display;
use uuid::Uuid;

/// 任务处理上下文
#[derive(Debug, Clone)]
pub struct JobCtx {
    pub batch_id: Uuid,

    /// 文档索引（从1开始，仅用于日志显示）
    pub document_index: usize,

    pub source_name: String,

    /// 页码（从1开始）
    pub page_number: u32,

    pub total_pages: usize,
}

impl JobCtx {
    pub fn new(
        batch_id: Uuid,
        document_index: usize,
        source_name: impl Into<String>,
        page_number: u32,
        total_pages: usize,
    ) -> Self {
        Self {
            batch_id,
            document_index,
            source_name: source_name.into(),
            page_number,
            total_pages,
        }
    }
}

impl Display for JobCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[文档 {} {} 第{}/{}页]",
            self.document_index, self.source_name, self.page_number, self.total_pages
        )
    }
}
