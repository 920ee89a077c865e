//! 错误类型
//!
//! 按关注点划分：配置 / 文档预处理 / OCR 远程服务，最终汇总到 [`AppError`]。
//! 取消（Cancelled）单独成为一个变体，永远不会被当作普通失败处理。

use std::time::Duration;
use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 文档预处理错误
    #[error("文档错误: {0}")]
    Document(#[from] DocumentError),
    /// OCR 服务错误
    #[error("OCR错误: {0}")]
    Ocr(#[from] OcrError),
    /// 整体操作被取消
    #[error("操作已取消")]
    Cancelled,
    /// 文件读写错误
    #[error("文件错误 ({path}): {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl AppError {
    /// 创建文件读写错误
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 缺少必填项
    #[error("缺少配置项: {name}")]
    Missing { name: String },
    /// 配置值非法
    #[error("配置项 {name} 的值 '{value}' 非法: {reason}")]
    Invalid {
        name: String,
        value: String,
        reason: String,
    },
    /// 读取配置文件失败
    #[error("读取配置文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// 文档预处理错误
#[derive(Debug, Error)]
pub enum DocumentError {
    /// 不支持的文件格式
    #[error("不支持的文件格式: {file_name} (扩展名: {extension:?})")]
    UnsupportedFormat {
        file_name: String,
        extension: Option<String>,
    },
    /// 文档超过大小上限
    #[error("文档过大: {file_name} ({size} 字节, 上限 {limit} 字节)")]
    DocumentTooLarge {
        file_name: String,
        size: u64,
        limit: u64,
    },
    /// 没有可处理的页面
    #[error("文档没有可处理的页面: {file_name}")]
    EmptyDocument { file_name: String },
    /// PDF 解析失败
    #[error("PDF解析失败 ({file_name}): {source}")]
    InvalidPdf {
        file_name: String,
        #[source]
        source: lopdf::Error,
    },
    /// 单页导出失败
    #[error("导出第 {page_number} 页失败 ({file_name}): {message}")]
    PageExtraction {
        file_name: String,
        page_number: u32,
        message: String,
    },
}

/// OCR 远程服务错误
#[derive(Debug, Error)]
pub enum OcrError {
    /// 网络层失败
    #[error("网络请求失败 ({endpoint}): {source}")]
    Network {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    /// 服务返回非成功状态码
    #[error("服务返回错误状态 {status}: {message}")]
    Http {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },
    /// 单次尝试超时
    #[error("第 {attempt} 次尝试超时 ({timeout:?})")]
    Timeout { attempt: u32, timeout: Duration },
    /// 轮询次数耗尽仍未结束
    #[error("操作 {operation_id} 轮询 {polls} 次后仍未完成")]
    PollTimeout { operation_id: String, polls: u32 },
    /// 响应缺少 Operation-Location
    #[error("响应缺少 Operation-Location 头")]
    MissingOperationLocation,
    /// 响应内容无法解析
    #[error("无法解析服务响应: {0}")]
    InvalidResponse(String),
    /// 图片解码/编码失败
    #[error("图片处理失败: {0}")]
    Image(#[from] image::ImageError),
    /// 读取任务内容失败
    #[error("读取任务内容失败: {0}")]
    Source(String),
}

impl OcrError {
    /// 是否属于可重试的瞬时错误
    pub fn is_transient(&self) -> bool {
        match self {
            // 连接、超时以及读响应体时断开都算网络层失败
            OcrError::Network { source, .. } => {
                source.is_timeout()
                    || source.is_connect()
                    || source.is_request()
                    || source.is_body()
                    || source.is_decode()
            }
            OcrError::Http { status, .. } => *status == 429 || *status >= 500,
            OcrError::Timeout { .. } | OcrError::PollTimeout { .. } => true,
            OcrError::MissingOperationLocation
            | OcrError::InvalidResponse(_)
            | OcrError::Image(_)
            | OcrError::Source(_) => false,
        }
    }

    /// 服务端建议的等待时间
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            OcrError::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
