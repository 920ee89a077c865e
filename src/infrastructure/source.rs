//! 文档来源 - 基础设施层
//!
//! 只暴露"按需打开字节流"的能力，不预先读取内容。
//! 调用方持有返回的流，离开作用域即释放底层文件句柄。

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::Cursor;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

/// 按需打开的字节流
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// 文档来源
///
/// 职责：
/// - 提供文件名和（可选的）字节长度
/// - 每次调用 `open` 都从头返回一个新的字节流
#[async_trait]
pub trait DocumentSource: Send + Sync {
    fn file_name(&self) -> &str;

    /// 已知的字节长度，未知时为 `None`
    fn length_bytes(&self) -> Option<u64>;

    async fn open(&self, cancel: &CancellationToken) -> AppResult<ByteStream>;
}

/// 读取整个来源，读取过程中响应取消
///
/// `limit` 不为空时最多读取 `limit + 1` 字节，调用方据此判断是否超限。
pub async fn read_source(
    source: &dyn DocumentSource,
    limit: Option<u64>,
    cancel: &CancellationToken,
) -> AppResult<Vec<u8>> {
    let stream = source.open(cancel).await?;
    let capacity = source.length_bytes().unwrap_or(0).min(64 * 1024 * 1024) as usize;
    let mut buffer = Vec::with_capacity(capacity);

    let read = async {
        match limit {
            Some(limit) => stream.take(limit.saturating_add(1)).read_to_end(&mut buffer).await,
            None => {
                let mut stream = stream;
                stream.read_to_end(&mut buffer).await
            }
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(AppError::Cancelled),
        result = read => {
            result.map_err(|e| AppError::io(source.file_name(), e))?;
        }
    }

    Ok(buffer)
}

/// 磁盘文件来源
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    file_name: String,
    length: Option<u64>,
}

impl FileSource {
    /// 创建文件来源，读取一次元数据获取长度
    pub async fn new(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| AppError::io(path.display().to_string(), e))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            path,
            file_name,
            length: Some(metadata.len()),
        })
    }
}

#[async_trait]
impl DocumentSource for FileSource {
    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn length_bytes(&self) -> Option<u64> {
        self.length
    }

    async fn open(&self, cancel: &CancellationToken) -> AppResult<ByteStream> {
        let open = tokio::fs::File::open(&self.path);
        let file = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            file = open => file.map_err(|e| AppError::io(self.path.display().to_string(), e))?,
        };
        Ok(Box::new(file))
    }
}

/// 内存来源（拆出来的单页 PDF、测试数据等）
#[derive(Debug, Clone)]
pub struct MemorySource {
    file_name: String,
    bytes: Bytes,
    declared_length: Option<u64>,
}

impl MemorySource {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            file_name: file_name.into(),
            declared_length: Some(bytes.len() as u64),
            bytes,
        }
    }

    /// 不声明长度的来源（模拟只能流式读取的输入）
    pub fn without_length(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            declared_length: None,
            ..Self::new(file_name, bytes)
        }
    }
}

#[async_trait]
impl DocumentSource for MemorySource {
    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn length_bytes(&self) -> Option<u64> {
        self.declared_length
    }

    async fn open(&self, cancel: &CancellationToken) -> AppResult<ByteStream> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        Ok(Box::new(Cursor::new(self.bytes.clone())))
    }
}
