//! 从命令行路径加载源文档
//!
//! 目录按文件名排序展开为其中支持的文件（不递归），普通文件原样保留。

use crate::error::{AppError, AppResult};
use crate::infrastructure::source::{DocumentSource, FileSource};
use crate::models::ContentType;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};

/// 加载结果
pub enum LoadedSource {
    Ready(Arc<dyn DocumentSource>),
    /// 文件无法打开（不存在、无权限等）
    Unreadable { name: String, error: AppError },
}

/// 把输入路径展开为文件列表
pub async fn expand_paths(paths: &[PathBuf]) -> AppResult<Vec<PathBuf>> {
    let mut files = Vec::new();

    for path in paths {
        let is_dir = fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false);
        if !is_dir {
            files.push(path.clone());
            continue;
        }

        let mut found = Vec::new();
        let mut entries = fs::read_dir(path)
            .await
            .map_err(|e| AppError::io(path.display().to_string(), e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::io(path.display().to_string(), e))?
        {
            let entry_path = entry.path();
            if entry_path.is_file() && is_supported(&entry_path) {
                found.push(entry_path);
            }
        }

        if found.is_empty() {
            warn!("在文件夹 {} 中没有找到支持的文档", path.display());
        }
        found.sort();
        files.extend(found);
    }

    Ok(files)
}

/// 逐个打开文件，打不开的文件不会中断其他文件
pub async fn load_sources(paths: &[PathBuf]) -> Vec<LoadedSource> {
    let mut sources = Vec::with_capacity(paths.len());

    for path in paths {
        match FileSource::new(path.clone()).await {
            Ok(source) => {
                info!(
                    "正在加载: {} ({} 字节)",
                    source.file_name(),
                    source.length_bytes().unwrap_or(0)
                );
                sources.push(LoadedSource::Ready(Arc::new(source)));
            }
            Err(error) => {
                warn!("加载文件失败 {}: {}", path.display(), error);
                sources.push(LoadedSource::Unreadable {
                    name: path.display().to_string(),
                    error,
                });
            }
        }
    }

    sources
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(ContentType::from_extension)
        .is_some()
}
