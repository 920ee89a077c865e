//! 文档预处理服务 - 业务能力层
//!
//! 把一个源文档拆成按页排列的 OCR 任务：
//! - 图片：整张作为一个任务
//! - PDF：每页重新序列化成独立的单页 PDF
//!
//! 同时执行大小上限和免费档页数上限。

use crate::config::OcrPolicy;
use crate::error::{AppError, AppResult, DocumentError};
use crate::infrastructure::{read_source, DocumentSource, MemorySource};
use crate::models::{Batch, ContentType, Job};
use lopdf::Document;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 预处理策略
#[derive(Debug, Clone, Default)]
pub struct PreprocessPolicy {
    pub use_free_tier: bool,
    pub free_tier_page_limit: u32,
    pub max_document_bytes: Option<u64>,
}

impl PreprocessPolicy {
    /// 每个文档最多处理的页数，`None` 表示不限
    pub fn page_limit(&self) -> Option<u32> {
        self.use_free_tier
            .then(|| self.free_tier_page_limit.max(1))
    }
}

impl From<&OcrPolicy> for PreprocessPolicy {
    fn from(policy: &OcrPolicy) -> Self {
        Self {
            use_free_tier: policy.use_free_tier,
            free_tier_page_limit: policy.free_tier_page_limit,
            max_document_bytes: policy.max_document_bytes,
        }
    }
}

/// 单页拆分结果
#[derive(Debug)]
pub struct SplitPdf {
    /// 每个元素是一份独立的单页 PDF
    pub pages: Vec<Vec<u8>>,
    /// 原文档总页数
    pub total_pages: u32,
}

/// 文档预处理服务
pub struct DocumentPreprocessor {
    policy: PreprocessPolicy,
}

impl DocumentPreprocessor {
    pub fn new(policy: PreprocessPolicy) -> Self {
        Self { policy }
    }

    /// 把源文档转换成批次
    ///
    /// # 错误
    /// - `UnsupportedFormat`：扩展名不在支持列表中
    /// - `DocumentTooLarge`：超过 `max_document_bytes`
    /// - `EmptyDocument`：没有产生任何页面
    /// - `InvalidPdf`：PDF 无法解析
    pub async fn prepare(
        &self,
        source: Arc<dyn DocumentSource>,
        cancel: &CancellationToken,
    ) -> AppResult<Batch> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let file_name = source.file_name().to_string();
        let content_type = detect_content_type(&file_name)?;

        if let Some(size) = source.length_bytes() {
            self.check_size(&file_name, size)?;
        }

        let batch = match content_type {
            ContentType::Pdf => self.prepare_pdf(source, cancel).await?,
            _ => self.prepare_image(source, content_type, cancel).await?,
        };

        info!(
            "📄 {} 预处理完成: {} 个任务{}",
            batch.source_name,
            batch.total_jobs(),
            if batch.truncated_by_tier_limit {
                "（已按免费档截断）"
            } else {
                ""
            }
        );

        Ok(batch)
    }

    async fn prepare_image(
        &self,
        source: Arc<dyn DocumentSource>,
        content_type: ContentType,
        cancel: &CancellationToken,
    ) -> AppResult<Batch> {
        let file_name = source.file_name().to_string();

        // 长度未知时只能读一遍确认大小，任务本身仍然按需重新打开
        if source.length_bytes().is_none() {
            if let Some(limit) = self.policy.max_document_bytes {
                let bytes = read_source(source.as_ref(), Some(limit), cancel).await?;
                self.check_size(&file_name, bytes.len() as u64)?;
            }
        }

        let job = Job::new(file_name.clone(), 1, file_name.clone(), content_type, source);

        Ok(Batch {
            batch_id: Uuid::new_v4(),
            source_name: file_name,
            jobs: vec![job],
            truncated_by_tier_limit: false,
        })
    }

    async fn prepare_pdf(
        &self,
        source: Arc<dyn DocumentSource>,
        cancel: &CancellationToken,
    ) -> AppResult<Batch> {
        let file_name = source.file_name().to_string();
        let bytes = read_source(source.as_ref(), self.policy.max_document_bytes, cancel).await?;
        self.check_size(&file_name, bytes.len() as u64)?;

        let page_limit = self.policy.page_limit();
        let split = {
            let name = file_name.clone();
            let work =
                tokio::task::spawn_blocking(move || split_pdf_pages(&bytes, &name, page_limit));
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                joined = work => joined.map_err(|e| DocumentError::PageExtraction {
                    file_name: file_name.clone(),
                    page_number: 0,
                    message: e.to_string(),
                })??,
            }
        };

        if split.pages.is_empty() {
            return Err(DocumentError::EmptyDocument { file_name }.into());
        }

        let truncated = split.total_pages as usize > split.pages.len();
        if truncated {
            warn!(
                "⚠️ {} 共 {} 页，免费档只处理前 {} 页",
                file_name,
                split.total_pages,
                split.pages.len()
            );
        }

        let jobs = split
            .pages
            .into_iter()
            .enumerate()
            .map(|(index, page_bytes)| {
                let page_number = index as u32 + 1;
                let label = format!("Page {}", page_number);
                let page_source = MemorySource::new(format!("{} ({})", file_name, label), page_bytes);
                Job::new(
                    file_name.clone(),
                    page_number,
                    label,
                    ContentType::Pdf,
                    Arc::new(page_source),
                )
            })
            .collect();

        Ok(Batch {
            batch_id: Uuid::new_v4(),
            source_name: file_name,
            jobs,
            truncated_by_tier_limit: truncated,
        })
    }

    fn check_size(&self, file_name: &str, size: u64) -> Result<(), DocumentError> {
        match self.policy.max_document_bytes {
            Some(limit) if size > limit => Err(DocumentError::DocumentTooLarge {
                file_name: file_name.to_string(),
                size,
                limit,
            }),
            _ => Ok(()),
        }
    }
}

/// 根据扩展名判断内容类型
pub fn detect_content_type(file_name: &str) -> Result<ContentType, DocumentError> {
    let extension = Path::new(file_name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_string());

    extension
        .as_deref()
        .and_then(ContentType::from_extension)
        .ok_or_else(|| DocumentError::UnsupportedFormat {
            file_name: file_name.to_string(),
            extension,
        })
}

/// 把 PDF 的前 `page_limit` 页各自导出成独立的单页 PDF
///
/// 每页都是完整的文档（保留共享资源、删除其他页面后重新序列化），
/// 不是按字节截取的片段。
pub fn split_pdf_pages(
    bytes: &[u8],
    file_name: &str,
    page_limit: Option<u32>,
) -> Result<SplitPdf, DocumentError> {
    let document = Document::load_mem(bytes).map_err(|source| DocumentError::InvalidPdf {
        file_name: file_name.to_string(),
        source,
    })?;

    let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    let total_pages = page_numbers.len() as u32;
    let take = page_limit.map_or(total_pages, |limit| limit.min(total_pages)) as usize;

    debug!("{} 共 {} 页，导出前 {} 页", file_name, total_pages, take);

    let mut pages = Vec::with_capacity(take);
    for (index, &page_number) in page_numbers.iter().take(take).enumerate() {
        let others: Vec<u32> = page_numbers
            .iter()
            .copied()
            .filter(|&n| n != page_number)
            .collect();

        let mut single = document.clone();
        single.delete_pages(&others);
        single.prune_objects();
        single.renumber_objects();

        let mut buffer = Vec::new();
        single
            .save_to(&mut buffer)
            .map_err(|e| DocumentError::PageExtraction {
                file_name: file_name.to_string(),
                page_number: index as u32 + 1,
                message: e.to_string(),
            })?;
        pages.push(buffer);
    }

    Ok(SplitPdf { pages, total_pages })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use lopdf::{dictionary, Document, Object, Stream};

    /// 生成每页一段文字的 PDF
    pub fn multipage_pdf(page_texts: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.4");

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        });

        let mut page_ids = Vec::new();
        for text in page_texts {
            let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", text);
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Resources" => resources_id,
                "Contents" => content_id,
            });
            page_ids.push(page_id);
        }

        let kids: Vec<Object> = page_ids.iter().map(|&id| id.into()).collect();
        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(page_texts.len() as i64),
        });
        for page_id in &page_ids {
            if let Ok(Object::Dictionary(dict)) = doc.get_object_mut(*page_id) {
                dict.set("Parent", pages_id);
            }
        }

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }
}
