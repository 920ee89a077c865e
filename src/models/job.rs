use crate::infrastructure::DocumentSource;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// 任务内容类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Pdf,
    Jpeg,
    Png,
    Tiff,
    Bmp,
}

impl ContentType {
    /// 根据扩展名（不含点，大小写不敏感）判断类型
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(ContentType::Pdf),
            "jpg" | "jpeg" => Some(ContentType::Jpeg),
            "png" => Some(ContentType::Png),
            "tif" | "tiff" => Some(ContentType::Tiff),
            "bmp" => Some(ContentType::Bmp),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ContentType::Pdf => "application/pdf",
            ContentType::Jpeg => "image/jpeg",
            ContentType::Png => "image/png",
            ContentType::Tiff => "image/tiff",
            ContentType::Bmp => "image/bmp",
        }
    }

    /// 是否为位图（只有位图需要做尺寸补边）
    pub fn is_raster(&self) -> bool {
        !matches!(self, ContentType::Pdf)
    }

    pub fn image_format(&self) -> Option<image::ImageFormat> {
        match self {
            ContentType::Pdf => None,
            ContentType::Jpeg => Some(image::ImageFormat::Jpeg),
            ContentType::Png => Some(image::ImageFormat::Png),
            ContentType::Tiff => Some(image::ImageFormat::Tiff),
            ContentType::Bmp => Some(image::ImageFormat::Bmp),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// 单个 OCR 任务（一页 / 一张图片）
///
/// 创建后不可变，由所属批次独占，直到被 OCR 客户端消费。
#[derive(Clone)]
pub struct Job {
    pub id: Uuid,
    pub source_name: String,
    /// 页码，从 1 开始
    pub page_number: u32,
    pub label: String,
    pub content_type: ContentType,
    /// 按需打开的内容
    pub byte_source: Arc<dyn DocumentSource>,
    pub original_byte_length: Option<u64>,
}

impl Job {
    pub fn new(
        source_name: impl Into<String>,
        page_number: u32,
        label: impl Into<String>,
        content_type: ContentType,
        byte_source: Arc<dyn DocumentSource>,
    ) -> Self {
        let original_byte_length = byte_source.length_bytes();
        Self {
            id: Uuid::new_v4(),
            source_name: source_name.into(),
            page_number,
            label: label.into(),
            content_type,
            byte_source,
            original_byte_length,
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("source_name", &self.source_name)
            .field("page_number", &self.page_number)
            .field("label", &self.label)
            .field("content_type", &self.content_type)
            .field("original_byte_length", &self.original_byte_length)
            .finish()
    }
}
