//! 图片尺寸规整 - 业务能力层
//!
//! OCR 服务拒绝边长小于 50 像素的图片，提交前把小图居中贴到白色画布上。

use crate::error::OcrError;
use crate::models::ContentType;
use bytes::Bytes;
use image::{imageops, DynamicImage, ImageFormat, ImageReader, Rgba, RgbaImage};
use std::io::Cursor;
use tracing::{debug, warn};

/// 服务接受的最小边长（像素）
pub const MIN_IMAGE_DIMENSION: u32 = 50;

/// 补边使用的中性背景色
const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// 即将提交的内容
#[derive(Debug, Clone)]
pub struct Payload {
    pub bytes: Bytes,
    pub content_type: ContentType,
    /// 补边前的原始尺寸，未补边时为 `None`
    pub padded_from: Option<(u32, u32)>,
}

impl Payload {
    pub fn unchanged(bytes: Bytes, content_type: ContentType) -> Self {
        Self {
            bytes,
            content_type,
            padded_from: None,
        }
    }
}

/// 小于最小尺寸的位图补边到至少 50×50，原图居中
///
/// 只读文件头判断尺寸，够大的图片不解码直接原样返回；
/// 文件头读不出尺寸时也原样提交，交给服务端判断。
/// PDF 原样返回；补边后的图片统一编码为 PNG。
pub fn pad_to_minimum(bytes: Bytes, content_type: ContentType) -> Result<Payload, OcrError> {
    let Some(format) = content_type.image_format() else {
        return Ok(Payload::unchanged(bytes, content_type));
    };

    let (width, height) = match ImageReader::with_format(Cursor::new(&bytes[..]), format)
        .into_dimensions()
    {
        Ok(dimensions) => dimensions,
        Err(e) => {
            warn!("⚠️ 无法读取图片尺寸，按原样提交: {}", e);
            return Ok(Payload::unchanged(bytes, content_type));
        }
    };

    if width >= MIN_IMAGE_DIMENSION && height >= MIN_IMAGE_DIMENSION {
        return Ok(Payload::unchanged(bytes, content_type));
    }

    let image = image::load_from_memory_with_format(&bytes, format)?;

    let canvas_width = width.max(MIN_IMAGE_DIMENSION);
    let canvas_height = height.max(MIN_IMAGE_DIMENSION);
    let mut canvas = RgbaImage::from_pixel(canvas_width, canvas_height, BACKGROUND);

    let x = i64::from((canvas_width - width) / 2);
    let y = i64::from((canvas_height - height) / 2);
    imageops::overlay(&mut canvas, &image.to_rgba8(), x, y);

    let mut encoded = Vec::new();
    DynamicImage::ImageRgba8(canvas).write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)?;

    debug!(
        "图片 {}x{} 小于最小尺寸，已补边到 {}x{}",
        width, height, canvas_width, canvas_height
    );

    Ok(Payload {
        bytes: Bytes::from(encoded),
        content_type: ContentType::Png,
        padded_from: Some((width, height)),
    })
}
