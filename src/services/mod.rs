pub mod image_normalizer;
pub mod ocr_client;
pub mod preprocessor;

pub use image_normalizer::{pad_to_minimum, Payload, MIN_IMAGE_DIMENSION};
pub use ocr_client::{DisabledOcrJobClient, OcrJobClient, RemoteOcrJobClient, RetryHook};
pub use preprocessor::{split_pdf_pages, DocumentPreprocessor, PreprocessPolicy, SplitPdf};
