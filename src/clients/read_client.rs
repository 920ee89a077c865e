/// OCR Read API 客户端
///
/// 封装与远程 OCR 服务的 HTTP 交互：提交图片/文档，按操作 ID 查询状态。
/// 只负责一次物理请求，不做重试、不做限流。
use crate::config::Config;
use crate::error::OcrError;
use crate::models::ContentType;
use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const OPERATION_LOCATION_HEADER: &str = "Operation-Location";
const ANALYZE_PATH: &str = "vision/v3.2/read/analyze";
const RESULTS_PATH: &str = "vision/v3.2/read/analyzeResults";

/// 远程操作状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
}

impl OperationStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "notstarted" => Some(OperationStatus::NotStarted),
            "running" => Some(OperationStatus::Running),
            "succeeded" => Some(OperationStatus::Succeeded),
            "failed" => Some(OperationStatus::Failed),
            _ => None,
        }
    }
}

/// 提交结果
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitResponse {
    pub operation_id: String,
    pub retry_after: Option<Duration>,
}

/// 一次状态查询的结果
#[derive(Debug, Clone, PartialEq)]
pub struct PollResponse {
    pub status: OperationStatus,
    /// 每页按阅读顺序排列的文本行
    pub pages: Vec<Vec<String>>,
    pub error_message: Option<String>,
    pub retry_after: Option<Duration>,
}

impl PollResponse {
    /// 所有页面的所有行，按服务返回的顺序逐行拼接
    pub fn joined_text(&self) -> String {
        self.pages
            .iter()
            .flat_map(|lines| lines.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// 远程 OCR 服务边界
#[async_trait]
pub trait ReadApi: Send + Sync {
    /// 提交内容，返回服务分配的操作 ID
    async fn submit(&self, body: Bytes, content_type: ContentType)
        -> Result<SubmitResponse, OcrError>;

    /// 查询操作状态
    async fn poll(&self, operation_id: &str) -> Result<PollResponse, OcrError>;
}

/// 基于 reqwest 的 Read API 客户端
pub struct ReadClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl ReadClient {
    /// 创建新的 Read API 客户端
    pub fn new(config: &Config) -> Result<Self, OcrError> {
        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|source| OcrError::Network {
                endpoint: endpoint.clone(),
                source,
            })?;

        Ok(Self {
            http,
            endpoint,
            api_key: config.api_key.clone(),
        })
    }

    fn analyze_url(&self) -> String {
        format!("{}/{}", self.endpoint, ANALYZE_PATH)
    }

    fn results_url(&self, operation_id: &str) -> String {
        format!("{}/{}/{}", self.endpoint, RESULTS_PATH, operation_id)
    }
}

#[async_trait]
impl ReadApi for ReadClient {
    async fn submit(
        &self,
        body: Bytes,
        content_type: ContentType,
    ) -> Result<SubmitResponse, OcrError> {
        let url = self.analyze_url();
        debug!("提交 OCR 请求: {} ({} 字节, {})", url, body.len(), content_type);

        let response = self
            .http
            .post(&url)
            .header(SUBSCRIPTION_KEY_HEADER, &self.api_key)
            .header(CONTENT_TYPE, content_type.mime_type())
            .body(body)
            .send()
            .await
            .map_err(|source| OcrError::Network {
                endpoint: url.clone(),
                source,
            })?;

        let retry_after = parse_retry_after(response.headers());
        if !response.status().is_success() {
            return Err(http_error(response, retry_after).await);
        }

        let location = response
            .headers()
            .get(OPERATION_LOCATION_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(OcrError::MissingOperationLocation)?;
        let operation_id =
            parse_operation_id(location).ok_or(OcrError::MissingOperationLocation)?;

        debug!("OCR 请求已受理，操作 ID: {}", operation_id);

        Ok(SubmitResponse {
            operation_id,
            retry_after,
        })
    }

    async fn poll(&self, operation_id: &str) -> Result<PollResponse, OcrError> {
        let url = self.results_url(operation_id);

        let response = self
            .http
            .get(&url)
            .header(SUBSCRIPTION_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|source| OcrError::Network {
                endpoint: url.clone(),
                source,
            })?;

        let retry_after = parse_retry_after(response.headers());
        if !response.status().is_success() {
            return Err(http_error(response, retry_after).await);
        }

        let body = response.text().await.map_err(|source| OcrError::Network {
            endpoint: url.clone(),
            source,
        })?;

        let mut parsed = parse_poll_body(&body)?;
        parsed.retry_after = retry_after;
        Ok(parsed)
    }
}

// ========== 响应解析 ==========

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadOperationBody {
    status: String,
    analyze_result: Option<AnalyzeResultBody>,
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResultBody {
    #[serde(default)]
    read_results: Vec<ReadPageBody>,
}

#[derive(Debug, Deserialize)]
struct ReadPageBody {
    #[serde(default)]
    lines: Vec<LineBody>,
}

#[derive(Debug, Deserialize)]
struct LineBody {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

impl ErrorBody {
    fn describe(&self) -> Option<String> {
        match (&self.code, &self.message) {
            (Some(code), Some(message)) => Some(format!("{}: {}", code, message)),
            (None, Some(message)) => Some(message.clone()),
            (Some(code), None) => Some(code.clone()),
            (None, None) => None,
        }
    }
}

/// 解析状态查询的响应体
pub fn parse_poll_body(body: &str) -> Result<PollResponse, OcrError> {
    let parsed: ReadOperationBody = serde_json::from_str(body)
        .map_err(|e| OcrError::InvalidResponse(format!("{} (响应: {})", e, truncate(body))))?;

    let status = OperationStatus::parse(&parsed.status)
        .ok_or_else(|| OcrError::InvalidResponse(format!("未知的操作状态: {}", parsed.status)))?;

    let pages = parsed
        .analyze_result
        .map(|result| {
            result
                .read_results
                .into_iter()
                .map(|page| page.lines.into_iter().map(|line| line.text).collect())
                .collect()
        })
        .unwrap_or_default();

    Ok(PollResponse {
        status,
        pages,
        error_message: parsed.error.as_ref().and_then(ErrorBody::describe),
        retry_after: None,
    })
}

/// 从 Operation-Location 中取出末尾的操作 ID
///
/// 例如 `https://host/vision/v3.2/read/analyzeResults/3fa85f64-5717-4562-b3fc-2c963f66afa6`
pub fn parse_operation_id(location: &str) -> Option<String> {
    static UUID_TAIL: OnceLock<Regex> = OnceLock::new();
    let uuid_tail = UUID_TAIL.get_or_init(|| {
        Regex::new(r"([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})$")
            .expect("固定正则表达式")
    });

    let path = location.split(['?', '#']).next().unwrap_or("").trim();
    let path = path.trim_end_matches('/');

    if let Some(captures) = uuid_tail.captures(path) {
        return Some(captures[1].to_string());
    }

    path.rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty() && !segment.contains(':'))
        .map(str::to_string)
}

/// 解析 Retry-After 头，支持秒数和 HTTP 日期两种写法
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(seconds) = value.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            return Some(Duration::from_secs_f64(seconds));
        }
        return None;
    }

    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

async fn http_error(response: reqwest::Response, retry_after: Option<Duration>) -> OcrError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .ok()
        .and_then(|envelope| envelope.error.describe())
        .unwrap_or_else(|| truncate(&body));

    OcrError::Http {
        status,
        message,
        retry_after,
    }
}

fn truncate(text: &str) -> String {
    crate::utils::logging::truncate_text(text, 200)
}
