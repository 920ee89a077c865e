//! 程序配置
//!
//! 支持三种来源：默认值、环境变量、TOML 配置文件（`OCR_CONFIG` 指定路径）。
//! 时长一律以毫秒/秒整数保存，通过类型化的访问方法转成 `Duration`。

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// OCR 服务地址（如 `https://<resource>.cognitiveservices.azure.com`）
    pub endpoint: String,
    /// OCR 服务密钥，为空时使用禁用客户端
    pub api_key: String,
    /// 处理策略
    pub policy: OcrPolicy,
    /// 单请求节流窗口（毫秒），窗口内最多 `max_parallel_requests` 次物理请求
    pub request_pacing_window_ms: u64,
    /// 重试策略
    pub retry: RetryPolicy,
    /// 轮询策略
    pub poll: PollPolicy,
    /// 识别结果输出目录
    pub output_folder: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 输出日志文件
    pub output_log_file: String,
}

/// 文档处理策略
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct OcrPolicy {
    /// 是否按免费档处理（限制每个文档的页数）
    pub use_free_tier: bool,
    /// 免费档每个文档最多处理的页数
    pub free_tier_page_limit: u32,
    /// 单个文档的字节上限
    pub max_document_bytes: Option<u64>,
    /// 同时处理的文档数量
    pub max_parallel_documents: usize,
    /// 节流窗口内允许的物理请求数
    pub max_parallel_requests: usize,
    /// 全局滑动窗口限流
    pub rate_limit: RateLimitConfig,
}

/// 滑动窗口限流配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub calls: usize,
    pub window_seconds: u64,
}

/// 重试策略：线性退避 + 逐次放大的单次超时
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub base_timeout_ms: u64,
}

/// 轮询策略
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    /// 服务端未给出 Retry-After 时的轮询间隔
    pub delay_ms: u64,
    /// 单次尝试内最多轮询次数
    pub max_polls: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            policy: OcrPolicy::default(),
            request_pacing_window_ms: 150,
            retry: RetryPolicy::default(),
            poll: PollPolicy::default(),
            output_folder: "output_text".to_string(),
            verbose_logging: false,
            output_log_file: "output.txt".to_string(),
        }
    }
}

impl Default for OcrPolicy {
    fn default() -> Self {
        Self {
            use_free_tier: false,
            free_tier_page_limit: 2,
            max_document_bytes: None,
            max_parallel_documents: 2,
            max_parallel_requests: 4,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            calls: 20,
            window_seconds: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            base_timeout_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次失败后的等待时间（线性退避，attempt 从 1 开始）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(u64::from(attempt.max(1))))
    }

    /// 第 `attempt` 次尝试的超时预算
    pub fn timeout_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_timeout_ms.saturating_mul(u64::from(attempt.max(1))))
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::batch()
    }
}

impl PollPolicy {
    /// 交互式单图识别：短间隔
    pub fn interactive() -> Self {
        Self {
            delay_ms: 150,
            max_polls: 200,
        }
    }

    /// 批量文档识别：长间隔
    pub fn batch() -> Self {
        Self {
            delay_ms: 2_000,
            max_polls: 120,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        let default_policy = default.policy.clone();
        Self {
            endpoint: std::env::var("OCR_ENDPOINT").unwrap_or(default.endpoint),
            api_key: std::env::var("OCR_API_KEY").unwrap_or(default.api_key),
            policy: OcrPolicy {
                use_free_tier: env_or("OCR_USE_FREE_TIER", default_policy.use_free_tier),
                free_tier_page_limit: env_or(
                    "OCR_FREE_TIER_PAGE_LIMIT",
                    default_policy.free_tier_page_limit,
                ),
                max_document_bytes: std::env::var("OCR_MAX_DOCUMENT_BYTES")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .or(default_policy.max_document_bytes),
                max_parallel_documents: env_or(
                    "OCR_MAX_PARALLEL_DOCUMENTS",
                    default_policy.max_parallel_documents,
                ),
                max_parallel_requests: env_or(
                    "OCR_MAX_PARALLEL_REQUESTS",
                    default_policy.max_parallel_requests,
                ),
                rate_limit: RateLimitConfig {
                    calls: env_or("OCR_RATE_LIMIT_CALLS", default_policy.rate_limit.calls),
                    window_seconds: env_or(
                        "OCR_RATE_LIMIT_WINDOW_SECONDS",
                        default_policy.rate_limit.window_seconds,
                    ),
                },
            },
            request_pacing_window_ms: env_or(
                "OCR_REQUEST_PACING_WINDOW_MS",
                default.request_pacing_window_ms,
            ),
            retry: default.retry,
            poll: PollPolicy {
                delay_ms: env_or("OCR_POLL_DELAY_MS", default.poll.delay_ms),
                max_polls: default.poll.max_polls,
            },
            output_folder: std::env::var("OCR_OUTPUT_FOLDER").unwrap_or(default.output_folder),
            verbose_logging: env_or("VERBOSE_LOGGING", default.verbose_logging),
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(default.output_log_file),
        }
    }

    /// 从 TOML 文件加载，缺省字段使用默认值
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::TomlParseFailed {
            path: path.display().to_string(),
            source,
        })
    }

    /// `OCR_CONFIG` 指向配置文件时读文件，否则读环境变量
    pub fn load() -> Result<Self, ConfigError> {
        let config = match std::env::var("OCR_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_toml_file(path)?,
            _ => Self::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub fn request_pacing_window(&self) -> Duration {
        Duration::from_millis(self.request_pacing_window_ms)
    }

    /// 校验配置，在发出任何远程请求之前失败
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.has_credentials() && self.endpoint.trim().is_empty() {
            return Err(ConfigError::Missing {
                name: "endpoint".to_string(),
            });
        }
        if !self.endpoint.is_empty()
            && !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://"))
        {
            return Err(invalid("endpoint", &self.endpoint, "必须以 http:// 或 https:// 开头"));
        }
        if self.policy.max_parallel_documents == 0 {
            return Err(invalid("max_parallel_documents", "0", "至少为 1"));
        }
        if self.policy.max_parallel_requests == 0 {
            return Err(invalid("max_parallel_requests", "0", "至少为 1"));
        }
        if self.policy.rate_limit.calls == 0 {
            return Err(invalid("rate_limit.calls", "0", "至少为 1"));
        }
        if self.policy.rate_limit.window_seconds == 0 {
            return Err(invalid("rate_limit.window_seconds", "0", "至少为 1 秒"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "0", "至少为 1"));
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn invalid(name: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name: name.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
