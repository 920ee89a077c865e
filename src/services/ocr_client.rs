//! OCR 任务客户端 - 业务能力层
//!
//! 对单个任务执行"提交 → 轮询"，负责：
//! - 小图补边
//! - 请求节流（每次物理请求前在节流器上取得准入）
//! - 瞬时错误的重试与线性退避，每次尝试的超时逐次放大
//!
//! 远程错误一律转换成 `Failed` 结果，只有调用方取消会以 `Err` 返回。

use crate::config::{PollPolicy, RetryPolicy};
use crate::error::{AppError, AppResult, OcrError};
use crate::clients::{OperationStatus, ReadApi};
use crate::infrastructure::{read_source, RateLimiter};
use crate::models::{Job, JobEvent, JobEventSink, JobResult, JobStatus};
use crate::services::image_normalizer::{pad_to_minimum, Payload};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 每次重试前调用，参数为 (刚失败的尝试序号, 退避时长)
pub type RetryHook = Arc<dyn Fn(u32, Duration) + Send + Sync>;

/// 单任务 OCR 客户端
#[async_trait]
pub trait OcrJobClient: Send + Sync {
    /// 识别一个任务
    ///
    /// # 参数
    /// - `job`: 待识别的任务
    /// - `events`: 任务内部状态变化（Running / Waiting）的接收方
    /// - `cancel`: 整体取消信号
    ///
    /// # 返回
    /// - `Ok(JobResult)`：终态结果（Completed 或 Failed）
    /// - `Err(AppError::Cancelled)`：被调用方取消
    async fn analyze(
        &self,
        job: &Job,
        events: JobEventSink<'_>,
        cancel: &CancellationToken,
    ) -> AppResult<JobResult>;
}

/// 调用远程 Read API 的客户端
pub struct RemoteOcrJobClient<A: ReadApi> {
    api: A,
    pacer: Arc<RateLimiter>,
    retry: RetryPolicy,
    poll: PollPolicy,
    retry_hook: Option<RetryHook>,
}

impl<A: ReadApi> RemoteOcrJobClient<A> {
    pub fn new(api: A, pacer: Arc<RateLimiter>, retry: RetryPolicy, poll: PollPolicy) -> Self {
        Self {
            api,
            pacer,
            retry,
            poll,
            retry_hook: None,
        }
    }

    pub fn with_retry_hook(mut self, hook: RetryHook) -> Self {
        self.retry_hook = Some(hook);
        self
    }

    /// 读取内容并按需补边
    async fn load_payload(&self, job: &Job, cancel: &CancellationToken) -> AppResult<Payload> {
        let bytes = Bytes::from(read_source(job.byte_source.as_ref(), None, cancel).await?);
        let content_type = job.content_type;

        if !content_type.is_raster() {
            return Ok(Payload::unchanged(bytes, content_type));
        }

        let payload = tokio::task::spawn_blocking(move || pad_to_minimum(bytes, content_type))
            .await
            .map_err(|e| OcrError::Source(e.to_string()))??;

        if let Some((width, height)) = payload.padded_from {
            info!("🖼️ {} 原始尺寸 {}x{}，已补边后提交", job.label, width, height);
        }
        Ok(payload)
    }

    /// 一次完整的尝试：读取 → 提交 → 轮询到终态
    ///
    /// 只有第一次提交算作 `Running`，之后的重新提交和每一轮轮询都上报 `Waiting`。
    async fn run_attempt(
        &self,
        job: &Job,
        attempt: u32,
        events: JobEventSink<'_>,
        cancel: &CancellationToken,
    ) -> AppResult<JobResult> {
        let payload = self.load_payload(job, cancel).await?;

        if attempt > 1 {
            events(
                JobEvent::status(JobStatus::Waiting)
                    .with_message(format!("第 {} 次提交", attempt)),
            );
        }

        self.pacer.acquire(cancel).await?;
        let submitted = self.api.submit(payload.bytes, payload.content_type).await?;
        let operation_id = submitted.operation_id;
        debug!("{} 已提交，操作 ID: {}", job.label, operation_id);

        let mut wait = submitted.retry_after.unwrap_or_else(|| self.poll.delay());
        for round in 1..=self.poll.max_polls {
            events(
                JobEvent::status(JobStatus::Waiting)
                    .with_message(format!("操作 {} 识别中（第 {} 次轮询）", operation_id, round)),
            );
            sleep(wait).await;

            self.pacer.acquire(cancel).await?;
            let response = self.api.poll(&operation_id).await?;

            match response.status {
                OperationStatus::Succeeded => {
                    return Ok(JobResult::completed(response.joined_text())
                        .with_operation_id(operation_id)
                        .with_poll_delay(Some(wait)));
                }
                OperationStatus::Failed => {
                    let message = response
                        .error_message
                        .unwrap_or_else(|| "OCR 服务返回失败状态".to_string());
                    return Ok(JobResult::failed(message)
                        .with_operation_id(operation_id)
                        .with_retry_after(response.retry_after));
                }
                OperationStatus::NotStarted | OperationStatus::Running => {
                    wait = response.retry_after.unwrap_or_else(|| self.poll.delay());
                }
            }
        }

        Err(OcrError::PollTimeout {
            operation_id,
            polls: self.poll.max_polls,
        }
        .into())
    }
}

#[async_trait]
impl<A: ReadApi> OcrJobClient for RemoteOcrJobClient<A> {
    async fn analyze(
        &self,
        job: &Job,
        events: JobEventSink<'_>,
        cancel: &CancellationToken,
    ) -> AppResult<JobResult> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        events(JobEvent::status(JobStatus::Running));

        loop {
            let timeout = self.retry.timeout_for(attempt);
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                outcome = tokio::time::timeout(
                    timeout,
                    self.run_attempt(job, attempt, events, cancel),
                ) => outcome,
            };

            let error = match outcome {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(AppError::Cancelled)) => return Err(AppError::Cancelled),
                Ok(Err(AppError::Ocr(error))) => error,
                Ok(Err(other)) => return Ok(JobResult::failed(other.to_string())),
                Err(_) => OcrError::Timeout { attempt, timeout },
            };

            if !error.is_transient() || attempt >= max_attempts {
                warn!(
                    "❌ {} 第 {}/{} 次尝试失败，不再重试: {}",
                    job.label, attempt, max_attempts, error
                );
                return Ok(JobResult::failed(error.to_string()).with_retry_after(error.retry_after()));
            }

            let delay = match error.retry_after() {
                Some(retry_after) => retry_after.max(self.retry.delay_for(attempt)),
                None => self.retry.delay_for(attempt),
            };

            warn!(
                "⚠️ {} 第 {}/{} 次尝试失败: {}，{:?} 后重试",
                job.label, attempt, max_attempts, error, delay
            );
            if let Some(hook) = &self.retry_hook {
                hook(attempt, delay);
            }
            events(
                JobEvent::status(JobStatus::Waiting)
                    .with_message(error.to_string())
                    .with_retry_after(delay),
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                _ = sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

/// 未配置 OCR 服务时使用的客户端，每个任务都直接失败并说明原因
pub struct DisabledOcrJobClient {
    reason: String,
}

impl DisabledOcrJobClient {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl OcrJobClient for DisabledOcrJobClient {
    async fn analyze(
        &self,
        _job: &Job,
        _events: JobEventSink<'_>,
        cancel: &CancellationToken,
    ) -> AppResult<JobResult> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        Ok(JobResult::failed(format!("OCR 服务未启用: {}", self.reason)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{PollResponse, SubmitResponse};
    use crate::infrastructure::MemorySource;
    use crate::models::ContentType;
    use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;
    use tokio_test::{assert_err, assert_ok};

    enum SubmitStep {
        Reply(Result<SubmitResponse, OcrError>),
        Hang,
    }

    /// 按脚本应答的 Read API，脚本用完后默认成功
    #[derive(Default)]
    struct ScriptedApi {
        submits: Mutex<VecDeque<SubmitStep>>,
        polls: Mutex<VecDeque<Result<PollResponse, OcrError>>>,
        received: Mutex<Vec<(Bytes, ContentType)>>,
        submit_calls: AtomicUsize,
        poll_calls: AtomicUsize,
        submit_times: Mutex<Vec<Instant>>,
        poll_times: Mutex<Vec<Instant>>,
    }

    impl ScriptedApi {
        fn with_submits(self, steps: Vec<SubmitStep>) -> Self {
            *self.submits.lock().unwrap() = steps.into();
            self
        }

        fn with_polls(self, polls: Vec<Result<PollResponse, OcrError>>) -> Self {
            *self.polls.lock().unwrap() = polls.into();
            self
        }
    }

    #[async_trait]
    impl ReadApi for ScriptedApi {
        async fn submit(
            &self,
            body: Bytes,
            content_type: ContentType,
        ) -> Result<SubmitResponse, OcrError> {
            let call = self.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.submit_times.lock().unwrap().push(Instant::now());
            self.received.lock().unwrap().push((body, content_type));
            let step = self.submits.lock().unwrap().pop_front();
            match step {
                Some(SubmitStep::Reply(reply)) => reply,
                Some(SubmitStep::Hang) => std::future::pending().await,
                None => Ok(SubmitResponse {
                    operation_id: format!("op-{}", call),
                    retry_after: None,
                }),
            }
        }

        async fn poll(&self, _operation_id: &str) -> Result<PollResponse, OcrError> {
            self.poll_calls.fetch_add(1, Ordering::SeqCst);
            self.poll_times.lock().unwrap().push(Instant::now());
            let next = self.polls.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(succeeded(&["done"])))
        }
    }

    fn running() -> PollResponse {
        PollResponse {
            status: OperationStatus::Running,
            pages: Vec::new(),
            error_message: None,
            retry_after: None,
        }
    }

    fn gaps(times: &[Instant]) -> Vec<Duration> {
        times.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }

    /// 暂停时钟下计时器按毫秒取整，允许极小的偏差
    fn assert_about(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual < expected + Duration::from_millis(10),
            "期望约 {:?}，实际 {:?}",
            expected,
            actual
        );
    }

    fn succeeded(lines: &[&str]) -> PollResponse {
        PollResponse {
            status: OperationStatus::Succeeded,
            pages: vec![lines.iter().map(|line| line.to_string()).collect()],
            error_message: None,
            retry_after: None,
        }
    }

    fn unavailable() -> OcrError {
        OcrError::Http {
            status: 503,
            message: "Service Unavailable".to_string(),
            retry_after: None,
        }
    }

    fn client(api: ScriptedApi) -> RemoteOcrJobClient<ScriptedApi> {
        RemoteOcrJobClient::new(
            api,
            Arc::new(RateLimiter::new(4, Duration::from_millis(150))),
            RetryPolicy::default(),
            PollPolicy::interactive(),
        )
    }

    fn pdf_job() -> Job {
        Job::new(
            "doc.pdf",
            1,
            "Page 1",
            ContentType::Pdf,
            Arc::new(MemorySource::new("doc.pdf (Page 1)", b"%PDF-1.4".to_vec())),
        )
    }

    fn png_job(width: u32, height: u32) -> Job {
        let image = RgbImage::from_pixel(width, height, Rgb([0, 0, 0]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        Job::new(
            "tiny.png",
            1,
            "tiny.png",
            ContentType::Png,
            Arc::new(MemorySource::new("tiny.png", bytes)),
        )
    }

    fn collect_events() -> (Arc<Mutex<Vec<JobEvent>>>, impl Fn(JobEvent) + Send + Sync) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let events = events.clone();
            move |event: JobEvent| events.lock().unwrap().push(event)
        };
        (events, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_succeeded() {
        let api = ScriptedApi::default().with_polls(vec![
            Ok(running()),
            Ok(running()),
            Ok(running()),
            Ok(succeeded(&["Hello", "World"])),
        ]);
        let client = client(api);
        let cancel = CancellationToken::new();
        let (events, sink) = collect_events();

        let result = assert_ok!(client.analyze(&pdf_job(), &sink, &cancel).await);

        assert_eq!(result.status, JobStatus::Completed);
        assert_eq!(result.text.as_deref(), Some("Hello\nWorld"));
        assert_eq!(result.operation_id.as_deref(), Some("op-1"));
        assert_eq!(client.api.poll_calls.load(Ordering::SeqCst), 4);
        assert_eq!(client.api.submit_calls.load(Ordering::SeqCst), 1);

        // 一次 Running，之后每轮轮询一次 Waiting
        let statuses: Vec<JobStatus> = events.lock().unwrap().iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                JobStatus::Running,
                JobStatus::Waiting,
                JobStatus::Waiting,
                JobStatus::Waiting,
                JobStatus::Waiting
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retried_job_never_returns_to_running() {
        let api = ScriptedApi::default()
            .with_submits(vec![SubmitStep::Reply(Err(unavailable()))])
            .with_polls(vec![Ok(running()), Ok(succeeded(&["ok"]))]);
        let client = client(api);
        let cancel = CancellationToken::new();
        let (events, sink) = collect_events();

        let result = assert_ok!(client.analyze(&pdf_job(), &sink, &cancel).await);
        assert_eq!(result.status, JobStatus::Completed);
        assert_eq!(client.api.submit_calls.load(Ordering::SeqCst), 2);

        let events = events.lock().unwrap();
        let statuses: Vec<JobStatus> = events.iter().map(|e| e.status).collect();
        // 退避、重新提交、两轮轮询
        assert_eq!(
            statuses,
            vec![
                JobStatus::Running,
                JobStatus::Waiting,
                JobStatus::Waiting,
                JobStatus::Waiting,
                JobStatus::Waiting
            ]
        );
        assert_eq!(events[1].retry_after, Some(Duration::from_millis(500)));
        assert_eq!(events[2].message.as_deref(), Some("第 2 次提交"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_retry_after_replaces_default_delay() {
        let api = ScriptedApi::default().with_polls(vec![
            Ok(PollResponse {
                retry_after: Some(Duration::from_secs(5)),
                ..running()
            }),
            Ok(succeeded(&["late"])),
        ]);
        let client = client(api);
        let cancel = CancellationToken::new();

        let result = assert_ok!(client.analyze(&pdf_job(), &|_| {}, &cancel).await);
        assert_eq!(result.status, JobStatus::Completed);
        assert_eq!(result.suggested_poll_delay, Some(Duration::from_secs(5)));

        let submitted = client.api.submit_times.lock().unwrap()[0];
        let polls = client.api.poll_times.lock().unwrap();
        assert_eq!(polls.len(), 2);
        // 第一轮用默认间隔，第二轮服从 Retry-After
        assert_about(polls[0] - submitted, Duration::from_millis(150));
        assert_about(polls[1] - polls[0], Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_retry_after_sets_first_poll_delay() {
        let api = ScriptedApi::default().with_submits(vec![SubmitStep::Reply(Ok(SubmitResponse {
            operation_id: "op-slow".to_string(),
            retry_after: Some(Duration::from_secs(3)),
        }))]);
        let client = client(api);
        let cancel = CancellationToken::new();

        assert_ok!(client.analyze(&pdf_job(), &|_| {}, &cancel).await);

        let submitted = client.api.submit_times.lock().unwrap()[0];
        let first_poll = client.api.poll_times.lock().unwrap()[0];
        assert_about(first_poll - submitted, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_back_off_linearly() {
        let api = ScriptedApi::default().with_submits(vec![
            SubmitStep::Reply(Err(unavailable())),
            SubmitStep::Reply(Err(unavailable())),
        ]);
        let delays = Arc::new(Mutex::new(Vec::new()));
        let hook: RetryHook = {
            let delays = delays.clone();
            Arc::new(move |attempt, delay| delays.lock().unwrap().push((attempt, delay)))
        };
        let client = client(api).with_retry_hook(hook);
        let cancel = CancellationToken::new();

        let result = assert_ok!(client.analyze(&pdf_job(), &|_| {}, &cancel).await);

        assert_eq!(result.status, JobStatus::Completed);
        assert_eq!(
            *delays.lock().unwrap(),
            vec![
                (1, Duration::from_millis(500)),
                (2, Duration::from_millis(1000))
            ]
        );
        assert_eq!(client.api.submit_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_fail_with_last_error() {
        let throttled = || OcrError::Http {
            status: 429,
            message: "Too Many Requests".to_string(),
            retry_after: Some(Duration::from_secs(2)),
        };
        let api = ScriptedApi::default().with_submits(vec![
            SubmitStep::Reply(Err(throttled())),
            SubmitStep::Reply(Err(throttled())),
            SubmitStep::Reply(Err(throttled())),
        ]);
        let client = client(api);
        let cancel = CancellationToken::new();

        let result = assert_ok!(client.analyze(&pdf_job(), &|_| {}, &cancel).await);

        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.error_message.unwrap().contains("429"));
        assert_eq!(result.retry_after, Some(Duration::from_secs(2)));
        assert_eq!(client.api.submit_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vendor_failure_is_not_retried() {
        let api = ScriptedApi::default().with_polls(vec![Ok(PollResponse {
            status: OperationStatus::Failed,
            pages: Vec::new(),
            error_message: Some("InvalidImage: The image is corrupt".to_string()),
            retry_after: None,
        })]);
        let client = client(api);
        let cancel = CancellationToken::new();

        let result = assert_ok!(client.analyze(&pdf_job(), &|_| {}, &cancel).await);

        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(
            result.error_message.as_deref(),
            Some("InvalidImage: The image is corrupt")
        );
        assert_eq!(client.api.submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_error_is_not_retried() {
        let api = ScriptedApi::default().with_submits(vec![SubmitStep::Reply(Err(
            OcrError::MissingOperationLocation,
        ))]);
        let client = client(api);
        let cancel = CancellationToken::new();

        let result = assert_ok!(client.analyze(&pdf_job(), &|_| {}, &cancel).await);
        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(client.api.submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_small_png_is_padded_before_submit() {
        let client = client(ScriptedApi::default());
        let cancel = CancellationToken::new();

        assert_ok!(client.analyze(&png_job(10, 20), &|_| {}, &cancel).await);

        let received = client.api.received.lock().unwrap();
        let (bytes, content_type) = &received[0];
        assert_eq!(*content_type, ContentType::Png);
        let decoded = image::load_from_memory(bytes).unwrap();
        let (width, height) = decoded.dimensions();
        assert!(width >= 50 && height >= 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pdf_is_submitted_untouched() {
        let client = client(ScriptedApi::default());
        let cancel = CancellationToken::new();

        assert_ok!(client.analyze(&pdf_job(), &|_| {}, &cancel).await);

        let received = client.api.received.lock().unwrap();
        assert_eq!(received[0].0, Bytes::from_static(b"%PDF-1.4"));
        assert_eq!(received[0].1, ContentType::Pdf);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_polling() {
        let api = ScriptedApi::default().with_polls((0..50).map(|_| Ok(running())).collect());
        let client = client(api);
        let cancel = CancellationToken::new();
        let job = pdf_job();
        let sink = |_: JobEvent| {};

        let canceller = async {
            sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        };
        let (result, _) = tokio::join!(client.analyze(&job, &sink, &cancel), canceller);

        let error = assert_err!(result);
        assert!(error.is_cancelled());
        assert!(client.api.poll_calls.load(Ordering::SeqCst) < 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_grows_per_attempt() {
        let api = ScriptedApi::default().with_submits(vec![SubmitStep::Hang, SubmitStep::Hang]);
        let delays = Arc::new(Mutex::new(Vec::new()));
        let hook: RetryHook = {
            let delays = delays.clone();
            Arc::new(move |attempt, delay| delays.lock().unwrap().push((attempt, delay)))
        };
        let client = RemoteOcrJobClient::new(
            api,
            Arc::new(RateLimiter::new(4, Duration::from_millis(150))),
            RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 500,
                base_timeout_ms: 1_000,
            },
            PollPolicy::interactive(),
        )
        .with_retry_hook(hook);
        let cancel = CancellationToken::new();

        let result = assert_ok!(client.analyze(&pdf_job(), &|_| {}, &cancel).await);

        assert_eq!(result.status, JobStatus::Completed);
        assert_eq!(
            *delays.lock().unwrap(),
            vec![
                (1, Duration::from_millis(500)),
                (2, Duration::from_millis(1000))
            ]
        );
        assert_eq!(client.api.submit_calls.load(Ordering::SeqCst), 3);

        // 第 1 次超时 1s + 退避 0.5s；第 2 次超时 2s + 退避 1s
        let submits = gaps(&client.api.submit_times.lock().unwrap());
        assert_about(submits[0], Duration::from_millis(1_500));
        assert_about(submits[1], Duration::from_millis(3_000));
    }

    #[tokio::test]
    async fn test_disabled_client_fails_with_reason() {
        let client = DisabledOcrJobClient::new("缺少 OCR_API_KEY");
        let cancel = CancellationToken::new();

        let result = assert_ok!(client.analyze(&pdf_job(), &|_| {}, &cancel).await);
        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.error_message.unwrap().contains("OCR_API_KEY"));

        cancel.cancel();
        assert_err!(client.analyze(&pdf_job(), &|_| {}, &cancel).await);
    }
}
