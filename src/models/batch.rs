use crate::models::job::Job;
use crate::models::result::{JobResult, JobStatus};
use uuid::Uuid;

/// 由一个源文档拆出的全部任务
///
/// `jobs` 按页码升序排列，创建后只读。
#[derive(Debug, Clone)]
pub struct Batch {
    pub batch_id: Uuid,
    pub source_name: String,
    pub jobs: Vec<Job>,
    /// 是否因免费档页数上限被截断
    pub truncated_by_tier_limit: bool,
}

impl Batch {
    pub fn total_jobs(&self) -> usize {
        self.jobs.len()
    }

    pub fn page_numbers(&self) -> Vec<u32> {
        self.jobs.iter().map(|job| job.page_number).collect()
    }
}

/// 批次处理结果
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub batch_id: Uuid,
    pub source_name: String,
    /// 按页码顺序排列的 (任务, 结果)
    pub job_results: Vec<(Job, JobResult)>,
    /// 所有成功页文本按页码顺序换行拼接
    pub aggregated_text: String,
    pub truncated_by_tier_limit: bool,
    /// 整体操作被取消，未执行的任务不在 `job_results` 中
    pub cancelled: bool,
    /// 文档无法预处理时的原因
    pub preparation_error: Option<String>,
}

/// 调用方可区分的批次结局
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// 全部页面识别成功
    Succeeded,
    /// 部分页面失败
    PartiallySucceeded { failed_pages: Vec<u32> },
    /// 文档无法预处理
    NotPrepared { reason: String },
    /// 被取消
    Cancelled,
}

impl BatchResult {
    /// 根据已完成的任务结果构建
    pub fn from_results(
        batch_id: Uuid,
        source_name: impl Into<String>,
        job_results: Vec<(Job, JobResult)>,
        truncated_by_tier_limit: bool,
        cancelled: bool,
    ) -> Self {
        let aggregated_text = aggregate_text(&job_results);
        Self {
            batch_id,
            source_name: source_name.into(),
            job_results,
            aggregated_text,
            truncated_by_tier_limit,
            cancelled,
            preparation_error: None,
        }
    }

    /// 文档无法预处理
    pub fn not_prepared(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            source_name: source_name.into(),
            job_results: Vec::new(),
            aggregated_text: String::new(),
            truncated_by_tier_limit: false,
            cancelled: false,
            preparation_error: Some(reason.into()),
        }
    }

    /// 在开始处理前就被取消
    pub fn cancelled_before_start(batch_id: Uuid, source_name: impl Into<String>) -> Self {
        Self::from_results(batch_id, source_name, Vec::new(), false, true)
    }

    pub fn completed_jobs(&self) -> usize {
        self.job_results
            .iter()
            .filter(|(_, result)| result.is_completed())
            .count()
    }

    pub fn failed_pages(&self) -> Vec<u32> {
        self.job_results
            .iter()
            .filter(|(_, result)| result.status == JobStatus::Failed)
            .map(|(job, _)| job.page_number)
            .collect()
    }

    pub fn outcome(&self) -> BatchOutcome {
        if let Some(reason) = &self.preparation_error {
            return BatchOutcome::NotPrepared {
                reason: reason.clone(),
            };
        }
        if self.cancelled {
            return BatchOutcome::Cancelled;
        }
        let failed_pages = self.failed_pages();
        if failed_pages.is_empty() {
            BatchOutcome::Succeeded
        } else {
            BatchOutcome::PartiallySucceeded { failed_pages }
        }
    }
}

/// 拼接所有成功任务的文本
///
/// 失败的页面不贡献文本，但仍保留在结果列表中用于报错。
pub fn aggregate_text(job_results: &[(Job, JobResult)]) -> String {
    let texts: Vec<&str> = job_results
        .iter()
        .filter(|(_, result)| result.is_completed())
        .filter_map(|(_, result)| result.text.as_deref())
        .collect();
    texts.join("\n").trim().to_string()
}
