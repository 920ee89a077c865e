pub mod job_ctx;
pub mod page_flow;

pub use job_ctx::JobCtx;
pub use page_flow::PageFlow;
