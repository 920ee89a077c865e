use anyhow::Result;
use ocr_batch::utils::logging;
use ocr_batch::{App, Config};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::load()?;

    // 初始化日志
    logging::init(config.verbose_logging);

    let paths: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if paths.is_empty() {
        warn!("用法: ocr_batch <文件或目录>...");
        return Ok(());
    }

    // Ctrl-C 取消整个运行，已完成的页面仍会写出
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("⏹️ 收到 Ctrl-C，正在取消...");
                cancel.cancel();
            }
        });
    }

    // 初始化并运行应用
    App::initialize(config)?.run(paths, &cancel).await?;

    Ok(())
}
