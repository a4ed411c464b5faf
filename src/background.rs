//! 孤立临时文件的后台清理任务。

use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::atomic::sweep_stale_temp_files;
use crate::config::TEMP_CLEAN_INTERVAL_SECS;

/// 启动后台任务：定期清理各目录中早于 `ttl` 的原子写入临时文件。
///
/// `ttl` 为零时不启动。
pub fn spawn_background_tasks(dirs: Vec<PathBuf>, ttl: Duration) {
    if ttl.is_zero() {
        return;
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(TEMP_CLEAN_INTERVAL_SECS));
        loop {
            interval.tick().await;
            for dir in &dirs {
                match sweep_stale_temp_files(dir, ttl).await {
                    Ok(0) => {}
                    Ok(removed) => info!(?dir, removed, "removed stale temp files"),
                    Err(err) => warn!(?dir, error = %err, "temp cleanup failed"),
                }
            }
        }
    });
}
