//! 过期上传清扫的后台任务。

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::controller::AppController;

/// 启动后台任务（周期性删除过期上传）。`interval_secs` 为 0 时不启动。
pub fn spawn_background_tasks(controller: Arc<AppController>, interval_secs: u64) {
    if interval_secs == 0 {
        return;
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            match controller.sweep_expired(false).await {
                Ok(stats) if stats.expired > 0 => {
                    info!(
                        deleted = stats.expired,
                        total = stats.total,
                        "expired uploads swept"
                    );
                }
                Ok(_) => {}
                Err(err) => warn!(error = ?err, "expired upload sweep failed"),
            }
        }
    });
}
