//! 过期提示消息的后台清理任务。

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::FLASH_PRUNE_INTERVAL_SECS;
use crate::flash::FlashStore;

/// 启动后台任务：定期清理无人读取的提示。
pub fn spawn_background_tasks(flash: Arc<FlashStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(FLASH_PRUNE_INTERVAL_SECS));
        loop {
            interval.tick().await;
            flash.prune_expired().await;
            debug!("pruned expired flash notices");
        }
    });
}
