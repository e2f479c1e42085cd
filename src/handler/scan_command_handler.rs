use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::context::{CommandContext, CommandReply};
use crate::handler::CommandHandler;
use crate::security::PassOutcome;
use crate::service::GuardService;
use crate::Result;

/// scan 命令处理器
///
/// - `scan`：重扫全部尚未检测完成的在线客户端
/// - `scan <player> [--reset]`：重扫单个客户端，`--reset` 先清除其检测状态
pub struct ScanCommandHandler {
    service: Arc<GuardService>,
}

impl ScanCommandHandler {
    pub fn new(service: Arc<GuardService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl CommandHandler for ScanCommandHandler {
    async fn handle(&self, context: CommandContext) -> Result<CommandReply> {
        let target = context.arg(0).filter(|arg| !arg.starts_with("--"));

        let Some(name) = target else {
            info!("🔍 ScanCommandHandler: {:?} 请求扫描全部客户端", context.sender);
            let summary = self.service.scan_all().await;
            return Ok(CommandReply::message("Scanning all players for mods...").line(format!(
                "Scanned {} player(s): {} clean, {} flagged, {} skipped.",
                summary.scanned, summary.clean, summary.flagged, summary.skipped
            )));
        };

        let reset = context.has_flag("--reset");
        let line = match self.service.rescan(name, reset).await? {
            PassOutcome::Clean => format!("{} is clean.", name),
            PassOutcome::Flagged { identifier, .. } => format!("{} was flagged for {}.", name, identifier),
            PassOutcome::Skipped(reason) => format!("{} was skipped ({}).", name, reason.as_str()),
        };
        Ok(CommandReply::message(line))
    }

    fn name(&self) -> &'static str {
        "scan"
    }

    fn usage(&self) -> &'static str {
        "scan [player] [--reset] - rescan players for mods"
    }
}
