use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::context::{CommandContext, CommandReply};
use crate::handler::CommandHandler;
use crate::service::GuardService;
use crate::Result;

/// status 命令处理器
pub struct StatusCommandHandler {
    service: Arc<GuardService>,
}

impl StatusCommandHandler {
    pub fn new(service: Arc<GuardService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl CommandHandler for StatusCommandHandler {
    async fn handle(&self, context: CommandContext) -> Result<CommandReply> {
        debug!("📊 StatusCommandHandler: {:?}", context.sender);
        let status = self.service.status();

        let mut reply = CommandReply::message("=== ModGuard Status ===")
            .line(format!("Allowed mod loaders: {}", status.allowed_loaders.join(", ")))
            .line(format!("Blocked mods: {}", status.blocked_mods))
            .line(format!("Kick on detection: {}", status.enforcement_enabled))
            .line(format!("Checked players: {}", status.stats.checked))
            .line(format!("Modded players: {}", status.stats.modded))
            .line(format!("Flagged players: {}", status.stats.flagged));

        if !status.detected_identifiers.is_empty() {
            reply.push(format!(
                "Detected blocked mods: {}",
                status.detected_identifiers.join(", ")
            ));
        }
        Ok(reply)
    }

    fn name(&self) -> &'static str {
        "status"
    }

    fn usage(&self) -> &'static str {
        "status - show detection status"
    }
}
