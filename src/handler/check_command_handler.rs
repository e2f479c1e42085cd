use async_trait::async_trait;
use std::sync::Arc;

use crate::context::{CommandContext, CommandReply};
use crate::error::GuardError;
use crate::handler::CommandHandler;
use crate::service::GuardService;
use crate::Result;

/// check 命令处理器：查看单个客户端的检测结果
pub struct CheckCommandHandler {
    service: Arc<GuardService>,
}

impl CheckCommandHandler {
    pub fn new(service: Arc<GuardService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl CommandHandler for CheckCommandHandler {
    async fn handle(&self, context: CommandContext) -> Result<CommandReply> {
        let name = context
            .arg(0)
            .ok_or_else(|| GuardError::InvalidCommand(format!("Usage: {}", self.usage())))?;
        let report = self.service.check(name)?;

        let channels = if report.channels.is_empty() {
            "none".to_string()
        } else {
            report.channels.join(", ")
        };

        let mut reply = CommandReply::message(format!("=== Mod Check: {} ===", report.name))
            .line(format!("Checked: {}", report.checked))
            .line(format!("Modded: {}", report.uses_mod_loader))
            .line(format!("Flagged: {}", report.flagged))
            .line(format!("Phase: {}", report.phase.unwrap_or("untracked")))
            .line(format!("Channels: {}", channels));
        if let Some(brand) = &report.brand {
            reply.push(format!("Brand: {}", brand));
        }
        if !report.detected_identifiers.is_empty() {
            reply.push(format!("Detected: {}", report.detected_identifiers.join(", ")));
        }
        Ok(reply)
    }

    fn name(&self) -> &'static str {
        "check"
    }

    fn usage(&self) -> &'static str {
        "check <player> - show a player's detection result"
    }
}
