use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

use crate::context::{CommandContext, CommandReply};
use crate::handler::CommandHandler;
use crate::service::GuardService;
use crate::Result;

/// reload 命令需要的权限
pub const RELOAD_PERMISSION: &str = "modguard.reload";

/// reload 命令处理器
pub struct ReloadCommandHandler {
    service: Arc<GuardService>,
}

impl ReloadCommandHandler {
    pub fn new(service: Arc<GuardService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl CommandHandler for ReloadCommandHandler {
    async fn handle(&self, context: CommandContext) -> Result<CommandReply> {
        info!("🔄 ReloadCommandHandler: {:?} 请求重载配置", context.sender);

        let summary = self.service.reload().map_err(|e| {
            error!("❌ ReloadCommandHandler: 重载失败，继续使用旧规则: {}", e);
            e
        })?;

        let mut reply = CommandReply::message("ModGuard configuration reloaded!").line(format!(
            "Blocked mods: {}, allowed loaders: {}, kick on detection: {}",
            summary.blocked_mods, summary.allowed_loaders, summary.enforcement_enabled
        ));
        if !summary.registration.is_complete() {
            reply.push(format!(
                "Warning: {} channel(s) could not be registered.",
                summary.registration.failures.len()
            ));
        }
        Ok(reply)
    }

    fn name(&self) -> &'static str {
        "reload"
    }

    fn permission(&self) -> Option<&'static str> {
        Some(RELOAD_PERMISSION)
    }

    fn usage(&self) -> &'static str {
        "reload - reload the configuration"
    }
}
