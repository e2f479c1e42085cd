use async_trait::async_trait;
use crate::context::{CommandContext, CommandReply};
use crate::Result;

/// 管理命令处理器 trait
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, context: CommandContext) -> Result<CommandReply>;
    fn name(&self) -> &'static str;

    /// 需要的权限；None 表示任何人都可以执行
    fn permission(&self) -> Option<&'static str> {
        None
    }

    /// 用法说明
    fn usage(&self) -> &'static str;
}

// 导出所有处理器
pub mod check_command_handler;
pub mod reload_command_handler;
pub mod scan_command_handler;
pub mod status_command_handler;

pub use check_command_handler::CheckCommandHandler;
pub use reload_command_handler::{ReloadCommandHandler, RELOAD_PERMISSION};
pub use scan_command_handler::ScanCommandHandler;
pub use status_command_handler::StatusCommandHandler;
