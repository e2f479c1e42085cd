use std::collections::BTreeMap;
use std::sync::Arc;
use crate::context::{CommandContext, CommandReply, CommandSender};
use crate::error::GuardError;
use crate::handler::CommandHandler;
use crate::infra::ServerHost;
use tracing::{debug, warn};

/// 根命令名
pub const ROOT_COMMAND: &str = "modguard";

/// 管理命令分发器
///
/// 按子命令名路由到处理器；权限检查和错误渲染都在这里完成，
/// 处理器返回的错误不会继续向上传播。
pub struct CommandDispatcher {
    handlers: BTreeMap<String, Box<dyn CommandHandler>>,
    host: Arc<dyn ServerHost>,
}

impl CommandDispatcher {
    pub fn new(host: Arc<dyn ServerHost>) -> Self {
        Self {
            handlers: BTreeMap::new(),
            host,
        }
    }

    pub fn register_handler(&mut self, handler: Box<dyn CommandHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub async fn dispatch(&self, context: CommandContext) -> CommandReply {
        // 查找处理器
        let Some(subcommand) = context.subcommand() else {
            return self.usage();
        };
        let Some(handler) = self.handlers.get(&subcommand) else {
            warn!("未找到子命令 {} 的处理器", subcommand);
            return self.usage();
        };

        if let Err(e) = self.check_permission(handler.as_ref(), &context) {
            return render_error(&e);
        }

        debug!("⌨️ {:?} 执行命令: {}", context.sender, context.args.join(" "));
        match handler.handle(context).await {
            Ok(reply) => reply,
            Err(e) => render_error(&e),
        }
    }

    fn check_permission(&self, handler: &dyn CommandHandler, context: &CommandContext) -> crate::Result<()> {
        if context.is_console() {
            return Ok(());
        }
        match (handler.permission(), context.sender) {
            (Some(permission), CommandSender::Client(id)) if !self.host.has_permission(id, permission) => {
                Err(GuardError::PermissionDenied(permission.to_string()))
            }
            _ => Ok(()),
        }
    }

    /// 用法列表
    pub fn usage(&self) -> CommandReply {
        let mut reply = CommandReply::message(format!("Usage: /{} <subcommand>", ROOT_COMMAND));
        for handler in self.handlers.values() {
            reply.push(format!("  /{} {}", ROOT_COMMAND, handler.usage()));
        }
        reply
    }
}

/// 失败统一渲染成一行回复
fn render_error(error: &GuardError) -> CommandReply {
    let line = match error {
        GuardError::PlayerNotFound(_) => "Player not found.".to_string(),
        GuardError::PermissionDenied(_) => "You don't have permission to use this command.".to_string(),
        GuardError::InvalidCommand(usage) => usage.clone(),
        GuardError::Config(reason) => format!("Failed to reload configuration: {}", reason),
        other => format!("Command failed: {}", other),
    };
    CommandReply::message(line)
}

/// 命令分发器构建器
pub struct CommandDispatcherBuilder {
    handlers: Vec<Box<dyn CommandHandler>>,
}

impl CommandDispatcherBuilder {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn with_handler(mut self, handler: Box<dyn CommandHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn build(self, host: Arc<dyn ServerHost>) -> CommandDispatcher {
        let mut dispatcher = CommandDispatcher::new(host);
        for handler in self.handlers {
            dispatcher.register_handler(handler);
        }
        dispatcher
    }
}

impl Default for CommandDispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CommandContext;
    use crate::infra::MemoryHost;
    use async_trait::async_trait;

    struct EchoHandler;

    #[async_trait]
    impl CommandHandler for EchoHandler {
        async fn handle(&self, context: CommandContext) -> crate::Result<CommandReply> {
            match context.arg(0) {
                Some("missing") => Err(GuardError::PlayerNotFound("missing".to_string())),
                Some(arg) => Ok(CommandReply::message(arg)),
                None => Ok(CommandReply::message("echo")),
            }
        }

        fn name(&self) -> &'static str {
            "echo"
        }

        fn permission(&self) -> Option<&'static str> {
            Some("test.echo")
        }

        fn usage(&self) -> &'static str {
            "echo [text]"
        }
    }

    fn dispatcher(host: Arc<MemoryHost>) -> CommandDispatcher {
        CommandDispatcherBuilder::new()
            .with_handler(Box::new(EchoHandler))
            .build(host)
    }

    #[tokio::test]
    async fn test_unknown_subcommand_shows_usage() {
        let dispatcher = dispatcher(Arc::new(MemoryHost::new()));

        let reply = dispatcher.dispatch(CommandContext::console(["nope"])).await;
        assert!(reply.contains("/modguard echo [text]"));

        let reply = dispatcher.dispatch(CommandContext::console(Vec::<String>::new())).await;
        assert!(reply.contains("Usage"));
    }

    #[tokio::test]
    async fn test_permission_check() {
        let host = Arc::new(MemoryHost::new());
        let id = host.connect("Steve", None);
        let dispatcher = dispatcher(host.clone());

        let ctx = CommandContext::new(CommandSender::Client(id), vec!["echo".to_string(), "hi".to_string()]);
        let reply = dispatcher.dispatch(ctx.clone()).await;
        assert!(reply.contains("don't have permission"));

        host.grant(id, "test.echo");
        assert_eq!(dispatcher.dispatch(ctx).await.text(), "hi");

        // 控制台不做权限检查
        let reply = dispatcher.dispatch(CommandContext::console(["ECHO"])).await;
        assert_eq!(reply.text(), "echo");
    }

    #[tokio::test]
    async fn test_errors_rendered_inline() {
        let dispatcher = dispatcher(Arc::new(MemoryHost::new()));

        let reply = dispatcher.dispatch(CommandContext::console(["echo", "missing"])).await;
        assert_eq!(reply.text(), "Player not found.");
    }
}
