use crate::infra::ClientId;

/// 命令发送者
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSender {
    /// 服务器控制台（拥有全部权限）
    Console,
    /// 在线客户端
    Client(ClientId),
}

/// 命令上下文
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// 发送者
    pub sender: CommandSender,
    /// 参数（第一个是子命令名）
    pub args: Vec<String>,
    /// 请求时间戳
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl CommandContext {
    /// 创建新的命令上下文
    pub fn new(sender: CommandSender, args: Vec<String>) -> Self {
        Self {
            sender,
            args,
            timestamp: chrono::Utc::now(),
        }
    }

    /// 控制台发出的命令
    pub fn console<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(CommandSender::Console, args.into_iter().map(Into::into).collect())
    }

    /// 按空白切分一行命令
    pub fn parse(sender: CommandSender, line: &str) -> Self {
        Self::new(sender, line.split_whitespace().map(str::to_string).collect())
    }

    /// 子命令名（小写）
    pub fn subcommand(&self) -> Option<String> {
        self.args.first().map(|s| s.to_lowercase())
    }

    /// 子命令之后的第 `index` 个参数
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index + 1).map(String::as_str)
    }

    /// 是否带有某个开关参数（例如 `--reset`）
    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().skip(1).any(|a| a == flag)
    }

    pub fn is_console(&self) -> bool {
        self.sender == CommandSender::Console
    }
}

/// 命令回复
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandReply {
    lines: Vec<String>,
}

impl CommandReply {
    pub fn new() -> Self {
        Self::default()
    }

    /// 单行回复
    pub fn message(line: impl Into<String>) -> Self {
        Self::new().line(line)
    }

    /// 追加一行
    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// 是否有某一行包含 `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|line| line.contains(needle))
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_line() {
        let ctx = CommandContext::parse(CommandSender::Console, "  Check   Steve --reset ");
        assert_eq!(ctx.subcommand().as_deref(), Some("check"));
        assert_eq!(ctx.arg(0), Some("Steve"));
        assert!(ctx.has_flag("--reset"));
        assert!(ctx.arg(2).is_none());
        assert!(ctx.is_console());
    }

    #[test]
    fn test_reply_builder() {
        let reply = CommandReply::message("a").line("b");
        assert_eq!(reply.text(), "a\nb");
        assert!(reply.contains("b"));
    }
}
