//! 交互式控制台
//!
//! 在 `MemoryHost` 之上模拟玩家加入、注册频道、发送消息，
//! 并可以直接执行 `/modguard` 管理命令，便于端到端地观察检测过程。

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::context::{CommandContext, CommandSender};
use crate::dispatcher::ROOT_COMMAND;
use crate::error::{GuardError, Result};
use crate::infra::{ClientId, MemoryHost, ServerHost};
use crate::server::GuardServer;

const HELP: &[&str] = &[
    "join <player> [brand]          simulate a player joining",
    "leave <player>                 simulate a player leaving",
    "brand <player> <brand>         change the announced brand",
    "register <player> <channel>    player registers a channel",
    "send <player> <channel> <text> player sends data on a channel",
    "grant <player> <permission>    grant a permission",
    "list                           list online players",
    "/modguard <subcommand> [args]  run an admin command as console",
    "as <player> /modguard ...      run an admin command as a player",
    "quit                           exit",
];

/// 一行输入的执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleOutput {
    Lines(Vec<String>),
    Quit,
}

impl ConsoleOutput {
    fn line(line: impl Into<String>) -> Self {
        ConsoleOutput::Lines(vec![line.into()])
    }
}

pub struct Console {
    host: Arc<MemoryHost>,
    server: Arc<GuardServer>,
    /// 把宿主的离线通知转发给 `GuardServer::handle_disconnect`
    disconnect_watcher: JoinHandle<()>,
}

impl Console {
    /// 须在 tokio 运行时内调用
    pub fn new(host: Arc<MemoryHost>, server: Arc<GuardServer>) -> Self {
        let mut disconnects = host.subscribe_disconnects();
        let watcher_host = host.clone();
        let watcher_server = server.clone();
        let disconnect_watcher = tokio::spawn(async move {
            while let Some(id) = disconnects.recv().await {
                // 通知到达前已重新加入的客户端保留新状态
                if !watcher_host.is_online(id) {
                    watcher_server.handle_disconnect(id);
                }
            }
        });
        Self {
            host,
            server,
            disconnect_watcher,
        }
    }

    /// 从 stdin 读取命令直到 `quit` 或 EOF
    pub async fn run(&self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        write_lines(&mut stdout, &["ModGuard console. Type 'help' for commands.".to_string()]).await?;
        loop {
            stdout.write_all(b"> ").await.map_err(io_error)?;
            stdout.flush().await.map_err(io_error)?;

            let Some(line) = lines.next_line().await.map_err(io_error)? else {
                break;
            };
            match self.execute(&line).await {
                ConsoleOutput::Quit => break,
                ConsoleOutput::Lines(output) => write_lines(&mut stdout, &output).await?,
            }
        }
        Ok(())
    }

    /// 执行一行输入
    pub async fn execute(&self, line: &str) -> ConsoleOutput {
        let line = line.trim();
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            return ConsoleOutput::Lines(Vec::new());
        };
        debug!("console: {}", line);

        match command.to_lowercase().as_str() {
            "quit" | "exit" | "stop" => ConsoleOutput::Quit,
            "help" => ConsoleOutput::Lines(HELP.iter().map(|s| s.to_string()).collect()),
            "list" => self.list(),
            "join" => match parts.next() {
                Some(name) => self.join(name, parts.next()),
                None => ConsoleOutput::line("Usage: join <player> [brand]"),
            },
            "leave" => match self.resolve(parts.next()) {
                Ok(id) => {
                    self.host.disconnect(id);
                    self.server.handle_disconnect(id);
                    ConsoleOutput::line("Player left.")
                }
                Err(e) => ConsoleOutput::line(e),
            },
            "brand" => match (self.resolve(parts.next()), parts.next()) {
                (Ok(id), Some(brand)) => {
                    self.host.set_brand(id, brand);
                    ConsoleOutput::line(format!("Brand set to {}.", brand))
                }
                (Err(e), _) => ConsoleOutput::line(e),
                (_, None) => ConsoleOutput::line("Usage: brand <player> <brand>"),
            },
            "grant" => match (self.resolve(parts.next()), parts.next()) {
                (Ok(id), Some(permission)) => {
                    self.host.grant(id, permission);
                    ConsoleOutput::line(format!("Granted {}.", permission))
                }
                (Err(e), _) => ConsoleOutput::line(e),
                (_, None) => ConsoleOutput::line("Usage: grant <player> <permission>"),
            },
            "register" => match (self.resolve(parts.next()), parts.next()) {
                (Ok(id), Some(channel)) => {
                    self.host.add_channel(id, channel);
                    let outcome = self.server.handle_channel_register(id, channel).await;
                    ConsoleOutput::line(describe_outcome(outcome))
                }
                (Err(e), _) => ConsoleOutput::line(e),
                (_, None) => ConsoleOutput::line("Usage: register <player> <channel>"),
            },
            "send" => match (self.resolve(parts.next()), parts.next()) {
                (Ok(id), Some(channel)) => {
                    let text = parts.collect::<Vec<_>>().join(" ");
                    let outcome = self
                        .server
                        .handle_channel_message(id, channel, text.as_bytes())
                        .await;
                    ConsoleOutput::line(describe_outcome(outcome))
                }
                (Err(e), _) => ConsoleOutput::line(e),
                (_, None) => ConsoleOutput::line("Usage: send <player> <channel> <text>"),
            },
            "as" => match self.resolve(parts.next()) {
                Ok(id) => {
                    let rest = parts.collect::<Vec<_>>().join(" ");
                    self.admin_command(CommandSender::Client(id), &rest).await
                }
                Err(e) => ConsoleOutput::line(e),
            },
            _ => self.admin_command(CommandSender::Console, line).await,
        }
    }

    async fn admin_command(&self, sender: CommandSender, line: &str) -> ConsoleOutput {
        let line = line.trim().trim_start_matches('/');
        let Some(rest) = line.strip_prefix(ROOT_COMMAND) else {
            return ConsoleOutput::line("Unknown command. Type 'help' for commands.");
        };
        let reply = self
            .server
            .execute_command(CommandContext::parse(sender, rest))
            .await;
        ConsoleOutput::Lines(reply.lines().to_vec())
    }

    fn join(&self, name: &str, brand: Option<&str>) -> ConsoleOutput {
        let id = self.host.connect(name, brand);
        self.server.handle_connect(id);
        ConsoleOutput::line(format!("{} joined ({}).", name, id))
    }

    fn list(&self) -> ConsoleOutput {
        let names: Vec<String> = self
            .host
            .online_clients()
            .into_iter()
            .map(|id| self.host.display_name(id))
            .collect();
        ConsoleOutput::line(format!("Online ({}): {}", names.len(), names.join(", ")))
    }

    fn resolve(&self, name: Option<&str>) -> std::result::Result<ClientId, String> {
        let name = name.ok_or_else(|| "Missing player name.".to_string())?;
        self.host
            .find_client(name)
            .ok_or_else(|| "Player not found.".to_string())
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        self.disconnect_watcher.abort();
    }
}

fn describe_outcome(outcome: Option<crate::security::EnforcementOutcome>) -> String {
    match outcome {
        Some(outcome) => format!("Detection: {}", outcome.as_str()),
        None => "No detection.".to_string(),
    }
}

async fn write_lines(stdout: &mut tokio::io::Stdout, lines: &[String]) -> Result<()> {
    for line in lines {
        stdout.write_all(line.as_bytes()).await.map_err(io_error)?;
        stdout.write_all(b"\n").await.map_err(io_error)?;
    }
    stdout.flush().await.map_err(io_error)
}

fn io_error(e: std::io::Error) -> GuardError {
    GuardError::Internal(format!("console I/O error: {}", e))
}
