pub mod cli;
pub mod config;
pub mod console;  // 交互式控制台（MemoryHost）
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod infra;
pub mod logging;
pub mod security;  // 检测模块
pub mod server;
pub mod service;
pub mod session;

pub use config::GuardConfig;
pub use context::{CommandContext, CommandReply, CommandSender};
pub use dispatcher::{CommandDispatcher, CommandDispatcherBuilder};
pub use error::{GuardError, Result};
pub use handler::{
    CommandHandler,
    CheckCommandHandler, ReloadCommandHandler,
    ScanCommandHandler, StatusCommandHandler
};
pub use infra::{ClientId, MemoryHost, ServerHost};
pub use server::GuardServer;
pub use service::GuardService;
pub use session::ClientRegistry;
