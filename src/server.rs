use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::GuardConfig;
use crate::context::{CommandContext, CommandReply};
use crate::dispatcher::{CommandDispatcher, CommandDispatcherBuilder};
use crate::error::Result;
use crate::handler::{CheckCommandHandler, ReloadCommandHandler, ScanCommandHandler, StatusCommandHandler};
use crate::infra::{metrics, ClientId, ServerHost};
use crate::security::EnforcementOutcome;
use crate::service::GuardService;

/// 检测服务统计信息
#[derive(Debug, Clone)]
pub struct ServerStats {
    pub enabled: bool,
    pub tracked_clients: usize,
    pub pending_passes: usize,
    pub uptime_seconds: u64,
}

/// 检测服务器
///
/// 插件生命周期与宿主事件的入口：
/// - `enable` / `disable`：注册 / 注销频道，清空状态
/// - `handle_*`：宿主转发的连接、断开、频道注册、频道消息事件
/// - `execute_command`：管理命令
pub struct GuardServer {
    service: Arc<GuardService>,
    dispatcher: CommandDispatcher,
    enabled: AtomicBool,
    started_at: chrono::DateTime<chrono::Utc>,
}

impl GuardServer {
    /// 创建检测服务器
    pub fn new(config: GuardConfig, host: Arc<dyn ServerHost>) -> Result<Self> {
        info!("🔧 初始化 ModGuard 组件...");

        let service = Arc::new(GuardService::new(config, host.clone())?);

        let dispatcher = CommandDispatcherBuilder::new()
            .with_handler(Box::new(ReloadCommandHandler::new(service.clone())))
            .with_handler(Box::new(StatusCommandHandler::new(service.clone())))
            .with_handler(Box::new(CheckCommandHandler::new(service.clone())))
            .with_handler(Box::new(ScanCommandHandler::new(service.clone())))
            .build(host);

        let rules = service.rules().snapshot();
        info!(
            "✅ 规则已加载: blocked={}, allowed={}, kick={}",
            rules.denylist().len(),
            rules.allowlist().len(),
            rules.enforcement_enabled()
        );

        Ok(Self {
            service,
            dispatcher,
            enabled: AtomicBool::new(false),
            started_at: chrono::Utc::now(),
        })
    }

    pub fn service(&self) -> &Arc<GuardService> {
        &self.service
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// 启用：注册频道
    pub fn enable(&self) {
        if self.enabled.swap(true, Ordering::SeqCst) {
            debug!("ModGuard 已经启用");
            return;
        }
        let report = self.service.register_channels();
        info!(
            "🚀 ModGuard 已启用 (incoming={}, outgoing={})",
            report.incoming_registered, report.outgoing_registered
        );
    }

    /// 停用：取消延迟任务，注销频道，清空状态
    pub fn disable(&self) {
        if !self.enabled.swap(false, Ordering::SeqCst) {
            return;
        }
        self.service.shutdown();
        info!("🛑 ModGuard 已停用");
    }

    /// 客户端加入
    pub fn handle_connect(&self, id: ClientId) -> Option<JoinHandle<()>> {
        if !self.is_enabled() {
            return None;
        }
        let handle = self.service.scheduler().on_connect(id);
        metrics::record_tracked_clients(self.service.registry().len());
        Some(handle)
    }

    /// 客户端离开
    pub fn handle_disconnect(&self, id: ClientId) {
        self.service.scheduler().on_disconnect(id);
        metrics::record_tracked_clients(self.service.registry().len());
    }

    /// 客户端注册了频道
    pub async fn handle_channel_register(&self, id: ClientId, channel: &str) -> Option<EnforcementOutcome> {
        if !self.is_enabled() {
            return None;
        }
        self.service.scheduler().on_channel_registered(id, channel).await
    }

    /// 客户端在频道上发送了数据
    pub async fn handle_channel_message(
        &self,
        id: ClientId,
        channel: &str,
        payload: &[u8],
    ) -> Option<EnforcementOutcome> {
        if !self.is_enabled() {
            return None;
        }
        self.service.scheduler().on_channel_message(id, channel, payload).await
    }

    /// 执行管理命令
    pub async fn execute_command(&self, context: CommandContext) -> CommandReply {
        if !self.is_enabled() {
            warn!("⚠️ ModGuard 未启用，忽略命令: {}", context.args.join(" "));
            return CommandReply::message("ModGuard is not enabled.");
        }
        self.dispatcher.dispatch(context).await
    }

    /// 重载配置（等同于 `reload` 命令，但错误直接返回）
    pub fn reload(&self) -> Result<()> {
        self.service.reload().map(|_| ())
    }

    /// 获取统计信息
    pub fn get_stats(&self) -> ServerStats {
        ServerStats {
            enabled: self.is_enabled(),
            tracked_clients: self.service.registry().len(),
            pending_passes: self.service.scheduler().pending_count(),
            uptime_seconds: (chrono::Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }
}

impl Drop for GuardServer {
    fn drop(&mut self) {
        self.service.scheduler().cancel_all();
    }
}
