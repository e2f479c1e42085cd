use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::GuardConfig;
use crate::error::{GuardError, Result};
use crate::infra::{metrics, ClientId, ServerHost};
use crate::security::{ChannelRegistrar, DetectionScheduler, PassOutcome, RegistrationReport, RuleSet, RuleStore};
use crate::session::{ClientRegistry, RegistryStats};

/// 重载结果
#[derive(Debug, Clone)]
pub struct ReloadSummary {
    pub blocked_mods: usize,
    pub allowed_loaders: usize,
    pub enforcement_enabled: bool,
    pub registration: RegistrationReport,
}

/// 全局状态
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub allowed_loaders: Vec<String>,
    pub blocked_mods: usize,
    pub enforcement_enabled: bool,
    pub stats: RegistryStats,
    pub detected_identifiers: Vec<String>,
}

/// 单个客户端的检测报告
#[derive(Debug, Clone, Serialize)]
pub struct ClientReport {
    pub id: ClientId,
    pub name: String,
    /// 注册表中没有条目时为 None
    pub phase: Option<&'static str>,
    pub checked: bool,
    pub uses_mod_loader: bool,
    pub flagged: bool,
    pub enforcing: bool,
    pub detected_identifiers: Vec<String>,
    pub brand: Option<String>,
    pub channels: Vec<String>,
}

/// 批量扫描结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub scanned: usize,
    pub clean: usize,
    pub flagged: usize,
    pub skipped: usize,
}

/// 检测服务
///
/// 进程级的共享状态：规则集、客户端注册表、频道注册器与调度器。
/// 管理命令与服务器事件入口都通过它访问检测引擎。
pub struct GuardService {
    config: RwLock<GuardConfig>,
    host: Arc<dyn ServerHost>,
    registry: Arc<ClientRegistry>,
    rules: Arc<RuleStore>,
    registrar: Arc<ChannelRegistrar>,
    scheduler: Arc<DetectionScheduler>,
}

impl GuardService {
    /// 创建检测服务；规则无效时返回 `Config` 错误
    pub fn new(config: GuardConfig, host: Arc<dyn ServerHost>) -> Result<Self> {
        let rules = Arc::new(RuleStore::new(RuleSet::from_config(&config.rules)?));
        let registry = Arc::new(ClientRegistry::new());
        let registrar = Arc::new(ChannelRegistrar::new());
        let scheduler = Arc::new(DetectionScheduler::new(
            host.clone(),
            registry.clone(),
            rules.clone(),
            registrar.clone(),
            config.detection.clone(),
        ));

        Ok(Self {
            config: RwLock::new(config),
            host,
            registry,
            rules,
            registrar,
            scheduler,
        })
    }

    pub fn host(&self) -> &Arc<dyn ServerHost> {
        &self.host
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn rules(&self) -> &Arc<RuleStore> {
        &self.rules
    }

    pub fn registrar(&self) -> &Arc<ChannelRegistrar> {
        &self.registrar
    }

    pub fn scheduler(&self) -> &Arc<DetectionScheduler> {
        &self.scheduler
    }

    /// 当前配置快照
    pub fn config(&self) -> GuardConfig {
        self.config.read().clone()
    }

    /// 重新读取配置并替换规则集
    ///
    /// 任何一步失败都保留旧规则集，不清空已有状态。
    pub fn reload(&self) -> Result<ReloadSummary> {
        let source = self.config.read().source_path.clone();
        let mut fresh = GuardConfig::reload_from_source(source.as_deref())?;
        fresh.merge_from_env()?;
        let rules = RuleSet::from_config(&fresh.rules)?;

        let summary_rules = (rules.denylist().len(), rules.allowlist().len(), rules.enforcement_enabled());
        self.rules.swap(rules);
        self.scheduler.update_config(fresh.detection.clone());
        self.registry.clear_all();
        // 尚未完成检测的在线客户端按原轮次继续
        self.scheduler.restore_pending();
        metrics::record_tracked_clients(self.registry.len());
        let registration = self.registrar.rebuild(self.host.as_ref());

        {
            // 日志与监控参数只在启动时生效
            let mut config = self.config.write();
            config.rules = fresh.rules;
            config.detection = fresh.detection;
        }

        info!(
            "🔄 配置已重载: blocked={}, allowed={}, kick={}",
            summary_rules.0, summary_rules.1, summary_rules.2
        );

        Ok(ReloadSummary {
            blocked_mods: summary_rules.0,
            allowed_loaders: summary_rules.1,
            enforcement_enabled: summary_rules.2,
            registration,
        })
    }

    /// 全局状态
    pub fn status(&self) -> StatusReport {
        let rules = self.rules.snapshot();
        StatusReport {
            allowed_loaders: rules.allowlist().to_vec(),
            blocked_mods: rules.denylist().len(),
            enforcement_enabled: rules.enforcement_enabled(),
            stats: self.registry.stats(),
            detected_identifiers: self.registry.detected_identifiers(),
        }
    }

    /// 按名字查询在线客户端
    pub fn check(&self, name: &str) -> Result<ClientReport> {
        let id = self
            .host
            .find_client(name)
            .ok_or_else(|| GuardError::PlayerNotFound(name.to_string()))?;
        let state = self.registry.get(id);
        let channels = self.host.listening_channels(id).unwrap_or_default();

        Ok(ClientReport {
            id,
            name: self.host.display_name(id),
            phase: state.as_ref().map(|s| s.phase.as_str()),
            checked: state.as_ref().map(|s| s.checked).unwrap_or(false),
            uses_mod_loader: state.as_ref().map(|s| s.uses_mod_loader).unwrap_or(false),
            flagged: state.as_ref().map(|s| s.flagged_modded).unwrap_or(false),
            enforcing: state.as_ref().map(|s| s.enforcing).unwrap_or(false),
            detected_identifiers: state
                .map(|s| s.detected_identifiers.into_iter().collect())
                .unwrap_or_default(),
            brand: self.host.client_brand(id),
            channels,
        })
    }

    /// 手动重扫单个客户端
    pub async fn rescan(&self, name: &str, reset: bool) -> Result<PassOutcome> {
        let id = self
            .host
            .find_client(name)
            .ok_or_else(|| GuardError::PlayerNotFound(name.to_string()))?;
        self.scheduler.rescan(id, reset).await
    }

    /// 重扫全部尚未检测完成的在线客户端
    pub async fn scan_all(&self) -> ScanSummary {
        let mut summary = ScanSummary::default();

        for id in self.host.online_clients() {
            let checked = self.registry.get(id).map(|s| s.checked).unwrap_or(false);
            if checked {
                continue;
            }
            summary.scanned += 1;
            match self.scheduler.rescan(id, false).await {
                Ok(PassOutcome::Clean) => summary.clean += 1,
                Ok(PassOutcome::Flagged { .. }) => summary.flagged += 1,
                Ok(PassOutcome::Skipped(_)) => summary.skipped += 1,
                Err(e) => {
                    // 扫描期间离线
                    warn!("⚠️ 扫描客户端 {} 失败: {}", id, e);
                    summary.skipped += 1;
                }
            }
        }

        info!(
            "🔍 扫描完成: scanned={}, clean={}, flagged={}, skipped={}",
            summary.scanned, summary.clean, summary.flagged, summary.skipped
        );
        summary
    }

    /// 注册全部频道（enable 时使用）
    pub fn register_channels(&self) -> RegistrationReport {
        let report = self.registrar.register_all(self.host.as_ref());
        if !report.is_complete() {
            error!("❌ 部分频道注册失败，对应频道的检测/探测将不可用: {}", report.failures.len());
        }
        report
    }

    /// 注销全部频道并清空状态（disable 时使用）
    pub fn shutdown(&self) {
        self.scheduler.cancel_all();
        self.registrar.unregister_all(self.host.as_ref());
        self.registry.clear_all();
        metrics::record_tracked_clients(0);
    }
}
