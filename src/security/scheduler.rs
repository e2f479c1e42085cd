//! 检测调度
//!
//! 每个连接按两轮检测推进：连接后延迟 `first-pass-delay-ms` 执行第一轮，
//! 再延迟 `second-pass-delay-ms` 执行第二轮，结束后进入 Checked。
//! 客户端注册频道或发送频道消息时立即检测，不等待轮次。
//!
//! 每一轮/每个事件在动手之前都要确认：
//! - 客户端仍然在线
//! - 注册表中的代次没有变化（旧连接的延迟任务直接失效）
//! - 尚未被标记
//! - 没有 bypass 权限

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::config::DetectionConfig;
use crate::error::{GuardError, Result};
use crate::infra::{metrics, ClientId, ServerHost};
use crate::session::{ClientRegistry, PassAdmission};

use super::channels::{ChannelRegistrar, BRAND_CHANNEL, BRAND_PROBE_PAYLOAD, HANDSHAKE_PROBE_PAYLOAD};
use super::enforcement::{Detection, EnforcementGate, EnforcementOutcome};
use super::matcher::{self, brand_hint, channel_count_hint, classify, Signal};
use super::rules::{RuleSet, RuleStore};

/// 拥有该权限的客户端不参与检测
pub const BYPASS_PERMISSION: &str = "modguard.bypass";

/// 检测轮次
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    First,
    Second,
}

/// 跳过原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// 客户端已离线
    Offline,
    /// 拥有 bypass 权限
    Bypass,
    /// 宿主暂时无法提供客户端信息
    HostUnavailable,
    /// 注册表拒绝准入
    Admission(PassAdmission),
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Offline => "offline",
            SkipReason::Bypass => "bypass",
            SkipReason::HostUnavailable => "host_unavailable",
            SkipReason::Admission(admission) => admission.as_str(),
        }
    }
}

/// 一轮检测（或一次手动重扫）的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// 未命中
    Clean,
    /// 命中；`enforcement` 为 None 表示其他路径已经先一步标记
    Flagged {
        identifier: String,
        enforcement: Option<EnforcementOutcome>,
    },
    /// 未执行
    Skipped(SkipReason),
}

impl PassOutcome {
    /// 第一轮之后是否继续第二轮；宿主暂时不可用时第二轮重试
    fn continues_to_second_pass(&self) -> bool {
        matches!(
            self,
            PassOutcome::Clean | PassOutcome::Skipped(SkipReason::HostUnavailable)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PassOutcome::Clean => "clean",
            PassOutcome::Flagged { .. } => "flagged",
            PassOutcome::Skipped(_) => "skipped",
        }
    }
}

/// 检测调度器
pub struct DetectionScheduler {
    host: Arc<dyn ServerHost>,
    registry: Arc<ClientRegistry>,
    rules: Arc<RuleStore>,
    registrar: Arc<ChannelRegistrar>,
    gate: EnforcementGate,
    config: RwLock<DetectionConfig>,
    /// 尚未结束的延迟任务：id -> (代次, 句柄)
    pending: DashMap<ClientId, (u64, AbortHandle)>,
}

impl DetectionScheduler {
    pub fn new(
        host: Arc<dyn ServerHost>,
        registry: Arc<ClientRegistry>,
        rules: Arc<RuleStore>,
        registrar: Arc<ChannelRegistrar>,
        config: DetectionConfig,
    ) -> Self {
        let gate = EnforcementGate::new(host.clone(), registry.clone());
        Self {
            host,
            registry,
            rules,
            registrar,
            gate,
            config: RwLock::new(config),
            pending: DashMap::new(),
        }
    }

    /// 替换调度参数（reload 时使用，只影响之后的连接）
    pub fn update_config(&self, config: DetectionConfig) {
        *self.config.write() = config;
    }

    pub fn config(&self) -> DetectionConfig {
        self.config.read().clone()
    }

    /// 客户端连接：写入全新状态并安排两轮检测
    pub fn on_connect(self: &Arc<Self>, id: ClientId) -> JoinHandle<()> {
        let generation = self.registry.on_connect(id);
        let config = self.config();
        let this = Arc::clone(self);

        debug!(
            "⏱️ 安排客户端 {} 的检测 (generation={}, first={}ms, second={}ms)",
            id, generation, config.first_pass_delay_ms, config.second_pass_delay_ms
        );

        let handle = tokio::spawn(async move {
            tokio::time::sleep(config.first_pass_delay()).await;
            let first = this.run_pass(id, generation, PassKind::First, false).await;
            if first.continues_to_second_pass() {
                tokio::time::sleep(config.second_pass_delay()).await;
                this.run_pass(id, generation, PassKind::Second, false).await;
            }
            this.pending
                .remove_if(&id, |_, (pending_generation, _)| *pending_generation == generation);
        });

        if let Some((_, (_, previous))) = self.pending.remove(&id) {
            previous.abort();
        }
        self.pending.insert(id, (generation, handle.abort_handle()));
        handle
    }

    /// 客户端断开：移除状态，取消尚未执行的轮次
    pub fn on_disconnect(&self, id: ClientId) {
        if let Some((_, (_, handle))) = self.pending.remove(&id) {
            handle.abort();
        }
        if let Some(state) = self.registry.on_disconnect(id) {
            debug!(
                "👋 客户端 {} 断开 (phase={}, flagged={})",
                id,
                state.phase.as_str(),
                state.flagged_modded
            );
        }
    }

    /// 取消全部延迟任务（disable 时使用）
    pub fn cancel_all(&self) {
        for entry in self.pending.iter() {
            entry.value().1.abort();
        }
        self.pending.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// 为仍有待执行轮次的在线客户端恢复状态（reload 清空注册表之后）
    pub fn restore_pending(&self) -> usize {
        let mut restored = 0;
        for entry in self.pending.iter() {
            let (id, (generation, _)) = (*entry.key(), entry.value());
            if self.host.is_online(id) && self.registry.restore(id, *generation) {
                restored += 1;
            }
        }
        if restored > 0 {
            info!("♻️ 已为 {} 个在线客户端恢复检测状态", restored);
        }
        restored
    }

    /// 客户端注册了新频道
    pub async fn on_channel_registered(&self, id: ClientId, channel: &str) -> Option<EnforcementOutcome> {
        if !self.accepts_event(id) {
            return None;
        }
        let rules = self.rules.snapshot();
        let signal = Signal::ChannelName(channel);
        let detection = self.inspect(id, &signal, &rules)?;
        self.flag_and_enforce(id, detection, signal.source(), &rules).await
    }

    /// 客户端在某频道上发送了数据：频道名与内容都要检查
    pub async fn on_channel_message(
        &self,
        id: ClientId,
        channel: &str,
        payload: &[u8],
    ) -> Option<EnforcementOutcome> {
        if !self.accepts_event(id) {
            return None;
        }
        let rules = self.rules.snapshot();

        let name = Signal::ChannelName(channel);
        if let Some(detection) = self.inspect(id, &name, &rules) {
            return self.flag_and_enforce(id, detection, name.source(), &rules).await;
        }

        let decoded = matcher::decode_payload(payload);
        if decoded.is_lossy() {
            let err = GuardError::SignalDecode {
                channel: channel.to_string(),
                invalid_bytes: decoded.invalid_bytes,
            };
            debug!("客户端 {} 的频道消息无法完整解码: {}", id, err);
            metrics::record_decode_error();
        }

        let preview_len = self.config.read().message_preview_len;
        debug!(
            "📨 客户端 {} 在 {} 上发送: {}",
            id,
            channel,
            matcher::preview(&decoded.text, preview_len)
        );

        let signal = Signal::MessageContent { channel, payload };
        let detection = self.inspect(id, &signal, &rules)?;
        self.flag_and_enforce(id, detection, signal.source(), &rules).await
    }

    /// 手动重扫：不等待延迟，连续执行两轮
    ///
    /// `reset` 为 true 时先换成全新状态；否则保留已有的 Checked，拒绝已标记的客户端。
    pub async fn rescan(&self, id: ClientId, reset: bool) -> Result<PassOutcome> {
        if !self.host.is_online(id) {
            return Err(GuardError::PlayerNotFound(id.to_string()));
        }

        let generation = if reset {
            match self.registry.reset(id) {
                Some(generation) => generation,
                None => self.registry.on_connect(id),
            }
        } else {
            self.registry.ensure(id)
        };

        info!("🔍 手动重扫客户端 {} (reset={})", self.host.display_name(id), reset);

        let outcome = self.run_pass(id, generation, PassKind::First, true).await;
        if outcome != PassOutcome::Clean {
            return Ok(outcome);
        }
        Ok(self.run_pass(id, generation, PassKind::Second, true).await)
    }

    /// 执行一轮检测
    pub async fn run_pass(&self, id: ClientId, generation: u64, kind: PassKind, manual: bool) -> PassOutcome {
        let label = match (kind, manual) {
            (_, true) => "manual",
            (PassKind::First, false) => "first",
            (PassKind::Second, false) => "second",
        };
        let outcome = self.execute_pass(id, generation, kind, manual).await;
        metrics::record_pass(label, outcome.as_str());
        if let PassOutcome::Skipped(reason) = &outcome {
            debug!("⏭️ 跳过客户端 {} 的 {} 轮检测: {}", id, label, reason.as_str());
        }
        outcome
    }

    async fn execute_pass(&self, id: ClientId, generation: u64, kind: PassKind, manual: bool) -> PassOutcome {
        if !self.host.is_online(id) {
            return PassOutcome::Skipped(SkipReason::Offline);
        }
        if self.host.has_permission(id, BYPASS_PERMISSION) {
            return PassOutcome::Skipped(SkipReason::Bypass);
        }
        let mut admission = self.registry.begin_pass(id, generation, manual);
        if admission == PassAdmission::Missing && self.registry.restore(id, generation) {
            // 状态被 reload 清空，但连接仍在
            debug!("♻️ 恢复客户端 {} 的检测状态 (generation={})", id, generation);
            admission = self.registry.begin_pass(id, generation, manual);
        }
        if !admission.is_admitted() {
            return PassOutcome::Skipped(SkipReason::Admission(admission));
        }

        // 整轮使用同一份规则快照
        let rules = self.rules.snapshot();
        let config = self.config();

        let brand = self.host.client_brand(id);
        if let Some(brand) = brand.as_deref() {
            let signal = Signal::ClientBrand(brand);
            if let Some(detection) = self.inspect(id, &signal, &rules) {
                return self.flagged(id, detection, signal.source(), &rules).await;
            }
        }

        let channels = match self.host.listening_channels(id) {
            Ok(channels) => channels,
            Err(e) => {
                if e.is_client_scoped() {
                    debug!("无法获取客户端 {} 的频道: {}", id, e);
                } else {
                    warn!("⚠️ 获取客户端 {} 的频道失败: {}", id, e);
                }
                let reason = if self.host.is_online(id) {
                    SkipReason::HostUnavailable
                } else {
                    SkipReason::Offline
                };
                return PassOutcome::Skipped(reason);
            }
        };
        for channel in &channels {
            let signal = Signal::ChannelName(channel);
            if let Some(detection) = self.inspect(id, &signal, &rules) {
                return self.flagged(id, detection, signal.source(), &rules).await;
            }
        }

        if config.channel_count_heuristic {
            let hints = channel_count_hint(channels.len(), config.suspicious_channel_threshold)
                .into_iter()
                .chain(brand.as_deref().and_then(brand_hint));
            for hint in hints {
                if self.registry.mark_modded(id) {
                    info!("🧩 客户端 {} 疑似使用模组（启发式）: {:?}", self.host.display_name(id), hint);
                }
            }
        }

        self.send_probes(id).await;

        if kind == PassKind::Second {
            if self.registry.mark_checked(id, generation) {
                debug!("✅ 客户端 {} 检测完成", self.host.display_name(id));
            }
        }
        PassOutcome::Clean
    }

    async fn flagged(&self, id: ClientId, detection: Detection, source: &'static str, rules: &RuleSet) -> PassOutcome {
        let identifier = detection.identifier.clone();
        let enforcement = self.flag_and_enforce(id, detection, source, rules).await;
        PassOutcome::Flagged {
            identifier,
            enforcement,
        }
    }

    /// 对单个信号做判定；允许的加载器只做记录
    fn inspect(&self, id: ClientId, signal: &Signal<'_>, rules: &RuleSet) -> Option<Detection> {
        let verdict = classify(signal, rules);
        if verdict.is_allowed_loader {
            if self.registry.mark_modded(id) {
                debug!(
                    "🧩 客户端 {} 使用允许的加载器: {}",
                    id,
                    verdict.allowed_loader.as_deref().unwrap_or_default()
                );
            }
            return None;
        }
        let identifier = verdict.matched_identifier?;
        Some(Detection::new(identifier, describe(signal)))
    }

    /// 标记并交给执行闸门；只有第一次进入 Flagged 时才会执行
    async fn flag_and_enforce(
        &self,
        id: ClientId,
        detection: Detection,
        source: &'static str,
        rules: &RuleSet,
    ) -> Option<EnforcementOutcome> {
        metrics::record_detection(source, &detection.identifier);
        if !self.registry.mark_flagged(id, &detection.identifier) {
            return None;
        }
        warn!(
            client = %id,
            "🚩 检测到禁止模组: {} -> {} ({})",
            self.host.display_name(id),
            detection.identifier,
            detection.reason
        );
        Some(self.gate.enforce(id, &detection, rules).await)
    }

    /// 异步事件的准入检查
    fn accepts_event(&self, id: ClientId) -> bool {
        if !self.host.is_online(id) || self.host.has_permission(id, BYPASS_PERMISSION) {
            return false;
        }
        self.registry.ensure(id);
        let monitor_after_checked = self.config.read().monitor_after_checked;
        self.registry.accepts_signal(id, monitor_after_checked)
    }

    /// 发送探测消息；失败只记录
    async fn send_probes(&self, id: ClientId) {
        if self.registrar.can_probe(BRAND_CHANNEL) {
            self.send_probe(id, BRAND_CHANNEL, BRAND_PROBE_PAYLOAD).await;
        }
        for channel in self.registrar.probe_channels() {
            self.send_probe(id, channel, HANDSHAKE_PROBE_PAYLOAD).await;
        }
    }

    async fn send_probe(&self, id: ClientId, channel: &str, payload: &[u8]) {
        match self.host.send_channel_message(id, channel, payload).await {
            Ok(()) => metrics::record_probe(true),
            Err(e) => {
                debug!("探测消息发送失败 client={}, channel={}: {}", id, channel, e);
                metrics::record_probe(false);
            }
        }
    }
}

/// 日志与踢出消息中的原因描述
fn describe(signal: &Signal<'_>) -> String {
    match signal {
        Signal::ChannelName(channel) => format!("channel: {}", channel),
        Signal::ClientBrand(brand) => format!("brand: {}", brand),
        Signal::MessageContent { channel, .. } => format!("message on {}", channel),
    }
}
