use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::infra::{metrics, ClientId, ServerHost};
use crate::session::ClientRegistry;

use super::rules::RuleSet;

/// 颜色代码前缀（配置中使用的形式）
const ALT_COLOR_CHAR: char = '&';
/// 颜色代码前缀（客户端识别的形式）
const SECTION_SIGN: char = '§';
const COLOR_CODES: &str = "0123456789AaBbCcDdEeFfKkLlMmNnOoRr";

/// 一次命中（交给执行闸门）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// 命中的黑名单条目
    pub identifier: String,
    /// 人类可读的原因，例如 "channel: wurst:main"
    pub reason: String,
}

impl Detection {
    pub fn new(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }
}

/// 执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnforcementOutcome {
    /// 执行被关闭，只记录
    Recorded,
    /// 已经在执行中，本次不重复请求
    AlreadyEnforcing,
    /// 宿主拒绝或失败，已记录
    Aborted(String),
    /// 已请求断开
    Disconnected,
    /// 客户端已离线
    ClientGone,
}

impl EnforcementOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnforcementOutcome::Recorded => "recorded",
            EnforcementOutcome::AlreadyEnforcing => "already_enforcing",
            EnforcementOutcome::Aborted(_) => "aborted",
            EnforcementOutcome::Disconnected => "disconnected",
            EnforcementOutcome::ClientGone => "client_gone",
        }
    }
}

/// 执行闸门
///
/// 命中后决定是否断开客户端，并保证同一客户端只请求一次断开。
pub struct EnforcementGate {
    host: Arc<dyn ServerHost>,
    registry: Arc<ClientRegistry>,
}

impl EnforcementGate {
    pub fn new(host: Arc<dyn ServerHost>, registry: Arc<ClientRegistry>) -> Self {
        Self { host, registry }
    }

    /// 处理一次命中
    pub async fn enforce(&self, id: ClientId, detection: &Detection, rules: &RuleSet) -> EnforcementOutcome {
        let outcome = self.decide(id, detection, rules).await;
        metrics::record_enforcement(outcome.as_str());
        outcome
    }

    async fn decide(&self, id: ClientId, detection: &Detection, rules: &RuleSet) -> EnforcementOutcome {
        let name = self.host.display_name(id);

        if !self.host.is_online(id) {
            debug!("客户端 {} 已离线，跳过执行 (mod={})", name, detection.identifier);
            return EnforcementOutcome::ClientGone;
        }

        if !rules.enforcement_enabled() {
            info!(
                client = %id,
                "📝 检测到禁止模组但未开启踢出: {} 使用 {} ({})",
                name, detection.identifier, detection.reason
            );
            return EnforcementOutcome::Recorded;
        }

        if !self.registry.begin_enforcement(id) {
            debug!("客户端 {} 已在执行中，忽略重复命中 (mod={})", name, detection.identifier);
            return EnforcementOutcome::AlreadyEnforcing;
        }

        let message = format_kick_message(rules.message_template(), detection);
        match self.host.disconnect_client(id, &message).await {
            Ok(()) => {
                warn!(
                    client = %id,
                    "🚫 已踢出 {}: 使用禁止模组 {} ({})",
                    name, detection.identifier, detection.reason
                );
                EnforcementOutcome::Disconnected
            }
            Err(e) => {
                error!(client = %id, "❌ 踢出 {} 失败: {}", name, e);
                EnforcementOutcome::Aborted(e.to_string())
            }
        }
    }
}

/// 生成踢出消息：替换 `{mod}`，追加原因行，并转换颜色代码
pub fn format_kick_message(template: &str, detection: &Detection) -> String {
    let message = format!(
        "{}\n&7(Reason: {})",
        template.replace("{mod}", &detection.identifier),
        detection.reason
    );
    translate_color_codes(&message)
}

/// `&c` → `§c`；只转换合法的颜色/格式代码
pub fn translate_color_codes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match chars.peek() {
            Some(next) if c == ALT_COLOR_CHAR && COLOR_CODES.contains(*next) => {
                out.push(SECTION_SIGN);
                out.push(next.to_ascii_lowercase());
                chars.next();
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::MemoryHost;

    fn rules(enforce: bool) -> RuleSet {
        RuleSet::new(vec!["wurst"], Vec::<&str>::new(), enforce, "&cNo {mod}!")
    }

    fn setup() -> (Arc<MemoryHost>, Arc<ClientRegistry>, EnforcementGate, ClientId) {
        let host = Arc::new(MemoryHost::new());
        let registry = Arc::new(ClientRegistry::new());
        let gate = EnforcementGate::new(host.clone(), registry.clone());
        let id = host.connect("Steve", None);
        registry.on_connect(id);
        (host, registry, gate, id)
    }

    #[test]
    fn test_translate_color_codes() {
        assert_eq!(translate_color_codes("&cRed &lBold"), "§cRed §lBold");
        assert_eq!(translate_color_codes("&C"), "§c");
        assert_eq!(translate_color_codes("a & b &z"), "a & b &z");
        assert_eq!(translate_color_codes("trailing &"), "trailing &");
    }

    #[test]
    fn test_format_kick_message() {
        let detection = Detection::new("wurst", "channel: wurst:main");
        let message = format_kick_message("&cBlocked ({mod})", &detection);
        assert_eq!(message, "§cBlocked (wurst)\n§7(Reason: channel: wurst:main)");
    }

    #[tokio::test]
    async fn test_enforce_disconnects_once() {
        let (host, registry, gate, id) = setup();
        let detection = Detection::new("wurst", "channel: wurst:main");

        let outcome = gate.enforce(id, &detection, &rules(true)).await;
        assert_eq!(outcome, EnforcementOutcome::Disconnected);
        assert_eq!(host.disconnect_count(id), 1);
        assert!(host.disconnects()[0].message.contains("§cNo wurst!"));
        assert!(!registry.get(id).unwrap().checked);

        // 客户端已离线
        let outcome = gate.enforce(id, &detection, &rules(true)).await;
        assert_eq!(outcome, EnforcementOutcome::ClientGone);
        assert_eq!(host.disconnect_count(id), 1);
    }

    #[tokio::test]
    async fn test_enforce_already_enforcing() {
        let (host, registry, gate, id) = setup();
        assert!(registry.begin_enforcement(id));

        let outcome = gate
            .enforce(id, &Detection::new("wurst", "brand: wurst"), &rules(true))
            .await;
        assert_eq!(outcome, EnforcementOutcome::AlreadyEnforcing);
        assert_eq!(host.disconnect_count(id), 0);
    }

    #[tokio::test]
    async fn test_host_failure_aborts() {
        let (host, _registry, gate, id) = setup();
        host.set_disconnect_failure(true);

        let outcome = gate
            .enforce(id, &Detection::new("wurst", "brand: wurst"), &rules(true))
            .await;
        assert!(matches!(outcome, EnforcementOutcome::Aborted(_)));
        assert!(host.is_online(id));
    }

    #[tokio::test]
    async fn test_enforcement_disabled_only_records() {
        let (host, _registry, gate, id) = setup();

        let outcome = gate
            .enforce(id, &Detection::new("wurst", "brand: wurst"), &rules(false))
            .await;
        assert_eq!(outcome, EnforcementOutcome::Recorded);
        assert!(host.disconnects().is_empty());
        assert!(host.is_online(id));
    }
}
