//! 规则集
//!
//! 黑名单（禁止的模组标识）、白名单（允许的加载器）与执行策略。
//! 规则集一旦构建就不可变；重载时整体替换（swap），
//! 读者只会看到旧的或新的完整规则集，不会看到中间状态。

use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::RulesConfig;
use crate::error::{GuardError, Result};

/// 不可变规则集
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    /// 小写化、去重后的黑名单，保持配置顺序
    denylist: Vec<String>,
    /// 小写化、去重后的白名单，保持配置顺序
    allowlist: Vec<String>,
    /// 命中后是否断开客户端
    enforcement_enabled: bool,
    /// 断开消息模板
    message_template: String,
}

impl RuleSet {
    /// 直接构造（条目会被规范化）
    pub fn new<I, J, S, T>(
        denylist: I,
        allowlist: J,
        enforcement_enabled: bool,
        message_template: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Self {
            denylist: normalize_entries(denylist),
            allowlist: normalize_entries(allowlist),
            enforcement_enabled,
            message_template: message_template.into(),
        }
    }

    /// 从配置构建
    pub fn from_config(config: &RulesConfig) -> Result<Self> {
        if config.kick_message.trim().is_empty() {
            return Err(GuardError::Config("rules.kick-message must not be empty".to_string()));
        }
        Ok(Self::new(
            &config.blocked_mods,
            &config.allowed_mod_loaders,
            config.kick_on_mod_detection,
            config.kick_message.clone(),
        ))
    }

    pub fn denylist(&self) -> &[String] {
        &self.denylist
    }

    pub fn allowlist(&self) -> &[String] {
        &self.allowlist
    }

    pub fn enforcement_enabled(&self) -> bool {
        self.enforcement_enabled
    }

    pub fn message_template(&self) -> &str {
        &self.message_template
    }
}

/// 规范化：去空白、小写、去空项、去重（保留首次出现的顺序）
fn normalize_entries<I, S>(entries: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .map(|entry| entry.as_ref().trim().to_lowercase())
        .filter(|entry| !entry.is_empty())
        .filter(|entry| seen.insert(entry.clone()))
        .collect()
}

/// 当前生效规则集的持有者
///
/// 读者拿到的是 `Arc<RuleSet>` 快照，持锁时间只有一次 Arc clone。
#[derive(Debug)]
pub struct RuleStore {
    current: RwLock<Arc<RuleSet>>,
}

impl RuleStore {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(rules)),
        }
    }

    /// 获取当前规则集快照
    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.current.read().clone()
    }

    /// 整体替换规则集，返回旧规则集
    pub fn swap(&self, rules: RuleSet) -> Arc<RuleSet> {
        let mut current = self.current.write();
        std::mem::replace(&mut *current, Arc::new(rules))
    }
}
