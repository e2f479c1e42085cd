use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use crate::infra::ClientId;
use crate::security::client_state::{DetectionPhase, DetectionState};

/// 检测轮次的准入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassAdmission {
    /// 准入，阶段已切到 Probing
    Admitted,
    /// 客户端没有登记（已断开）
    Missing,
    /// 代次不匹配：来自旧连接的延迟任务
    Stale,
    /// 已命中，不再检测
    Flagged,
    /// 已检测完成，自动轮次跳过
    AlreadyChecked,
}

impl PassAdmission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, PassAdmission::Admitted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PassAdmission::Admitted => "admitted",
            PassAdmission::Missing => "missing",
            PassAdmission::Stale => "stale",
            PassAdmission::Flagged => "flagged",
            PassAdmission::AlreadyChecked => "already_checked",
        }
    }
}

/// 注册表统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub tracked: usize,
    pub checked: usize,
    pub modded: usize,
    pub flagged: usize,
    pub probing: usize,
}

/// 客户端注册表
///
/// 每个在线客户端一条 `DetectionState`，外加进程级的命中历史。
/// 所有操作都只在 DashMap 分片锁内做同步修改，不跨 `.await` 持有引用。
pub struct ClientRegistry {
    /// 客户端检测状态
    clients: DashMap<ClientId, DetectionState>,
    /// 进程级命中历史（reload / clear_all 时清空）
    detected: Mutex<BTreeSet<String>>,
    /// 代次分配器
    next_generation: AtomicU64,
}

impl ClientRegistry {
    /// 创建新的注册表
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            detected: Mutex::new(BTreeSet::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    fn allocate_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    /// 客户端连接：写入全新状态，覆盖可能残留的旧条目
    pub fn on_connect(&self, id: ClientId) -> u64 {
        let generation = self.allocate_generation();
        if self.clients.insert(id, DetectionState::new(generation)).is_some() {
            debug!("♻️ 覆盖客户端 {} 的残留检测状态", id);
        }
        generation
    }

    /// 首次观察到信号时惰性创建；已存在则返回当前代次
    pub fn ensure(&self, id: ClientId) -> u64 {
        self.clients
            .entry(id)
            .or_insert_with(|| DetectionState::new(self.allocate_generation()))
            .generation
    }

    /// 客户端断开：移除条目
    pub fn on_disconnect(&self, id: ClientId) -> Option<DetectionState> {
        self.clients.remove(&id).map(|(_, state)| state)
    }

    /// 获取状态快照
    pub fn get(&self, id: ClientId) -> Option<DetectionState> {
        self.clients.get(&id).map(|state| state.clone())
    }

    /// 按原代次恢复被清空的条目；条目已存在时不做任何修改
    pub fn restore(&self, id: ClientId, generation: u64) -> bool {
        match self.clients.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(DetectionState::new(generation));
                true
            }
        }
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    /// 检测轮次准入：校验代次与阶段，并切到 Probing
    ///
    /// `manual` 为 true 时允许对 Checked 的客户端重新检测。
    pub fn begin_pass(&self, id: ClientId, generation: u64, manual: bool) -> PassAdmission {
        let Some(mut state) = self.clients.get_mut(&id) else {
            return PassAdmission::Missing;
        };
        if state.generation != generation {
            return PassAdmission::Stale;
        }
        let phase = state.phase;
        match phase {
            DetectionPhase::Flagged => PassAdmission::Flagged,
            _ if !manual && !phase.accepts_automatic_pass() => PassAdmission::AlreadyChecked,
            _ => {
                state.enter_probing();
                PassAdmission::Admitted
            }
        }
    }

    /// 当前状态是否接受异步信号
    ///
    /// `monitor_after_checked` 为 false 时，Checked 的客户端不再处理异步信号。
    pub fn accepts_signal(&self, id: ClientId, monitor_after_checked: bool) -> bool {
        match self.clients.get(&id) {
            Some(state) => match state.phase {
                DetectionPhase::Flagged => false,
                DetectionPhase::Checked => monitor_after_checked,
                DetectionPhase::Unchecked | DetectionPhase::Probing => true,
            },
            None => false,
        }
    }

    /// 标记检测完成（仅当代次匹配）
    pub fn mark_checked(&self, id: ClientId, generation: u64) -> bool {
        match self.clients.get_mut(&id) {
            Some(mut state) if state.generation == generation => state.complete(),
            _ => false,
        }
    }

    /// 记录允许的加载器或启发式提示（不会触发执行）
    pub fn mark_modded(&self, id: ClientId) -> bool {
        match self.clients.get_mut(&id) {
            Some(mut state) => {
                let first = !state.uses_mod_loader;
                state.uses_mod_loader = true;
                first
            }
            None => false,
        }
    }

    /// 记录命中；第一次进入 Flagged 时返回 true
    pub fn mark_flagged(&self, id: ClientId, identifier: &str) -> bool {
        let first = match self.clients.get_mut(&id) {
            Some(mut state) => state.flag(identifier),
            None => return false,
        };
        self.detected.lock().insert(identifier.to_string());
        if first {
            info!("🚩 客户端 {} 被标记: {}", id, identifier);
        }
        first
    }

    /// 开始执行断开：设置执行标记并清除 `checked`
    ///
    /// 已在执行中或条目不存在时返回 false。
    pub fn begin_enforcement(&self, id: ClientId) -> bool {
        match self.clients.get_mut(&id) {
            Some(mut state) if !state.enforcing => {
                state.enforcing = true;
                state.checked = false;
                true
            }
            _ => false,
        }
    }

    /// 重置为全新状态（手动重扫），返回新代次
    pub fn reset(&self, id: ClientId) -> Option<u64> {
        let mut state = self.clients.get_mut(&id)?;
        let generation = self.allocate_generation();
        *state = DetectionState::new(generation);
        Some(generation)
    }

    /// 清空全部状态与命中历史（reload / disable）
    pub fn clear_all(&self) {
        let count = self.clients.len();
        self.clients.clear();
        self.detected.lock().clear();
        info!("🧹 已清空 {} 个客户端的检测状态", count);
    }

    /// 统计
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for entry in self.clients.iter() {
            stats.tracked += 1;
            if entry.checked {
                stats.checked += 1;
            }
            if entry.uses_mod_loader {
                stats.modded += 1;
            }
            if entry.flagged_modded {
                stats.flagged += 1;
            }
            if entry.phase == DetectionPhase::Probing {
                stats.probing += 1;
            }
        }
        stats
    }

    /// 进程级命中历史（有序）
    pub fn detected_identifiers(&self) -> Vec<String> {
        self.detected.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_overwrites_stale_state() {
        let registry = ClientRegistry::new();
        let id = ClientId::from_name("Steve");

        let first = registry.on_connect(id);
        registry.mark_flagged(id, "wurst");
        let second = registry.on_connect(id);

        assert_ne!(first, second);
        let state = registry.get(id).unwrap();
        assert_eq!(state.phase, DetectionPhase::Unchecked);
        assert!(!state.flagged_modded);
        // 进程级历史不受重连影响
        assert_eq!(registry.detected_identifiers(), vec!["wurst".to_string()]);
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let registry = ClientRegistry::new();
        let id = ClientId::random();

        let generation = registry.ensure(id);
        assert_eq!(registry.ensure(id), generation);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_begin_pass_admission() {
        let registry = ClientRegistry::new();
        let id = ClientId::random();

        assert_eq!(registry.begin_pass(id, 1, false), PassAdmission::Missing);

        let generation = registry.on_connect(id);
        assert_eq!(registry.begin_pass(id, generation + 100, false), PassAdmission::Stale);
        assert_eq!(registry.begin_pass(id, generation, false), PassAdmission::Admitted);
        assert_eq!(registry.get(id).unwrap().phase, DetectionPhase::Probing);

        assert!(registry.mark_checked(id, generation));
        assert_eq!(registry.begin_pass(id, generation, false), PassAdmission::AlreadyChecked);
        assert_eq!(registry.begin_pass(id, generation, true), PassAdmission::Admitted);

        registry.mark_flagged(id, "xray");
        assert_eq!(registry.begin_pass(id, generation, true), PassAdmission::Flagged);
    }

    #[test]
    fn test_mark_checked_rejects_other_generation() {
        let registry = ClientRegistry::new();
        let id = ClientId::random();
        let old = registry.on_connect(id);
        registry.on_connect(id);

        assert!(!registry.mark_checked(id, old));
        assert!(!registry.get(id).unwrap().checked);
    }

    #[test]
    fn test_mark_flagged_first_transition_only() {
        let registry = ClientRegistry::new();
        let id = ClientId::random();
        registry.on_connect(id);

        assert!(registry.mark_flagged(id, "baritone"));
        assert!(!registry.mark_flagged(id, "wurst"));

        let state = registry.get(id).unwrap();
        assert_eq!(state.detected_identifiers.len(), 2);
        assert_eq!(registry.detected_identifiers(), vec!["baritone".to_string(), "wurst".to_string()]);
    }

    #[test]
    fn test_mark_flagged_unknown_client_records_nothing() {
        let registry = ClientRegistry::new();
        assert!(!registry.mark_flagged(ClientId::random(), "wurst"));
        assert!(registry.detected_identifiers().is_empty());
    }

    #[test]
    fn test_begin_enforcement_once() {
        let registry = ClientRegistry::new();
        let id = ClientId::random();
        let generation = registry.on_connect(id);
        registry.begin_pass(id, generation, false);
        registry.mark_checked(id, generation);

        assert!(registry.begin_enforcement(id));
        assert!(!registry.get(id).unwrap().checked);
        assert!(!registry.begin_enforcement(id));
        assert!(!registry.begin_enforcement(ClientId::random()));
    }

    #[test]
    fn test_accepts_signal() {
        let registry = ClientRegistry::new();
        let id = ClientId::random();
        assert!(!registry.accepts_signal(id, true));

        let generation = registry.on_connect(id);
        assert!(registry.accepts_signal(id, false));

        registry.mark_checked(id, generation);
        assert!(registry.accepts_signal(id, true));
        assert!(!registry.accepts_signal(id, false));

        registry.mark_flagged(id, "xray");
        assert!(!registry.accepts_signal(id, true));
    }

    #[test]
    fn test_reset_and_clear_all() {
        let registry = ClientRegistry::new();
        let id = ClientId::random();
        let generation = registry.on_connect(id);
        registry.mark_flagged(id, "impact");

        let fresh = registry.reset(id).unwrap();
        assert_ne!(fresh, generation);
        assert_eq!(registry.get(id).unwrap().phase, DetectionPhase::Unchecked);
        assert!(registry.reset(ClientId::random()).is_none());

        registry.clear_all();
        assert!(registry.is_empty());
        assert!(registry.detected_identifiers().is_empty());
    }

    #[test]
    fn test_restore_keeps_generation_after_clear() {
        let registry = ClientRegistry::new();
        let id = ClientId::random();
        let generation = registry.on_connect(id);

        // 条目存在时不覆盖
        assert!(!registry.restore(id, generation + 1));
        assert_eq!(registry.get(id).unwrap().generation, generation);

        registry.clear_all();
        assert!(registry.restore(id, generation));
        assert_eq!(registry.begin_pass(id, generation, false), PassAdmission::Admitted);
    }

    #[test]
    fn test_stats() {
        let registry = ClientRegistry::new();
        let a = ClientId::random();
        let b = ClientId::random();
        let c = ClientId::random();
        let ga = registry.on_connect(a);
        let gb = registry.on_connect(b);
        registry.on_connect(c);

        registry.mark_checked(a, ga);
        registry.mark_modded(a);
        registry.begin_pass(b, gb, false);
        registry.mark_flagged(c, "wurst");

        assert_eq!(
            registry.stats(),
            RegistryStats {
                tracked: 3,
                checked: 1,
                modded: 1,
                flagged: 1,
                probing: 1,
            }
        );
    }
}
