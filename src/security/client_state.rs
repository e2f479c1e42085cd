//! 客户端检测状态机
//!
//! Unchecked → Probing → (Checked | Flagged)
//!
//! - Flagged 是终态，进入后立即交给执行闸门
//! - Checked 对自动调度是终态，但手动重扫可以重新进入 Probing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 检测阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionPhase {
    /// 刚连接，尚未执行任何检测轮次
    Unchecked,
    /// 正在执行检测轮次
    Probing,
    /// 检测完成，未发现禁止的模组
    Checked,
    /// 命中黑名单
    Flagged,
}

impl DetectionPhase {
    /// 是否还允许自动调度的检测轮次
    pub fn accepts_automatic_pass(&self) -> bool {
        matches!(self, DetectionPhase::Unchecked | DetectionPhase::Probing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionPhase::Unchecked => "unchecked",
            DetectionPhase::Probing => "probing",
            DetectionPhase::Checked => "checked",
            DetectionPhase::Flagged => "flagged",
        }
    }
}

/// 单个连接的检测状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionState {
    /// 当前阶段
    pub phase: DetectionPhase,
    /// 不再需要自动检测
    pub checked: bool,
    /// 命中了黑名单
    pub flagged_modded: bool,
    /// 使用了允许的加载器，或启发式认为有模组（不会触发执行）
    pub uses_mod_loader: bool,
    /// 正在执行断开（防止重复请求）
    pub enforcing: bool,
    /// 本连接上命中的标识
    pub detected_identifiers: BTreeSet<String>,
    /// 连接代次：重连或重置后递增，旧代次的延迟任务全部失效
    pub generation: u64,
    /// 状态创建时间
    pub connected_at: DateTime<Utc>,
    /// 命中时间
    pub flagged_at: Option<DateTime<Utc>>,
}

impl DetectionState {
    pub fn new(generation: u64) -> Self {
        Self {
            phase: DetectionPhase::Unchecked,
            checked: false,
            flagged_modded: false,
            uses_mod_loader: false,
            enforcing: false,
            detected_identifiers: BTreeSet::new(),
            generation,
            connected_at: Utc::now(),
            flagged_at: None,
        }
    }

    /// 进入 Probing；Flagged 不可离开
    pub fn enter_probing(&mut self) -> bool {
        if self.phase == DetectionPhase::Flagged {
            return false;
        }
        self.phase = DetectionPhase::Probing;
        true
    }

    /// 标记检测完成；`checked` 只会从 false 变为 true
    pub fn complete(&mut self) -> bool {
        if self.phase == DetectionPhase::Flagged {
            return false;
        }
        self.phase = DetectionPhase::Checked;
        self.checked = true;
        true
    }

    /// 记录命中；第一次转入 Flagged 时返回 true
    pub fn flag(&mut self, identifier: &str) -> bool {
        self.detected_identifiers.insert(identifier.to_string());
        if self.phase == DetectionPhase::Flagged {
            return false;
        }
        self.phase = DetectionPhase::Flagged;
        self.flagged_modded = true;
        self.flagged_at = Some(Utc::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine() {
        let mut state = DetectionState::new(1);

        // 初始状态
        assert_eq!(state.phase, DetectionPhase::Unchecked);
        assert!(state.phase.accepts_automatic_pass());

        assert!(state.enter_probing());
        assert_eq!(state.phase, DetectionPhase::Probing);

        assert!(state.complete());
        assert!(state.checked);
        assert!(!state.phase.accepts_automatic_pass());

        // 手动重扫可以重新进入 Probing，但 checked 保持为 true
        assert!(state.enter_probing());
        assert!(state.checked);
    }

    #[test]
    fn test_flagged_is_terminal() {
        let mut state = DetectionState::new(1);

        assert!(state.flag("baritone"));
        assert!(!state.flag("wurst"));
        assert!(!state.enter_probing());
        assert!(!state.complete());

        assert_eq!(state.phase, DetectionPhase::Flagged);
        assert!(state.flagged_modded);
        assert_eq!(state.detected_identifiers.len(), 2);
        assert!(state.flagged_at.is_some());
    }
}
