/// 检测模块
///
/// 判断已连接的客户端是否运行了禁止的第三方模组：
/// - 规则集（黑名单 / 白名单 / 执行策略），reload 时整体替换
/// - 信号匹配（频道名、brand、频道消息内容）
/// - 两轮延迟检测 + 异步事件即时检测
/// - 执行闸门（每个客户端至多请求一次断开）
///
/// ## 检测状态
///
/// `Unchecked -> Probing -> (Checked | Flagged)`，见 `client_state`。
pub mod channels;
pub mod client_state;
pub mod enforcement;
pub mod matcher;
pub mod rules;
pub mod scheduler;

pub use channels::{ChannelRegistrar, RegistrationReport};
pub use client_state::{DetectionPhase, DetectionState};
pub use enforcement::{Detection, EnforcementGate, EnforcementOutcome};
pub use matcher::{classify, Signal, Verdict};
pub use rules::{RuleSet, RuleStore};
pub use scheduler::{DetectionScheduler, PassKind, PassOutcome, SkipReason, BYPASS_PERMISSION};
