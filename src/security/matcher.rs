//! 信号匹配
//!
//! 将单个观察到的信号（频道名、客户端 brand、频道消息内容）与规则集比对，得出判定。
//! 所有比较都是大小写不敏感的子串包含。
//!
//! 判定顺序：
//! - 频道名 / brand：先查白名单（命中即短路，视为允许的加载器），再查黑名单
//! - 消息内容：只查黑名单，不参与白名单判定

use std::borrow::Cow;

use super::rules::RuleSet;

/// 观察到的信号（只在匹配期间借用，不会被保存）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal<'a> {
    /// 客户端注册的频道名
    ChannelName(&'a str),
    /// 客户端自报的 brand
    ClientBrand(&'a str),
    /// 客户端在某频道上发送的数据
    MessageContent { channel: &'a str, payload: &'a [u8] },
}

impl<'a> Signal<'a> {
    /// 信号来源（日志与指标标签）
    pub fn source(&self) -> &'static str {
        match self {
            Signal::ChannelName(_) => "channel",
            Signal::ClientBrand(_) => "brand",
            Signal::MessageContent { .. } => "message",
        }
    }
}

/// 单个信号的判定
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verdict {
    /// 命中的黑名单条目
    pub matched_identifier: Option<String>,
    /// 是否命中白名单
    pub is_allowed_loader: bool,
    /// 命中的白名单条目
    pub allowed_loader: Option<String>,
}

impl Verdict {
    /// 未命中任何规则
    pub fn clean() -> Self {
        Self::default()
    }

    fn allowed(loader: &str) -> Self {
        Self {
            matched_identifier: None,
            is_allowed_loader: true,
            allowed_loader: Some(loader.to_string()),
        }
    }

    fn denied(identifier: &str) -> Self {
        Self {
            matched_identifier: Some(identifier.to_string()),
            is_allowed_loader: false,
            allowed_loader: None,
        }
    }

    /// 是否命中黑名单
    pub fn is_positive(&self) -> bool {
        self.matched_identifier.is_some()
    }
}

/// 解码后的消息内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPayload<'a> {
    /// 小写化后的文本，非法字节已替换为 U+FFFD
    pub text: Cow<'a, str>,
    /// 非法字节数（0 表示是合法 UTF-8）
    pub invalid_bytes: usize,
}

impl<'a> DecodedPayload<'a> {
    pub fn is_lossy(&self) -> bool {
        self.invalid_bytes > 0
    }
}

/// 尽力而为地把消息字节解码为小写文本，永不失败
pub fn decode_payload(payload: &[u8]) -> DecodedPayload<'_> {
    let invalid_bytes = count_invalid_bytes(payload);
    let decoded = String::from_utf8_lossy(payload);
    let text = if decoded.chars().any(char::is_uppercase) {
        Cow::Owned(decoded.to_lowercase())
    } else {
        decoded
    };
    DecodedPayload {
        text,
        invalid_bytes,
    }
}

fn count_invalid_bytes(mut bytes: &[u8]) -> usize {
    let mut invalid = 0;
    loop {
        match std::str::from_utf8(bytes) {
            Ok(_) => return invalid,
            Err(e) => {
                let skip = e.error_len().unwrap_or(bytes.len() - e.valid_up_to());
                invalid += skip;
                bytes = &bytes[e.valid_up_to() + skip..];
            }
        }
    }
}

/// 日志用预览：按字符截断
pub fn preview(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// 对单个信号做判定
pub fn classify(signal: &Signal<'_>, rules: &RuleSet) -> Verdict {
    match signal {
        Signal::ChannelName(value) | Signal::ClientBrand(value) => classify_identity(value, rules),
        Signal::MessageContent { payload, .. } => {
            let decoded = decode_payload(payload);
            match_denylist(&decoded.text, rules)
        }
    }
}

/// 频道名 / brand：白名单优先
fn classify_identity(value: &str, rules: &RuleSet) -> Verdict {
    let normalized = value.to_lowercase();

    if let Some(loader) = rules
        .allowlist()
        .iter()
        .find(|loader| normalized.contains(loader.as_str()))
    {
        return Verdict::allowed(loader);
    }

    match_denylist(&normalized, rules)
}

/// 只查黑名单；`normalized` 必须已经小写化
fn match_denylist(normalized: &str, rules: &RuleSet) -> Verdict {
    rules
        .denylist()
        .iter()
        .find(|identifier| normalized.contains(identifier.as_str()))
        .map(|identifier| Verdict::denied(identifier))
        .unwrap_or_else(Verdict::clean)
}

/// 启发式提示（未经验证，只用于标记"有模组"，永远不会触发执行）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeuristicHint {
    /// 注册的频道数量超过阈值
    ManyChannels { count: usize, threshold: usize },
    /// 自报 brand 不是 vanilla
    NonVanillaBrand(String),
}

/// 频道数量启发式
pub fn channel_count_hint(count: usize, threshold: usize) -> Option<HeuristicHint> {
    (count > threshold).then_some(HeuristicHint::ManyChannels { count, threshold })
}

/// brand 启发式
pub fn brand_hint(brand: &str) -> Option<HeuristicHint> {
    let trimmed = brand.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("vanilla") {
        None
    } else {
        Some(HeuristicHint::NonVanillaBrand(trimmed.to_string()))
    }
}
