use lazy_static::lazy_static;
use parking_lot::RwLock;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::error::GuardError;
use crate::infra::ServerHost;

/// brand 频道（新版）
pub const BRAND_CHANNEL: &str = "minecraft:brand";

/// brand 探测消息
pub const BRAND_PROBE_PAYLOAD: &[u8] = b"ModGuard";

/// 握手频道探测消息
pub const HANDSHAKE_PROBE_PAYLOAD: &[u8] = b"MODGUARD_PROBE";

/// 已知的加载器 / 模组频道（入站）
pub const DETECTION_CHANNELS: [&str; 36] = [
    // 加载器
    "fml:handshake",
    "fml:hs",
    "fml:login",
    "fml:play",
    "fabric:handshake",
    "fabric:login",
    "fabric:play",
    "forge:handshake",
    "forge:login",
    "forge:play",
    // brand
    "minecraft:brand",
    "MC|Brand",
    // 小地图 / 辅助
    "journeymap:sync",
    "journeymap:update",
    "journeymap:waypoints",
    "xaero:minimap",
    "xaero:worldmap",
    "xaerominimap:main",
    "xaeroworldmap:main",
    "voxelmap:main",
    "voxelmap:update",
    "litematica:sync",
    "litematica:update",
    "schematica:sync",
    "schematica:update",
    // 作弊客户端
    "wurst:main",
    "aristois:main",
    "impact:main",
    "baritone:settings",
    "baritone:commands",
    // 第三方启动器
    "5zig:set",
    "5zig:update",
    "labymod:main",
    "labymod:settings",
    "badlion:mods",
    "badlion:client",
];

/// 握手探测频道（出站）
pub const HANDSHAKE_PROBE_CHANNELS: [&str; 10] = [
    "fml:handshake",
    "fml:hs",
    "fml:login",
    "fabric:handshake",
    "fabric:login",
    "forge:handshake",
    "forge:login",
    "journeymap:sync",
    "xaero:minimap",
    "voxelmap:main",
];

lazy_static! {
    /// 出站频道全集：brand + 握手探测频道
    pub static ref PROBE_CHANNELS: Vec<&'static str> = {
        let mut channels = vec![BRAND_CHANNEL];
        channels.extend(HANDSHAKE_PROBE_CHANNELS.iter().copied());
        channels
    };
}

/// 一次注册的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationReport {
    pub incoming_registered: usize,
    pub outgoing_registered: usize,
    /// 注册失败的频道（已记录日志并跳过）
    pub failures: Vec<GuardError>,
}

impl RegistrationReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// 频道注册器
///
/// 负责向宿主注册检测频道与探测频道，并记住哪些出站频道真正注册成功，
/// 探测只会走这些频道。
pub struct ChannelRegistrar {
    outgoing: RwLock<HashSet<String>>,
}

impl ChannelRegistrar {
    pub fn new() -> Self {
        Self {
            outgoing: RwLock::new(HashSet::new()),
        }
    }

    /// 逐个注册入站与出站频道；单个失败只记录并跳过
    pub fn register_all(&self, host: &dyn ServerHost) -> RegistrationReport {
        let mut report = RegistrationReport::default();

        for channel in DETECTION_CHANNELS {
            match host.register_incoming_channel(channel) {
                Ok(()) => report.incoming_registered += 1,
                Err(e) => {
                    warn!("⚠️ 入站频道注册失败 {}: {}", channel, e);
                    report.failures.push(e);
                }
            }
        }

        let mut outgoing = self.outgoing.write();
        outgoing.clear();
        for channel in PROBE_CHANNELS.iter() {
            match host.register_outgoing_channel(channel) {
                Ok(()) => {
                    outgoing.insert(channel.to_string());
                    report.outgoing_registered += 1;
                }
                Err(e) => {
                    warn!("⚠️ 出站频道注册失败 {}: {}", channel, e);
                    report.failures.push(e);
                }
            }
        }
        drop(outgoing);

        info!(
            "📡 频道注册完成: incoming={}/{}, outgoing={}/{}, failures={}",
            report.incoming_registered,
            DETECTION_CHANNELS.len(),
            report.outgoing_registered,
            PROBE_CHANNELS.len(),
            report.failures.len()
        );
        report
    }

    /// 注销全部频道
    pub fn unregister_all(&self, host: &dyn ServerHost) {
        host.unregister_channels();
        self.outgoing.write().clear();
        debug!("📡 已注销全部频道");
    }

    /// 注销后重新注册（reload 时使用）
    pub fn rebuild(&self, host: &dyn ServerHost) -> RegistrationReport {
        self.unregister_all(host);
        self.register_all(host)
    }

    /// 出站频道是否可用于探测
    pub fn can_probe(&self, channel: &str) -> bool {
        self.outgoing.read().contains(channel)
    }

    /// 当前可用的握手探测频道（保持固定顺序）
    pub fn probe_channels(&self) -> Vec<&'static str> {
        let outgoing = self.outgoing.read();
        HANDSHAKE_PROBE_CHANNELS
            .iter()
            .copied()
            .filter(|channel| outgoing.contains(*channel))
            .collect()
    }
}

impl Default for ChannelRegistrar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::MemoryHost;

    #[test]
    fn test_channel_sets() {
        let unique: HashSet<_> = DETECTION_CHANNELS.iter().collect();
        assert_eq!(unique.len(), DETECTION_CHANNELS.len());
        assert_eq!(PROBE_CHANNELS.len(), 11);
        assert_eq!(PROBE_CHANNELS[0], BRAND_CHANNEL);
    }

    #[test]
    fn test_register_all() {
        let host = MemoryHost::new();
        let registrar = ChannelRegistrar::new();

        let report = registrar.register_all(&host);
        assert!(report.is_complete());
        assert_eq!(report.incoming_registered, 36);
        assert_eq!(report.outgoing_registered, 11);
        assert!(registrar.can_probe(BRAND_CHANNEL));
        assert_eq!(registrar.probe_channels().len(), 10);
    }

    #[test]
    fn test_failed_registration_is_skipped() {
        let host = MemoryHost::new();
        host.reject_channel("fml:hs");
        let registrar = ChannelRegistrar::new();

        let report = registrar.register_all(&host);
        // fml:hs 同时是入站和出站频道
        assert_eq!(report.failures.len(), 2);
        assert!(matches!(report.failures[0], GuardError::ChannelRegistration { .. }));
        assert_eq!(report.incoming_registered, 35);
        assert!(!registrar.can_probe("fml:hs"));
        assert!(!registrar.probe_channels().contains(&"fml:hs"));
        assert!(registrar.can_probe("fml:login"));
    }

    #[test]
    fn test_unregister_and_rebuild() {
        let host = MemoryHost::new();
        let registrar = ChannelRegistrar::new();
        registrar.register_all(&host);

        registrar.unregister_all(&host);
        assert!(!registrar.can_probe(BRAND_CHANNEL));
        assert!(host.outgoing_channels().is_empty());

        let report = registrar.rebuild(&host);
        assert!(report.is_complete());
        assert!(registrar.can_probe(BRAND_CHANNEL));
    }
}
