use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::Result;

/// 客户端标识
///
/// 同一玩家重连时会复用同一个 ID，但它只是查找键，
/// 不代表检测状态可以跨连接延续（见 `DetectionState::generation`）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub Uuid);

impl ClientId {
    /// 随机生成
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// 由玩家名派生稳定 ID（离线模式服务器的做法）
    pub fn from_name(name: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("OfflinePlayer:{}", name).as_bytes()))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 宿主服务器接口
///
/// 检测引擎对宿主的全部依赖都经过这里：
/// - 查询：在线状态、权限、已注册频道、客户端 brand
/// - 动作：在频道上发送数据、断开客户端、注册/注销频道
///
/// 延迟回调不在这里：定时由 tokio 负责。
#[async_trait]
pub trait ServerHost: Send + Sync + 'static {
    /// 客户端是否仍然在线
    fn is_online(&self, id: ClientId) -> bool;

    /// 客户端显示名（用于日志和管理命令）
    fn client_name(&self, id: ClientId) -> Option<String>;

    /// 通过名字查找在线客户端（大小写不敏感）
    fn find_client(&self, name: &str) -> Option<ClientId>;

    /// 所有在线客户端
    fn online_clients(&self) -> Vec<ClientId>;

    /// 权限查询
    fn has_permission(&self, id: ClientId, permission: &str) -> bool;

    /// 客户端当前监听的频道
    fn listening_channels(&self, id: ClientId) -> Result<Vec<String>>;

    /// 客户端自报的 brand（未验证）
    fn client_brand(&self, id: ClientId) -> Option<String>;

    /// 在指定频道上向客户端发送数据
    async fn send_channel_message(&self, id: ClientId, channel: &str, payload: &[u8]) -> Result<()>;

    /// 请求断开客户端，`message` 显示给玩家
    async fn disconnect_client(&self, id: ClientId, message: &str) -> Result<()>;

    /// 注册入站频道
    fn register_incoming_channel(&self, channel: &str) -> Result<()>;

    /// 注册出站频道
    fn register_outgoing_channel(&self, channel: &str) -> Result<()>;

    /// 注销本插件注册的全部频道
    fn unregister_channels(&self);

    /// 便于日志输出的名字，离线时退回到 ID
    fn display_name(&self, id: ClientId) -> String {
        self.client_name(id).unwrap_or_else(|| id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_from_name_is_stable() {
        assert_eq!(ClientId::from_name("Steve"), ClientId::from_name("Steve"));
        assert_ne!(ClientId::from_name("Steve"), ClientId::from_name("Alex"));
    }
}
