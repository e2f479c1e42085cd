use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::host::{ClientId, ServerHost};
use crate::error::{GuardError, Result};

/// 内存中的模拟客户端
#[derive(Debug, Clone)]
pub struct SimulatedClient {
    pub id: ClientId,
    pub name: String,
    pub brand: Option<String>,
    /// 按注册顺序保存，保证遍历顺序确定
    pub channels: Vec<String>,
    pub permissions: HashSet<String>,
    pub connected_at: i64,
}

/// 已发送的频道消息记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub client: ClientId,
    pub channel: String,
    pub payload: Vec<u8>,
}

/// 断开记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectRecord {
    pub client: ClientId,
    pub name: String,
    pub message: String,
}

/// 内存宿主
///
/// 完整实现 `ServerHost`，用于集成测试和控制台模式：
/// 客户端表使用 DashMap（分片锁），发送与断开动作全部记录下来供断言。
#[derive(Debug, Default)]
pub struct MemoryHost {
    /// 在线客户端：id -> SimulatedClient
    clients: DashMap<ClientId, SimulatedClient>,
    /// 已注册入站频道
    incoming: Mutex<BTreeSet<String>>,
    /// 已注册出站频道
    outgoing: Mutex<BTreeSet<String>>,
    /// 注册时会被拒绝的频道（模拟宿主限制）
    rejected_channels: Mutex<HashSet<String>>,
    sent: Mutex<Vec<SentMessage>>,
    disconnects: Mutex<Vec<DisconnectRecord>>,
    /// 为 true 时断开请求失败（模拟宿主拒绝）
    fail_disconnects: AtomicBool,
    /// 为 true 时查询频道列表失败
    fail_channel_queries: AtomicBool,
    /// 客户端离线通知的订阅者
    disconnect_listeners: Mutex<Vec<mpsc::UnboundedSender<ClientId>>>,
}

impl MemoryHost {
    /// 创建空宿主
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟客户端连接，返回稳定 ID
    pub fn connect(&self, name: &str, brand: Option<&str>) -> ClientId {
        let id = ClientId::from_name(name);
        let client = SimulatedClient {
            id,
            name: name.to_string(),
            brand: brand.map(str::to_string),
            channels: Vec::new(),
            permissions: HashSet::new(),
            connected_at: chrono::Utc::now().timestamp_millis(),
        };
        self.clients.insert(id, client);
        debug!("📝 MemoryHost: 客户端连接 name={}, id={}", name, id);
        id
    }

    /// 模拟客户端主动离线
    pub fn disconnect(&self, id: ClientId) -> bool {
        let removed = self.clients.remove(&id).is_some();
        if removed {
            self.notify_disconnect(id);
        }
        removed
    }

    /// 订阅客户端离线通知（主动离线与被踢出都会通知）
    pub fn subscribe_disconnects(&self) -> mpsc::UnboundedReceiver<ClientId> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.disconnect_listeners.lock().push(tx);
        rx
    }

    fn notify_disconnect(&self, id: ClientId) {
        self.disconnect_listeners
            .lock()
            .retain(|listener| listener.send(id).is_ok());
    }

    /// 模拟客户端注册频道（重复注册忽略）
    pub fn add_channel(&self, id: ClientId, channel: &str) -> bool {
        match self.clients.get_mut(&id) {
            Some(mut client) => {
                if !client.channels.iter().any(|c| c == channel) {
                    client.channels.push(channel.to_string());
                }
                true
            }
            None => false,
        }
    }

    /// 设置客户端 brand
    pub fn set_brand(&self, id: ClientId, brand: &str) {
        if let Some(mut client) = self.clients.get_mut(&id) {
            client.brand = Some(brand.to_string());
        }
    }

    /// 授予权限
    pub fn grant(&self, id: ClientId, permission: &str) {
        if let Some(mut client) = self.clients.get_mut(&id) {
            client.permissions.insert(permission.to_string());
        }
    }

    /// 让宿主拒绝注册某个频道
    pub fn reject_channel(&self, channel: &str) {
        self.rejected_channels.lock().insert(channel.to_string());
    }

    /// 让后续断开请求失败
    pub fn set_disconnect_failure(&self, fail: bool) {
        self.fail_disconnects.store(fail, Ordering::SeqCst);
    }

    /// 让后续频道查询失败（客户端仍在线）
    pub fn set_channel_query_failure(&self, fail: bool) {
        self.fail_channel_queries.store(fail, Ordering::SeqCst);
    }

    /// 发送给某个客户端的消息
    pub fn sent_to(&self, id: ClientId) -> Vec<SentMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.client == id)
            .cloned()
            .collect()
    }

    /// 全部断开记录
    pub fn disconnects(&self) -> Vec<DisconnectRecord> {
        self.disconnects.lock().clone()
    }

    /// 某个客户端被断开的次数
    pub fn disconnect_count(&self, id: ClientId) -> usize {
        self.disconnects
            .lock()
            .iter()
            .filter(|d| d.client == id)
            .count()
    }

    /// 已注册的入站频道
    pub fn incoming_channels(&self) -> Vec<String> {
        self.incoming.lock().iter().cloned().collect()
    }

    /// 已注册的出站频道
    pub fn outgoing_channels(&self) -> Vec<String> {
        self.outgoing.lock().iter().cloned().collect()
    }

    fn check_registrable(&self, channel: &str) -> Result<()> {
        if self.rejected_channels.lock().contains(channel) {
            return Err(GuardError::ChannelRegistration {
                channel: channel.to_string(),
                reason: "rejected by host".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ServerHost for MemoryHost {
    fn is_online(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    fn client_name(&self, id: ClientId) -> Option<String> {
        self.clients.get(&id).map(|c| c.name.clone())
    }

    fn find_client(&self, name: &str) -> Option<ClientId> {
        self.clients
            .iter()
            .find(|entry| entry.value().name.eq_ignore_ascii_case(name))
            .map(|entry| *entry.key())
    }

    fn online_clients(&self) -> Vec<ClientId> {
        let mut clients: Vec<(i64, ClientId)> = self
            .clients
            .iter()
            .map(|entry| (entry.value().connected_at, *entry.key()))
            .collect();
        clients.sort();
        clients.into_iter().map(|(_, id)| id).collect()
    }

    fn has_permission(&self, id: ClientId, permission: &str) -> bool {
        self.clients
            .get(&id)
            .map(|c| c.permissions.contains(permission))
            .unwrap_or(false)
    }

    fn listening_channels(&self, id: ClientId) -> Result<Vec<String>> {
        if self.fail_channel_queries.load(Ordering::SeqCst) {
            return Err(GuardError::Internal("channel query rejected by host".to_string()));
        }
        self.clients
            .get(&id)
            .map(|c| c.channels.clone())
            .ok_or_else(|| GuardError::HostUnavailable(format!("client {} is offline", id)))
    }

    fn client_brand(&self, id: ClientId) -> Option<String> {
        self.clients.get(&id).and_then(|c| c.brand.clone())
    }

    async fn send_channel_message(&self, id: ClientId, channel: &str, payload: &[u8]) -> Result<()> {
        if !self.clients.contains_key(&id) {
            return Err(GuardError::HostUnavailable(format!("client {} is offline", id)));
        }
        if !self.outgoing.lock().contains(channel) {
            return Err(GuardError::ChannelRegistration {
                channel: channel.to_string(),
                reason: "outgoing channel not registered".to_string(),
            });
        }
        self.sent.lock().push(SentMessage {
            client: id,
            channel: channel.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn disconnect_client(&self, id: ClientId, message: &str) -> Result<()> {
        if self.fail_disconnects.load(Ordering::SeqCst) {
            return Err(GuardError::HostUnavailable("disconnect rejected by host".to_string()));
        }
        let Some((_, client)) = self.clients.remove(&id) else {
            warn!("⚠️ MemoryHost: 断开失败，客户端不在线 id={}", id);
            return Err(GuardError::HostUnavailable(format!("client {} is offline", id)));
        };
        info!("🔌 MemoryHost: 断开客户端 name={}, id={}", client.name, id);
        self.disconnects.lock().push(DisconnectRecord {
            client: id,
            name: client.name,
            message: message.to_string(),
        });
        self.notify_disconnect(id);
        Ok(())
    }

    fn register_incoming_channel(&self, channel: &str) -> Result<()> {
        self.check_registrable(channel)?;
        self.incoming.lock().insert(channel.to_string());
        Ok(())
    }

    fn register_outgoing_channel(&self, channel: &str) -> Result<()> {
        self.check_registrable(channel)?;
        self.outgoing.lock().insert(channel.to_string());
        Ok(())
    }

    fn unregister_channels(&self) {
        self.incoming.lock().clear();
        self.outgoing.lock().clear();
    }
}
