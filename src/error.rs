use thiserror::Error;

/// 检测引擎错误类型
///
/// 所有按客户端发生的错误都是非致命的，只影响当前客户端的当前操作；
/// 只有 `Config` 会在启动阶段中止进程。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    /// 配置缺失或格式错误
    #[error("Configuration error: {0}")]
    Config(String),
    /// 宿主拒绝注册/使用某个频道
    #[error("Channel registration failed for {channel}: {reason}")]
    ChannelRegistration { channel: String, reason: String },
    /// 频道消息不是合法文本
    #[error("Undecodable payload on channel {channel} ({invalid_bytes} invalid bytes)")]
    SignalDecode { channel: String, invalid_bytes: usize },
    /// 宿主调用失败（例如客户端已离线）
    #[error("Host unavailable: {0}")]
    HostUnavailable(String),
    /// 管理命令的目标玩家不存在
    #[error("Player not found: {0}")]
    PlayerNotFound(String),
    /// 权限不足
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    /// 无效的管理命令
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GuardError {
    /// 是否只影响单个客户端（不应向上传播到其他客户端）
    pub fn is_client_scoped(&self) -> bool {
        matches!(
            self,
            GuardError::ChannelRegistration { .. }
                | GuardError::SignalDecode { .. }
                | GuardError::HostUnavailable(_)
        )
    }
}

impl From<toml::de::Error> for GuardError {
    fn from(err: toml::de::Error) -> Self {
        GuardError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for GuardError {
    fn from(err: serde_json::Error) -> Self {
        GuardError::Internal(err.to_string())
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_scoped_errors() {
        assert!(GuardError::HostUnavailable("gone".to_string()).is_client_scoped());
        assert!(GuardError::SignalDecode {
            channel: "x:y".to_string(),
            invalid_bytes: 2
        }
        .is_client_scoped());
        assert!(!GuardError::Config("missing".to_string()).is_client_scoped());
    }

    #[test]
    fn test_toml_error_maps_to_config() {
        let err = toml::from_str::<toml::Value>("= broken").unwrap_err();
        assert!(matches!(GuardError::from(err), GuardError::Config(_)));
    }
}
