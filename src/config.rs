use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{GuardError, Result};

/// 默认配置文件名
pub const DEFAULT_CONFIG_FILE: &str = "modguard.toml";

/// 默认踢出消息，`{mod}` 会被替换为命中的标识
pub const DEFAULT_KICK_MESSAGE: &str = "&cBlocked mods are not allowed on this server! ({mod})";

/// `generate-config` 输出的默认配置，同时也是无配置文件时的内置规则
pub const DEFAULT_CONFIG_TOML: &str = r#"# ModGuard 配置文件
# 此文件由 modguard generate-config 生成

[rules]
# 禁止的模组标识（大小写不敏感的子串匹配）
blocked-mods = [
    "wurst",
    "aristois",
    "impact",
    "baritone",
    "meteor",
    "liquidbounce",
    "xray",
    "freecam",
]
# 允许的模组加载器（优先于 blocked-mods 判断）
allowed-mod-loaders = [
    "fabric",
    "forge",
    "minecraft",
]
kick-on-mod-detection = true
kick-message = "&cBlocked mods are not allowed on this server! ({mod})"

[detection]
first-pass-delay-ms = 1000
second-pass-delay-ms = 5000
# 启发式：频道数量超过阈值时标记为"有模组"，不会触发踢出
channel-count-heuristic = true
suspicious-channel-threshold = 2
# 检测完成后是否继续检查新注册的频道和频道消息（默认只在手动重扫期间检查）
monitor-after-checked = false
message-preview-len = 100

[logging]
level = "info"
format = "compact"
# file = "./logs/modguard.log"

[metrics]
enabled = false
host = "127.0.0.1"
port = 9464
"#;

/// 完整配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// 规则（黑白名单与执行策略）
    pub rules: RulesConfig,
    /// 检测调度参数
    pub detection: DetectionConfig,
    /// 日志配置
    pub logging: LoggingConfig,
    /// 监控配置
    pub metrics: MetricsConfig,
    /// 配置来源文件（reload 时重新读取）
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            rules: RulesConfig::default(),
            detection: DetectionConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
            source_path: None,
        }
    }
}

/// 规则配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// 禁止的模组标识
    pub blocked_mods: Vec<String>,
    /// 允许的模组加载器
    pub allowed_mod_loaders: Vec<String>,
    /// 命中后是否踢出
    pub kick_on_mod_detection: bool,
    /// 踢出消息模板，支持 `{mod}` 占位符和 `&` 颜色代码
    pub kick_message: String,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            blocked_mods: [
                "wurst",
                "aristois",
                "impact",
                "baritone",
                "meteor",
                "liquidbounce",
                "xray",
                "freecam",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            allowed_mod_loaders: ["fabric", "forge", "minecraft"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            kick_on_mod_detection: true,
            kick_message: DEFAULT_KICK_MESSAGE.to_string(),
        }
    }
}

/// 检测调度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// 连接后第一轮检测的延迟（毫秒）
    pub first_pass_delay_ms: u64,
    /// 第一轮之后第二轮检测的延迟（毫秒）
    pub second_pass_delay_ms: u64,
    /// 是否启用频道数量启发式
    pub channel_count_heuristic: bool,
    /// 频道数量超过该值视为"有模组"
    pub suspicious_channel_threshold: usize,
    /// 检测完成后是否继续检查异步信号
    pub monitor_after_checked: bool,
    /// 日志中消息内容预览的最大字符数
    pub message_preview_len: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            first_pass_delay_ms: 1000,
            second_pass_delay_ms: 5000,
            channel_count_heuristic: true,
            suspicious_channel_threshold: 2,
            monitor_after_checked: false,
            message_preview_len: 100,
        }
    }
}

impl DetectionConfig {
    /// 第一轮延迟
    pub fn first_pass_delay(&self) -> Duration {
        Duration::from_millis(self.first_pass_delay_ms)
    }

    /// 第二轮延迟
    pub fn second_pass_delay(&self) -> Duration {
        Duration::from_millis(self.second_pass_delay_ms)
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: Option<String>,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: None,
            file: None,
        }
    }
}

/// 监控配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 9464,
        }
    }
}

impl MetricsConfig {
    /// 监听地址
    pub fn listen_addr(&self) -> Result<std::net::SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| GuardError::Config(format!("invalid metrics address: {}", e)))
    }
}

impl GuardConfig {
    /// 默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 TOML 文本解析
    ///
    /// `[rules]` 中的 `blocked-mods` 与 `allowed-mod-loaders` 为必填项，
    /// 其余字段缺省时使用默认值。
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)?;
        Self::try_from(toml_config)
    }

    /// 从 TOML 文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            GuardError::Config(format!("无法读取配置文件 {:?}: {}", path, e))
        })?;
        let mut config = Self::from_toml_str(&content).map_err(|e| {
            let reason = match e {
                GuardError::Config(reason) => reason,
                other => other.to_string(),
            };
            GuardError::Config(format!("配置文件 {:?} 无效: {}", path, reason))
        })?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// 重新读取配置来源；没有文件来源时返回内置默认配置
    pub fn reload_from_source(source: Option<&Path>) -> Result<Self> {
        match source {
            Some(path) => Self::from_toml_file(path),
            None => Ok(Self::default()),
        }
    }

    /// 从环境变量合并配置（MODGUARD_ 前缀）
    pub fn merge_from_env(&mut self) -> Result<()> {
        if let Ok(level) = env::var("MODGUARD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = env::var("MODGUARD_LOG_FORMAT") {
            self.logging.format = Some(format);
        }
        if let Ok(kick) = env::var("MODGUARD_KICK_ON_DETECTION") {
            self.rules.kick_on_mod_detection = parse_env("MODGUARD_KICK_ON_DETECTION", &kick)?;
        }
        if let Ok(delay) = env::var("MODGUARD_FIRST_PASS_DELAY_MS") {
            self.detection.first_pass_delay_ms = parse_env("MODGUARD_FIRST_PASS_DELAY_MS", &delay)?;
        }
        if let Ok(delay) = env::var("MODGUARD_SECOND_PASS_DELAY_MS") {
            self.detection.second_pass_delay_ms =
                parse_env("MODGUARD_SECOND_PASS_DELAY_MS", &delay)?;
        }
        if let Ok(port) = env::var("MODGUARD_METRICS_PORT") {
            self.metrics.port = parse_env("MODGUARD_METRICS_PORT", &port)?;
        }
        Ok(())
    }

    /// 从命令行参数合并配置
    pub fn merge_from_cli(&mut self, cli: &crate::cli::Cli) {
        if let Some(level) = cli.get_log_level() {
            self.logging.level = level;
        }
        if let Some(format) = cli.get_log_format() {
            self.logging.format = Some(format);
        }
        if let Some(file) = &cli.log_file {
            self.logging.file = Some(file.clone());
        }
        if cli.enable_metrics {
            self.metrics.enabled = true;
        }
        if let Some(port) = cli.metrics_port {
            self.metrics.port = port;
        }
    }

    /// 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    pub fn load(cli: &crate::cli::Cli) -> Result<Self> {
        // 1. 配置文件（如果存在）
        let mut config = if let Some(config_file) = &cli.config_file {
            if Path::new(config_file).exists() {
                info!("📄 从配置文件加载: {}", config_file);
                Self::from_toml_file(config_file)?
            } else {
                warn!("⚠️ 配置文件不存在: {}，使用内置默认配置", config_file);
                Self::default()
            }
        } else if Path::new(DEFAULT_CONFIG_FILE).exists() {
            info!("📄 从默认配置文件加载: {}", DEFAULT_CONFIG_FILE);
            Self::from_toml_file(DEFAULT_CONFIG_FILE)?
        } else {
            info!("🔧 未找到配置文件，使用内置默认配置");
            Self::default()
        };

        // 2. 环境变量
        config.merge_from_env()?;

        // 3. 命令行参数（最高优先级）
        config.merge_from_cli(cli);

        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| GuardError::Config(format!("环境变量 {} 的值无效: {}", key, value)))
}

/// 启动早期读取的日志配置（在完整加载配置之前初始化日志）
#[derive(Debug, Clone, Default)]
pub struct EarlyLoggingConfig {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file: Option<String>,
}

/// 快速读取配置文件的 `[logging]` 段，任何错误都退回默认值
pub fn load_early_logging_config(config_file: Option<&str>) -> EarlyLoggingConfig {
    #[derive(Deserialize)]
    struct LoggingOnly {
        logging: Option<TomlLoggingConfig>,
    }

    let path = config_file.unwrap_or(DEFAULT_CONFIG_FILE);
    let Ok(content) = fs::read_to_string(path) else {
        return EarlyLoggingConfig::default();
    };
    match toml::from_str::<LoggingOnly>(&content) {
        Ok(LoggingOnly {
            logging: Some(logging),
        }) => EarlyLoggingConfig {
            level: logging.level,
            format: logging.format,
            file: logging.file,
        },
        _ => EarlyLoggingConfig::default(),
    }
}

/// TOML 配置文件结构（用于反序列化）
#[derive(Debug, Deserialize)]
struct TomlConfig {
    rules: Option<TomlRulesConfig>,
    detection: Option<TomlDetectionConfig>,
    logging: Option<TomlLoggingConfig>,
    metrics: Option<TomlMetricsConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct TomlRulesConfig {
    blocked_mods: Option<Vec<String>>,
    allowed_mod_loaders: Option<Vec<String>>,
    kick_on_mod_detection: Option<bool>,
    kick_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct TomlDetectionConfig {
    first_pass_delay_ms: Option<u64>,
    second_pass_delay_ms: Option<u64>,
    channel_count_heuristic: Option<bool>,
    suspicious_channel_threshold: Option<usize>,
    monitor_after_checked: Option<bool>,
    message_preview_len: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct TomlLoggingConfig {
    level: Option<String>,
    format: Option<String>,
    file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TomlMetricsConfig {
    enabled: Option<bool>,
    host: Option<String>,
    port: Option<u16>,
}

impl TryFrom<TomlConfig> for GuardConfig {
    type Error = GuardError;

    fn try_from(toml: TomlConfig) -> Result<Self> {
        let mut config = Self::default();

        let rules = toml
            .rules
            .ok_or_else(|| GuardError::Config("missing [rules] section".to_string()))?;
        config.rules.blocked_mods = rules
            .blocked_mods
            .ok_or_else(|| GuardError::Config("missing rules.blocked-mods".to_string()))?;
        config.rules.allowed_mod_loaders = rules
            .allowed_mod_loaders
            .ok_or_else(|| GuardError::Config("missing rules.allowed-mod-loaders".to_string()))?;
        if let Some(kick) = rules.kick_on_mod_detection {
            config.rules.kick_on_mod_detection = kick;
        }
        if let Some(message) = rules.kick_message {
            config.rules.kick_message = message;
        }

        if let Some(detection) = toml.detection {
            if let Some(delay) = detection.first_pass_delay_ms {
                config.detection.first_pass_delay_ms = delay;
            }
            if let Some(delay) = detection.second_pass_delay_ms {
                config.detection.second_pass_delay_ms = delay;
            }
            if let Some(enabled) = detection.channel_count_heuristic {
                config.detection.channel_count_heuristic = enabled;
            }
            if let Some(threshold) = detection.suspicious_channel_threshold {
                config.detection.suspicious_channel_threshold = threshold;
            }
            if let Some(monitor) = detection.monitor_after_checked {
                config.detection.monitor_after_checked = monitor;
            }
            if let Some(len) = detection.message_preview_len {
                config.detection.message_preview_len = len;
            }
        }

        if let Some(logging) = toml.logging {
            if let Some(level) = logging.level {
                config.logging.level = level;
            }
            config.logging.format = logging.format;
            config.logging.file = logging.file;
        }

        if let Some(metrics) = toml.metrics {
            if let Some(enabled) = metrics.enabled {
                config.metrics.enabled = enabled;
            }
            if let Some(host) = metrics.host {
                config.metrics.host = host;
            }
            if let Some(port) = metrics.port {
                config.metrics.port = port;
            }
        }

        Ok(config)
    }
}
