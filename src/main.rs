use anyhow::{Context, Result};
use modguard::{
    cli::{Cli, Commands, SignalKind},
    config::{self, GuardConfig, DEFAULT_CONFIG_TOML},
    console::Console,
    infra::{metrics, MemoryHost},
    logging,
    security::{classify, RuleSet, Signal},
    GuardServer,
};
use std::fs;
use std::path::Path;
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载 .env 文件（如果存在）
    let _ = dotenvy::dotenv();

    // 解析命令行参数
    let cli = Cli::parse();

    // 处理子命令
    if let Some(command) = &cli.command {
        match command {
            Commands::GenerateConfig { path } => {
                return generate_config(path);
            }
            Commands::ValidateConfig { path } => {
                return validate_config(path);
            }
            Commands::ShowConfig => {
                return show_config(&cli);
            }
            Commands::Classify { kind, value } => {
                return classify_value(&cli, *kind, value);
            }
        }
    }

    // 快速读取配置文件的 [logging] 段（不加载完整配置）
    let early_log = config::load_early_logging_config(cli.config_file.as_deref());

    // 合并日志配置（优先级：CLI > 配置文件 > 默认值）
    let log_level = cli
        .get_log_level()
        .or(early_log.level)
        .unwrap_or_else(|| "info".to_string());
    let log_format = cli.get_log_format().or(early_log.format);
    let log_file = cli.log_file.as_deref().or(early_log.file.as_deref());

    let _log_guard = logging::init_logging(&log_level, log_format.as_deref(), log_file, cli.quiet)?;

    tracing::info!("🚀 ModGuard starting...");

    // 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    let config = GuardConfig::load(&cli).context("加载配置失败")?;

    if cli.dev {
        tracing::info!("🔧 开发模式已启用");
    }

    // 显示配置信息
    tracing::info!("📊 ModGuard Configuration:");
    tracing::info!("  - Blocked mods: {}", config.rules.blocked_mods.join(", "));
    tracing::info!("  - Allowed loaders: {}", config.rules.allowed_mod_loaders.join(", "));
    tracing::info!("  - Kick on detection: {}", config.rules.kick_on_mod_detection);
    tracing::info!(
        "  - Pass delays: {}ms / {}ms",
        config.detection.first_pass_delay_ms,
        config.detection.second_pass_delay_ms
    );
    tracing::info!("  - Log Level: {}", config.logging.level);
    if let Some(f) = log_file {
        tracing::info!("  - Log File: {}", f);
    }

    if config.metrics.enabled {
        let listen = config.metrics.listen_addr().context("监控地址无效")?;
        match metrics::init(listen) {
            Ok(()) => tracing::info!("📊 Prometheus 指标已启用: http://{}/metrics", listen),
            Err(e) => tracing::warn!("⚠️ Prometheus 指标启动失败: {}", e),
        }
    }

    // 创建服务器（规则无效时打印错误并退出）
    let host = Arc::new(MemoryHost::new());
    let server = match GuardServer::new(config, host.clone()) {
        Ok(server) => Arc::new(server),
        Err(e) => {
            tracing::error!("❌ ModGuard 初始化失败: {}", e);
            tracing::error!("💡 请检查配置文件中的 [rules] 段后重试");
            process::exit(1);
        }
    };
    server.enable();

    // 运行控制台
    let console = Console::new(host, server.clone());
    if let Err(e) = console.run().await {
        tracing::error!("❌ 控制台运行失败: {}", e);
    }

    server.disable();
    tracing::info!("👋 ModGuard stopped");
    Ok(())
}

/// 生成默认配置文件
fn generate_config(path: &str) -> Result<()> {
    if Path::new(path).exists() {
        anyhow::bail!("配置文件已存在，不会覆盖: {}", path);
    }
    fs::write(path, DEFAULT_CONFIG_TOML).with_context(|| format!("无法写入配置文件: {}", path))?;

    println!("✅ 配置文件已生成: {}", path);
    Ok(())
}

/// 验证配置文件
fn validate_config(path: &str) -> Result<()> {
    let config = GuardConfig::from_toml_file(path)
        .with_context(|| format!("配置文件验证失败: {}", path))?;
    let rules = RuleSet::from_config(&config.rules)
        .with_context(|| format!("规则验证失败: {}", path))?;

    println!("✅ 配置文件有效: {}", path);
    println!("📊 配置摘要:");
    println!("  - Blocked mods: {}", rules.denylist().len());
    println!("  - Allowed loaders: {}", rules.allowlist().len());
    println!("  - Kick on detection: {}", rules.enforcement_enabled());
    println!(
        "  - Pass delays: {}ms / {}ms",
        config.detection.first_pass_delay_ms, config.detection.second_pass_delay_ms
    );

    Ok(())
}

/// 显示最终配置（合并后的配置）
fn show_config(cli: &Cli) -> Result<()> {
    // 初始化基本日志（用于显示配置）
    let _guard = logging::init_logging("info", None, None, false)?;

    let config = GuardConfig::load(cli).context("加载配置失败")?;

    println!("📊 最终配置（合并后的配置）:");
    println!("{}", serde_json::to_string_pretty(&config)?);

    Ok(())
}

/// 用当前规则判定单个信号
fn classify_value(cli: &Cli, kind: SignalKind, value: &str) -> Result<()> {
    let _guard = logging::init_logging("warn", None, None, false)?;

    let config = GuardConfig::load(cli).context("加载配置失败")?;
    let rules = RuleSet::from_config(&config.rules).context("规则无效")?;

    let signal = match kind {
        SignalKind::Channel => Signal::ChannelName(value),
        SignalKind::Brand => Signal::ClientBrand(value),
        SignalKind::Message => Signal::MessageContent {
            channel: "console:input",
            payload: value.as_bytes(),
        },
    };
    let verdict = classify(&signal, &rules);

    if verdict.is_positive() {
        println!(
            "🚩 {} blocked: {}",
            signal.source(),
            verdict.matched_identifier.unwrap_or_default()
        );
    } else if let Some(loader) = verdict.allowed_loader {
        println!("🧩 {} allowed loader: {}", signal.source(), loader);
    } else {
        println!("✅ {} clean", signal.source());
    }
    Ok(())
}
