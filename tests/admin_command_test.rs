use std::fs;
use std::sync::Arc;

use modguard::config::GuardConfig;
use modguard::handler::RELOAD_PERMISSION;
use modguard::infra::{MemoryHost, ServerHost};
use modguard::security::DetectionPhase;
use modguard::{CommandContext, CommandSender, GuardServer};

const INITIAL_CONFIG: &str = r#"
[rules]
blocked-mods = ["wurst", "xray"]
allowed-mod-loaders = ["fabric"]
kick-on-mod-detection = true
kick-message = "&cNo {mod} here"
"#;

const UPDATED_CONFIG: &str = r#"
[rules]
blocked-mods = ["baritone"]
allowed-mod-loaders = ["fabric", "forge"]
kick-on-mod-detection = false
"#;

fn server_from_file(path: &std::path::Path) -> (Arc<MemoryHost>, GuardServer) {
    let config = GuardConfig::from_toml_file(path).unwrap();
    let host = Arc::new(MemoryHost::new());
    let server = GuardServer::new(config, host.clone()).unwrap();
    server.enable();
    (host, server)
}

fn console(line: &str) -> CommandContext {
    CommandContext::parse(CommandSender::Console, line)
}

#[tokio::test]
async fn reload_swaps_rules_and_clears_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("modguard.toml");
    fs::write(&path, INITIAL_CONFIG).unwrap();
    let (host, server) = server_from_file(&path);

    let id = host.connect("Steve", None);
    server.handle_connect(id);
    host.add_channel(id, "baritone:settings");
    // 旧规则下 baritone 不在黑名单
    assert_eq!(server.handle_channel_register(id, "baritone:settings").await, None);
    assert!(server.service().registry().contains(id));

    fs::write(&path, UPDATED_CONFIG).unwrap();
    let reply = server.execute_command(console("reload")).await;
    assert!(reply.contains("reloaded"), "{}", reply.text());

    let rules = server.service().rules().snapshot();
    assert_eq!(rules.denylist(), &["baritone".to_string()]);
    assert_eq!(rules.allowlist(), &["fabric".to_string(), "forge".to_string()]);
    assert!(!rules.enforcement_enabled());
    // 仍在等待检测的在线玩家换成全新状态继续
    let state = server.service().registry().get(id).unwrap();
    assert_eq!(state.phase, DetectionPhase::Unchecked);
    assert_eq!(server.service().registry().len(), 1);
    assert!(server.service().registry().detected_identifiers().is_empty());
    // 频道已重新注册
    assert_eq!(host.outgoing_channels().len(), 11);
    assert!(host.incoming_channels().contains(&"minecraft:brand".to_string()));

    let reply = server.execute_command(console("status")).await;
    assert!(reply.contains("Allowed mod loaders: fabric, forge"));
    assert!(reply.contains("Blocked mods: 1"));
    assert!(reply.contains("Kick on detection: false"));
}

#[tokio::test]
async fn failed_reload_keeps_old_rules() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("modguard.toml");
    fs::write(&path, INITIAL_CONFIG).unwrap();
    let (host, server) = server_from_file(&path);

    let id = host.connect("Steve", None);
    server.handle_connect(id);

    fs::write(&path, "[rules]\nblocked-mods = [\"baritone\"]\n").unwrap();
    let reply = server.execute_command(console("reload")).await;
    assert!(reply.contains("Failed to reload configuration"), "{}", reply.text());

    let rules = server.service().rules().snapshot();
    assert_eq!(rules.denylist(), &["wurst".to_string(), "xray".to_string()]);
    // 状态没有被清空
    assert!(server.service().registry().contains(id));
}

#[tokio::test]
async fn reload_requires_permission_for_players() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("modguard.toml");
    fs::write(&path, INITIAL_CONFIG).unwrap();
    let (host, server) = server_from_file(&path);
    let id = host.connect("Alex", None);

    let ctx = CommandContext::parse(CommandSender::Client(id), "reload");
    let reply = server.execute_command(ctx.clone()).await;
    assert_eq!(reply.text(), "You don't have permission to use this command.");

    host.grant(id, RELOAD_PERMISSION);
    let reply = server.execute_command(ctx).await;
    assert!(reply.contains("reloaded"));

    // status / check / scan 不需要权限
    let reply = server
        .execute_command(CommandContext::parse(CommandSender::Client(id), "status"))
        .await;
    assert!(reply.contains("ModGuard Status"));
}

#[tokio::test]
async fn check_reports_player_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("modguard.toml");
    fs::write(&path, INITIAL_CONFIG).unwrap();
    let (host, server) = server_from_file(&path);

    let id = host.connect("Steve", Some("fabric"));
    server.handle_connect(id);
    host.add_channel(id, "fabric:login");
    host.add_channel(id, "journeymap:sync");
    server.handle_channel_register(id, "fabric:login").await;

    let reply = server.execute_command(console("check steve")).await;
    assert!(reply.contains("=== Mod Check: Steve ==="));
    assert!(reply.contains("Checked: false"));
    assert!(reply.contains("Modded: true"));
    assert!(reply.contains("Flagged: false"));
    assert!(reply.contains("Channels: fabric:login, journeymap:sync"));

    let reply = server.execute_command(console("check nobody")).await;
    assert_eq!(reply.text(), "Player not found.");

    let reply = server.execute_command(console("check")).await;
    assert!(reply.text().starts_with("Usage: check <player>"));
}

#[tokio::test]
async fn scan_rescans_unchecked_players() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("modguard.toml");
    fs::write(&path, INITIAL_CONFIG).unwrap();
    let (host, server) = server_from_file(&path);

    let clean = host.connect("Steve", Some("vanilla"));
    let cheater = host.connect("Alex", None);
    host.add_channel(cheater, "wurst:main");

    let reply = server.execute_command(console("scan")).await;
    assert!(
        reply.contains("Scanned 2 player(s): 1 clean, 1 flagged, 0 skipped."),
        "{}",
        reply.text()
    );
    assert!(host.is_online(clean));
    assert!(!host.is_online(cheater));
    let kick = &host.disconnects()[0];
    assert!(kick.message.starts_with("§cNo wurst here"));
    assert!(kick.message.contains("§7(Reason: channel: wurst:main)"));

    let reply = server.execute_command(console("status")).await;
    assert!(reply.contains("Checked players: 1"));
    assert!(reply.contains("Flagged players: 1"));
    assert!(reply.contains("Detected blocked mods: wurst"));
}

#[tokio::test]
async fn scan_single_player_with_reset() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("modguard.toml");
    fs::write(&path, INITIAL_CONFIG).unwrap();
    let (host, server) = server_from_file(&path);

    let id = host.connect("Steve", None);
    let reply = server.execute_command(console("scan Steve")).await;
    assert_eq!(reply.text(), "Steve is clean.");

    // 已检测完成的玩家不会被批量扫描
    let reply = server.execute_command(console("scan")).await;
    assert!(reply.contains("Scanned 0 player(s)"));

    host.set_brand(id, "xray-client");
    let reply = server.execute_command(console("scan Steve --reset")).await;
    assert_eq!(reply.text(), "Steve was flagged for xray.");
    assert_eq!(host.disconnect_count(id), 1);
}

#[tokio::test]
async fn unknown_subcommand_prints_usage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("modguard.toml");
    fs::write(&path, INITIAL_CONFIG).unwrap();
    let (_host, server) = server_from_file(&path);

    let reply = server.execute_command(console("frobnicate")).await;
    assert!(reply.contains("Usage: /modguard <subcommand>"));
    assert!(reply.contains("/modguard reload"));
    assert!(reply.contains("/modguard scan"));
}
