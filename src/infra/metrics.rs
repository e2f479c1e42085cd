//! Prometheus 指标：检测轮次、命中、执行结果、探测消息等
//!
//! 通过 `init()` 安装全局 Recorder 并开启 HTTP 抓取端点；
//! 未安装时所有 `record_*` 调用都是空操作（测试中即如此）。

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// 指标名称
const COUNTER_PASSES: &str = "modguard_detection_passes_total";
const COUNTER_DETECTIONS: &str = "modguard_detections_total";
const COUNTER_ENFORCEMENTS: &str = "modguard_enforcements_total";
const COUNTER_PROBES_SENT: &str = "modguard_probes_sent_total";
const COUNTER_PROBES_FAILED: &str = "modguard_probes_failed_total";
const COUNTER_DECODE_ERRORS: &str = "modguard_signal_decode_errors_total";
const GAUGE_TRACKED_CLIENTS: &str = "modguard_tracked_clients";

/// 初始化 Prometheus 指标并在 `listen` 上暴露 /metrics。
/// 仅需在进程内调用一次；重复调用会返回 Err。须在 tokio 运行时内调用。
pub fn init(listen: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Err("metrics already initialized".into());
    }
    PrometheusBuilder::new().with_http_listener(listen).install()?;
    Ok(())
}

/// 记录一次检测轮次（pass = first/second/manual，outcome = 结果）
pub fn record_pass(pass: &'static str, outcome: &'static str) {
    metrics::counter!(COUNTER_PASSES, "pass" => pass, "outcome" => outcome).increment(1);
}

/// 记录一次命中（source = channel/brand/message）
pub fn record_detection(source: &'static str, identifier: &str) {
    metrics::counter!(
        COUNTER_DETECTIONS,
        "source" => source,
        "identifier" => identifier.to_string()
    )
    .increment(1);
}

/// 记录执行结果
pub fn record_enforcement(outcome: &'static str) {
    metrics::counter!(COUNTER_ENFORCEMENTS, "outcome" => outcome).increment(1);
}

/// 记录探测消息发送结果
pub fn record_probe(sent: bool) {
    if sent {
        metrics::counter!(COUNTER_PROBES_SENT).increment(1);
    } else {
        metrics::counter!(COUNTER_PROBES_FAILED).increment(1);
    }
}

/// 记录消息解码失败
pub fn record_decode_error() {
    metrics::counter!(COUNTER_DECODE_ERRORS).increment(1);
}

/// 更新当前跟踪的客户端数（Gauge）
pub fn record_tracked_clients(count: usize) {
    metrics::gauge!(GAUGE_TRACKED_CLIENTS).set(count as f64);
}
