// 业务服务层模块
pub mod guard_service;

pub use guard_service::{ClientReport, GuardService, ReloadSummary, ScanSummary, StatusReport};
