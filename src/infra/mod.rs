// Infrastructure layer - 基础设施层
// 负责与宿主服务器交互的接口、内存宿主实现以及监控指标

pub mod host;
pub mod memory_host;
pub mod metrics;

pub use host::{ClientId, ServerHost};
pub use memory_host::{DisconnectRecord, MemoryHost, SentMessage, SimulatedClient};
