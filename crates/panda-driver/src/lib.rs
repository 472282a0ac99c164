//! 驱动层模块
//!
//! 本模块把协议、控制器和安全引擎组装成桥接核心：
//! - 设备级共享上下文（显式构造，无全局状态）
//! - 每条总线的 RX/TX 定长队列（满时丢弃新报文）
//! - 总线管理器：安全判定、回显、转发、FD/BRS 自动升级
//! - 主循环管线：中断事件通道、恢复定时器、心跳看门狗、TX 发送预算
//! - TOML 配置和原子指标
//!
//! # 时间
//!
//! 所有 `now` 参数都是自启动起的单调时间（`Duration`），由调用方提供。

mod builder;
pub mod config;
pub mod context;
mod error;
pub mod manager;
pub mod metrics;
pub mod pipeline;
pub mod queue;

pub use builder::{Bridge, BridgeBuilder};
pub use config::{BridgeConfig, BusConfig, ConfigError, HeartbeatConfig, RecoveryConfig};
pub use context::BridgeContext;
pub use error::DriverError;
pub use manager::{BusManager, TxOrigin, TxOutcome};
pub use metrics::{BridgeMetrics, MetricsSnapshot};
pub use pipeline::{IsrProducer, Pipeline, PipelineConfig, PollReport};
pub use queue::RingQueue;
