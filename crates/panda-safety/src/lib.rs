//! # Panda Safety
//!
//! 安全引擎：每一帧出站、入站报文都经过当前安全模式的策略判定。
//!
//! ## 模块
//!
//! - `engine`: [`SafetyEngine`]，模式切换、钩子调用、计数器和点火推断
//! - `heartbeat`: 主机心跳看门狗
//! - `policy`: [`SafetyHooks`] trait、编译期注册表和车型策略
//! - `mode`: 安全模式编号
//!
//! ## 失效安全
//!
//! - 上电默认 `NO_OUTPUT`
//! - 未知模式编号被拒绝，引擎保持原模式
//! - 心跳超时强制回到 `NO_OUTPUT`，直到主机恢复心跳

pub mod counters;
pub mod engine;
pub mod error;
pub mod heartbeat;
pub mod mode;
pub mod policy;

pub use counters::SafetyCounters;
pub use engine::{SafetyConfig, SafetyEngine, SafetyStatus};
pub use error::SafetyError;
pub use heartbeat::{DEFAULT_HEARTBEAT_TIMEOUT, MIN_HEARTBEAT_TIMEOUT};
pub use mode::SafetyMode;
pub use policy::SafetyHooks;
