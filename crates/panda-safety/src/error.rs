//! 安全层错误类型定义

use std::time::Duration;
use thiserror::Error;

/// 安全引擎错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SafetyError {
    /// 未注册的安全模式（引擎保持原模式）
    #[error("Unknown safety mode: {mode}")]
    UnknownMode { mode: u16 },

    /// 心跳丢失期间只允许选择 NO_OUTPUT
    #[error("Heartbeat lost: only NO_OUTPUT may be selected until the host resumes heartbeats")]
    HeartbeatLost,

    /// 心跳超时低于下限
    #[error("Heartbeat timeout {requested:?} below minimum {minimum:?}")]
    TimeoutTooShort {
        requested: Duration,
        minimum: Duration,
    },
}
