//! USB 层错误类型

use crate::state::UsbState;
use panda_driver::DriverError;
use panda_protocol::ProtocolError;
use panda_safety::SafetyError;
use thiserror::Error;

/// USB 分发器错误
///
/// 控制请求返回错误时，真实设备会对该请求回 STALL，通道本身不受影响。
#[derive(Error, Debug)]
pub enum UsbError {
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Safety error: {0}")]
    Safety(#[from] SafetyError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 设备未配置（未连接）
    #[error("Device not configured (state {state:?})")]
    NotConfigured { state: UsbState },

    /// 请求参数无效
    #[error("Invalid parameter {name}: {value}")]
    InvalidParam { name: &'static str, value: u16 },
}
