//! 驱动层错误类型定义

use crate::config::ConfigError;
use panda_can::CanError;
use panda_protocol::CodecError;
use panda_safety::SafetyError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// CAN 控制器错误
    #[error("CAN controller error: {0}")]
    Can(#[from] CanError),

    /// 安全引擎错误
    #[error("Safety error: {0}")]
    Safety(#[from] SafetyError),

    /// 报文编解码错误
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// 配置错误
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// 队列已满（新报文被丢弃）
    #[error("Queue full on bus {bus}")]
    QueueFull { bus: u8 },

    /// 总线处于 Bus-Off，拒绝新的发送
    #[error("Bus {bus} is off, transmission refused")]
    BusOff { bus: u8 },

    /// 总线处于只听模式
    #[error("Bus {bus} is silent, transmission refused")]
    BusSilent { bus: u8 },

    /// 总线编号无效或未挂接控制器
    #[error("Invalid bus: {bus}")]
    InvalidBus { bus: u8 },
}
