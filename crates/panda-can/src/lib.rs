//! # Panda CAN Controller Layer
//!
//! CAN 控制器抽象层：硬件事件、错误码分类、总线配置和总线健康跟踪。
//!
//! 中断上下文只产生 [`HardwareEvent`]，所有状态变更都在主循环中完成。

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

pub use panda_protocol::CanMessage;

pub mod health;

pub use health::{
    BusHealth, BusHealthTracker, BusState, ErrorThresholds, RecoveryPolicy, Transitions,
};

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockController, MockHandle};

/// 支持的仲裁段速率（kbps）
pub const NOMINAL_SPEEDS_KBPS: [u16; 8] = [10, 20, 50, 100, 125, 250, 500, 1000];

/// 支持的 CAN-FD 数据段速率（kbps）
pub const DATA_SPEEDS_KBPS: [u16; 10] = [10, 20, 50, 100, 125, 250, 500, 1000, 2000, 5000];

/// 默认仲裁段速率
pub const DEFAULT_NOMINAL_KBPS: u16 = 500;

/// 默认数据段速率
pub const DEFAULT_DATA_KBPS: u16 = 2000;

/// CAN 控制器层统一错误类型
#[derive(Error, Debug)]
pub enum CanError {
    #[error("Device Error: {0}")]
    Device(#[from] CanDeviceError),
    #[error("Transmit mailbox full on bus {bus}")]
    TxBusy { bus: u8 },
    #[error("Bus {bus} is off")]
    BusOff { bus: u8 },
    #[error("Invalid bus index: {bus}")]
    InvalidBus { bus: u8 },
    #[error("Unsupported bitrate {kbps} kbps on bus {bus}")]
    UnsupportedBitrate { bus: u8, kbps: u16 },
    #[error("Controller not started")]
    NotStarted,
}

/// 控制器错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanDeviceErrorKind {
    Unknown,
    /// 控制器初始化失败（时钟、引脚或时序配置）
    InitFailed,
    UnsupportedConfig,
    /// 控制器核心需要复位
    CoreReset,
}

/// 结构化控制器错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct CanDeviceError {
    pub kind: CanDeviceErrorKind,
    pub message: String,
}

impl CanDeviceError {
    pub fn new(kind: CanDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, CanDeviceErrorKind::InitFailed)
    }
}

impl From<&str> for CanDeviceError {
    fn from(message: &str) -> Self {
        Self::new(CanDeviceErrorKind::Unknown, message)
    }
}

/// 控制器上报的最近一次错误码（协议错误状态寄存器 LEC 字段）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum CanErrorCode {
    #[default]
    None = 0,
    Stuff = 1,
    Form = 2,
    Ack = 3,
    Bit1 = 4,
    Bit0 = 5,
    Crc = 6,
    /// 控制器离线（显式 Bus-Off 信号）
    Offline = 7,
}

/// 错误码的分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 无错误
    None,
    /// 发送错误（TEC += 8）
    Transmit,
    /// 接收错误（REC += 1）
    Receive,
    /// 显式 Bus-Off
    BusOff,
}

impl CanErrorCode {
    pub fn class(self) -> ErrorClass {
        match self {
            CanErrorCode::None => ErrorClass::None,
            CanErrorCode::Ack | CanErrorCode::Bit0 | CanErrorCode::Bit1 => ErrorClass::Transmit,
            CanErrorCode::Stuff | CanErrorCode::Form | CanErrorCode::Crc => ErrorClass::Receive,
            CanErrorCode::Offline => ErrorClass::BusOff,
        }
    }
}

/// 单条总线的配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusSettings {
    pub nominal_kbps: u16,
    pub data_kbps: u16,
    pub fd_enabled: bool,
    pub brs_enabled: bool,
    /// Bosch 非 ISO CAN-FD（无 stuff-bit 计数）
    pub non_iso: bool,
    pub loopback: bool,
    /// 只听模式（不发送 ACK，不发送报文）
    pub silent: bool,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            nominal_kbps: DEFAULT_NOMINAL_KBPS,
            data_kbps: DEFAULT_DATA_KBPS,
            fd_enabled: false,
            brs_enabled: false,
            non_iso: false,
            loopback: false,
            silent: false,
        }
    }
}

/// 校验仲裁段速率
pub fn validate_nominal_speed(bus: u8, kbps: u16) -> Result<(), CanError> {
    if NOMINAL_SPEEDS_KBPS.contains(&kbps) {
        Ok(())
    } else {
        Err(CanError::UnsupportedBitrate { bus, kbps })
    }
}

/// 校验数据段速率
pub fn validate_data_speed(bus: u8, kbps: u16) -> Result<(), CanError> {
    if DATA_SPEEDS_KBPS.contains(&kbps) {
        Ok(())
    } else {
        Err(CanError::UnsupportedBitrate { bus, kbps })
    }
}

/// 中断上下文产生的硬件事件
///
/// 通过有界通道送入主循环，中断侧只做 `try_send`，从不阻塞。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareEvent {
    /// 收到一帧（`bus` 已填入报文）
    Frame(CanMessage),
    /// 协议错误
    Error { bus: u8, code: CanErrorCode },
    /// 仲裁失败
    ArbitrationLost { bus: u8 },
    /// CAN-FD 数据段错误信号
    FdErrorSignalling { bus: u8 },
    /// 控制器报告已从 Bus-Off 恢复
    BusOffRecovered { bus: u8 },
}

impl HardwareEvent {
    pub fn bus(&self) -> u8 {
        match self {
            HardwareEvent::Frame(msg) => msg.bus(),
            HardwareEvent::Error { bus, .. }
            | HardwareEvent::ArbitrationLost { bus }
            | HardwareEvent::FdErrorSignalling { bus }
            | HardwareEvent::BusOffRecovered { bus } => *bus,
        }
    }
}

/// CAN 控制器（单条总线）
///
/// 接收方向不在 trait 中：控制器中断把帧作为 [`HardwareEvent::Frame`] 推入通道。
pub trait CanController: Send {
    /// 控制器对应的总线编号
    fn bus(&self) -> u8;

    /// 应用总线配置（速率、FD、回环、只听）
    fn configure(&mut self, settings: &BusSettings) -> Result<(), CanError>;

    /// 发送一帧
    ///
    /// 邮箱已满时返回 [`CanError::TxBusy`]，调用方应保留报文稍后重试。
    fn transmit(&mut self, msg: &CanMessage) -> Result<(), CanError>;

    /// 复位控制器核心
    fn reset(&mut self) -> Result<(), CanError> {
        Ok(())
    }
}
