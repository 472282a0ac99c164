//! # Panda Protocol
//!
//! CAN/CAN-FD 桥接设备的线协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `dlc`: DLC ↔ 数据长度查找表
//! - `message`: 内存中的 CAN 报文表示 [`CanMessage`]
//! - `codec`: 6 字节头 + 0~64 字节负载的线格式编解码
//! - `health`: 健康包 / CAN 健康包的定长二进制布局
//! - `requests`: 控制通道操作码与版本常量
//!
//! ## 字节序
//!
//! 所有多字节字段均为小端（little-endian），按固定偏移读写，
//! 不依赖任何内存布局（`repr(C)` / packed）。

pub mod codec;
pub mod dlc;
pub mod health;
pub mod message;
pub mod requests;

// 重新导出常用类型
pub use codec::*;
pub use dlc::*;
pub use health::*;
pub use message::*;
pub use requests::*;

use thiserror::Error;

/// 设备支持的 CAN 总线数量
pub const BUS_COUNT: usize = 3;

/// CAN-FD 最大数据长度
pub const CAN_MAX_DATA_LEN: usize = 64;

/// 标准帧 ID 掩码（11-bit）
pub const CAN_SFF_MASK: u32 = 0x0000_07FF;

/// 扩展帧 ID 掩码（29-bit）
pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;

/// 协议层错误类型
///
/// 覆盖健康包解析、版本校验等非 CAN 报文的结构化数据错误。
/// CAN 报文本身的编解码错误见 [`CodecError`]。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid packet length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Unknown control request: 0x{request:02X}")]
    UnknownRequest { request: u8 },

    #[error("Version mismatch for {packet}: expected {expected}, got {actual}")]
    VersionMismatch {
        packet: &'static str,
        expected: u16,
        actual: u16,
    },

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: &'static str, value: u32 },
}

// 小端字节序读写工具
//
// 所有结构化包都通过这些函数按偏移读写，保证与目标平台的结构体打包规则无关。

/// 在 `offset` 处写入小端 u16
pub fn put_u16_le(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// 在 `offset` 处写入小端 u32
pub fn put_u32_le(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// 从 `offset` 处读取小端 u16
pub fn get_u16_le(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

/// 从 `offset` 处读取小端 u32
pub fn get_u32_le(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}
