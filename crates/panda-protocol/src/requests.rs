//! 控制通道请求定义
//!
//! USB 控制传输 = 操作码 + `value`/`index` 两个 u16 参数 + 可选数据阶段。
//! `request_type` 的方向位决定同一操作码是"设置"还是"读取"。

use crate::{ProtocolError, get_u16_le, put_u16_le};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 主机 → 设备（厂商请求，OUT）
pub const REQUEST_TYPE_OUT: u8 = 0x40;

/// 设备 → 主机（厂商请求，IN）
pub const REQUEST_TYPE_IN: u8 = 0xC0;

/// `request_type` 中的方向位
pub const REQUEST_DIRECTION_MASK: u8 = 0x80;

/// CAN 报文线格式版本
pub const CAN_PACKET_VERSION: u16 = 4;

/// 健康包版本
pub const HEALTH_PACKET_VERSION: u16 = 14;

/// CAN 健康包版本
pub const CAN_HEALTH_PACKET_VERSION: u16 = 5;

/// 控制协议版本（主版本.次版本）
pub const PROTOCOL_VERSION: u16 = 0x0100;

/// 版本包长度
pub const PACKET_VERSIONS_SIZE: usize = 8;

/// "全部总线"哨兵值（用于清空环形缓冲区）
pub const ALL_BUSES: u16 = 0xFFFF;

/// 控制操作码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ControlOpcode {
    /// 重置通信状态
    Reset = 0xC0,
    DeviceId = 0xC3,
    InterruptLoad = 0xC4,
    HarnessStatus = 0xC5,
    FirmwareVersion = 0xD0,
    /// 进入固件升级模式
    EnterBootloader = 0xD1,
    Health = 0xD2,
    PacketVersions = 0xD3,
    SafetyMode = 0xDC,
    CanSpeed = 0xDD,
    CanHealth = 0xDE,
    UartBaud = 0xE1,
    Loopback = 0xE5,
    Silent = 0xE6,
    RealTimeClock = 0xA0,
    Heartbeat = 0xF1,
    /// value = 总线编号，`0xFFFF` 表示全部
    ClearRingBuffers = 0xF2,
    DisableHeartbeat = 0xF8,
    FdDataSpeed = 0xF9,
    FdStatus = 0xFA,
    FdNonIso = 0xFB,
}

/// 请求方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDirection {
    /// 主机写入（设置）
    Out,
    /// 主机读取（获取）
    In,
}

impl RequestDirection {
    pub fn from_request_type(request_type: u8) -> Self {
        if request_type & REQUEST_DIRECTION_MASK != 0 {
            RequestDirection::In
        } else {
            RequestDirection::Out
        }
    }
}

/// 控制请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    /// OUT 方向的数据阶段
    pub data: Vec<u8>,
}

impl ControlRequest {
    /// 主机 → 设备请求
    pub fn out(opcode: ControlOpcode, value: u16, index: u16) -> Self {
        Self {
            request_type: REQUEST_TYPE_OUT,
            request: opcode.into(),
            value,
            index,
            data: Vec::new(),
        }
    }

    /// 设备 → 主机请求
    pub fn input(opcode: ControlOpcode, value: u16, index: u16) -> Self {
        Self {
            request_type: REQUEST_TYPE_IN,
            request: opcode.into(),
            value,
            index,
            data: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: &[u8]) -> Self {
        self.data = data.to_vec();
        self
    }

    pub fn direction(&self) -> RequestDirection {
        RequestDirection::from_request_type(self.request_type)
    }

    /// 解析操作码
    pub fn opcode(&self) -> Result<ControlOpcode, ProtocolError> {
        ControlOpcode::try_from(self.request).map_err(|_| ProtocolError::UnknownRequest {
            request: self.request,
        })
    }
}

/// 包版本集合（操作码 0xD3 的响应）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketVersions {
    pub can_packet: u16,
    pub health_packet: u16,
    pub can_health_packet: u16,
    pub protocol: u16,
}

impl Default for PacketVersions {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl PacketVersions {
    /// 本固件的版本
    pub const CURRENT: Self = Self {
        can_packet: CAN_PACKET_VERSION,
        health_packet: HEALTH_PACKET_VERSION,
        can_health_packet: CAN_HEALTH_PACKET_VERSION,
        protocol: PROTOCOL_VERSION,
    };

    pub fn pack(&self) -> [u8; PACKET_VERSIONS_SIZE] {
        let mut buf = [0u8; PACKET_VERSIONS_SIZE];
        put_u16_le(&mut buf, 0, self.can_packet);
        put_u16_le(&mut buf, 2, self.health_packet);
        put_u16_le(&mut buf, 4, self.can_health_packet);
        put_u16_le(&mut buf, 6, self.protocol);
        buf
    }

    pub fn unpack(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() != PACKET_VERSIONS_SIZE {
            return Err(ProtocolError::InvalidLength {
                expected: PACKET_VERSIONS_SIZE,
                actual: buf.len(),
            });
        }
        Ok(Self {
            can_packet: get_u16_le(buf, 0),
            health_packet: get_u16_le(buf, 2),
            can_health_packet: get_u16_le(buf, 4),
            protocol: get_u16_le(buf, 6),
        })
    }

    /// 校验设备版本与本端期望一致
    ///
    /// 任一不一致都是会话级致命错误，主机应当拒绝继续通信。
    pub fn verify(&self, expected: &PacketVersions) -> Result<(), ProtocolError> {
        let checks = [
            ("can_packet", expected.can_packet, self.can_packet),
            ("health_packet", expected.health_packet, self.health_packet),
            (
                "can_health_packet",
                expected.can_health_packet,
                self.can_health_packet,
            ),
            ("protocol", expected.protocol, self.protocol),
        ];
        for (packet, expected, actual) in checks {
            if expected != actual {
                return Err(ProtocolError::VersionMismatch {
                    packet,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }
}
