//! 健康包与 CAN 健康包
//!
//! 两种包都是定长、小端、按固定偏移读写的二进制结构。
//! 字段偏移是协议的一部分，任何改动都需要同时提升对应的版本号
//! （见 [`HEALTH_PACKET_VERSION`](crate::HEALTH_PACKET_VERSION) /
//! [`CAN_HEALTH_PACKET_VERSION`](crate::CAN_HEALTH_PACKET_VERSION)）。

use crate::{BUS_COUNT, ProtocolError, get_u16_le, get_u32_le, put_u16_le, put_u32_le};
use bilge::prelude::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 健康包长度
pub const HEALTH_PACKET_SIZE: usize = 54;

/// CAN 健康包长度
pub const CAN_HEALTH_PACKET_SIZE: usize = 48;

/// 点火状态位域（健康包 byte 9）
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default)]
pub struct IgnitionFlags {
    pub line: bool, // Bit 0: 点火线
    pub can: bool,  // Bit 1: 由 CAN 报文推断的点火状态
    pub reserved: u6,
}

/// CAN 健康标志位域（CAN 健康包 byte 1）
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default)]
pub struct CanHealthFlags {
    pub warning: bool,          // Bit 0: 错误计数 ≥ 96
    pub passive: bool,          // Bit 1: Error Passive
    pub bus_off: bool,          // Bit 2: Bus-Off
    pub fd_enabled: bool,       // Bit 3
    pub brs_enabled: bool,      // Bit 4
    pub repeated_bus_off: bool, // Bit 5: 短时间内重复 Bus-Off
    pub reserved: u2,
}

/// 总线状态线编码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum BusStateCode {
    #[default]
    Active = 0,
    Passive = 1,
    BusOff = 2,
}

/// 设备健康包（版本 14，54 字节）
///
/// | 偏移 | 字段 | 类型 |
/// |------|------|------|
/// | 0 | voltage_mv | u32 |
/// | 4 | current_ma | u32 |
/// | 8 | harness_status | u8 |
/// | 9 | ignition flags | u8 |
/// | 10 | safety_mode | u8 |
/// | 11 | safety_param | u16 |
/// | 13 | tx_blocked | u32 |
/// | 17 | tx_allowed | u32 |
/// | 21 | rx_invalid | u32 |
/// | 25 | rx_valid | u32 |
/// | 29 | heartbeat_lost | u32 |
/// | 33 | uptime_s | u32 |
/// | 37 | sbu1_mv | u16 |
/// | 39 | sbu2_mv | u16 |
/// | 41 | interrupt_load | u8 |
/// | 42 | bus_errors\[3\] | u32 × 3 |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HealthPacket {
    pub voltage_mv: u32,
    pub current_ma: u32,
    pub harness_status: u8,
    pub ignition_line: bool,
    pub ignition_can: bool,
    pub safety_mode: u8,
    pub safety_param: u16,
    pub tx_blocked: u32,
    pub tx_allowed: u32,
    pub rx_invalid: u32,
    pub rx_valid: u32,
    pub heartbeat_lost: u32,
    pub uptime_s: u32,
    pub sbu1_mv: u16,
    pub sbu2_mv: u16,
    pub interrupt_load: u8,
    pub bus_errors: [u32; BUS_COUNT],
}

impl HealthPacket {
    pub fn pack(&self) -> [u8; HEALTH_PACKET_SIZE] {
        let mut buf = [0u8; HEALTH_PACKET_SIZE];
        put_u32_le(&mut buf, 0, self.voltage_mv);
        put_u32_le(&mut buf, 4, self.current_ma);
        buf[8] = self.harness_status;

        let mut ignition = IgnitionFlags::from(u8::new(0));
        ignition.set_line(self.ignition_line);
        ignition.set_can(self.ignition_can);
        buf[9] = u8::from(ignition).value();

        buf[10] = self.safety_mode;
        put_u16_le(&mut buf, 11, self.safety_param);
        put_u32_le(&mut buf, 13, self.tx_blocked);
        put_u32_le(&mut buf, 17, self.tx_allowed);
        put_u32_le(&mut buf, 21, self.rx_invalid);
        put_u32_le(&mut buf, 25, self.rx_valid);
        put_u32_le(&mut buf, 29, self.heartbeat_lost);
        put_u32_le(&mut buf, 33, self.uptime_s);
        put_u16_le(&mut buf, 37, self.sbu1_mv);
        put_u16_le(&mut buf, 39, self.sbu2_mv);
        buf[41] = self.interrupt_load;
        for (i, count) in self.bus_errors.iter().enumerate() {
            put_u32_le(&mut buf, 42 + i * 4, *count);
        }
        buf
    }

    pub fn unpack(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() != HEALTH_PACKET_SIZE {
            return Err(ProtocolError::InvalidLength {
                expected: HEALTH_PACKET_SIZE,
                actual: buf.len(),
            });
        }

        let ignition = IgnitionFlags::from(u8::new(buf[9]));
        let mut bus_errors = [0u32; BUS_COUNT];
        for (i, count) in bus_errors.iter_mut().enumerate() {
            *count = get_u32_le(buf, 42 + i * 4);
        }

        Ok(Self {
            voltage_mv: get_u32_le(buf, 0),
            current_ma: get_u32_le(buf, 4),
            harness_status: buf[8],
            ignition_line: ignition.line(),
            ignition_can: ignition.can(),
            safety_mode: buf[10],
            safety_param: get_u16_le(buf, 11),
            tx_blocked: get_u32_le(buf, 13),
            tx_allowed: get_u32_le(buf, 17),
            rx_invalid: get_u32_le(buf, 21),
            rx_valid: get_u32_le(buf, 25),
            heartbeat_lost: get_u32_le(buf, 29),
            uptime_s: get_u32_le(buf, 33),
            sbu1_mv: get_u16_le(buf, 37),
            sbu2_mv: get_u16_le(buf, 39),
            interrupt_load: buf[41],
            bus_errors,
        })
    }
}

/// 单总线 CAN 健康包（版本 5，48 字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CanHealthPacket {
    pub bus_state: BusStateCode,
    pub warning: bool,
    pub passive: bool,
    pub bus_off: bool,
    pub fd_enabled: bool,
    pub brs_enabled: bool,
    pub repeated_bus_off: bool,
    pub last_error: u8,
    pub tx_errors: u32,
    pub rx_errors: u32,
    pub tx_overflow: u32,
    pub rx_overflow: u32,
    pub bus_off_count: u32,
    pub arbitration_lost: u32,
    pub fd_frames: u32,
    pub brs_frames: u32,
    pub fd_error_signalling: u32,
    pub recoveries: u32,
    pub total_tx: u32,
}

impl CanHealthPacket {
    pub fn pack(&self) -> [u8; CAN_HEALTH_PACKET_SIZE] {
        let mut buf = [0u8; CAN_HEALTH_PACKET_SIZE];
        buf[0] = self.bus_state.into();

        let mut flags = CanHealthFlags::from(u8::new(0));
        flags.set_warning(self.warning);
        flags.set_passive(self.passive);
        flags.set_bus_off(self.bus_off);
        flags.set_fd_enabled(self.fd_enabled);
        flags.set_brs_enabled(self.brs_enabled);
        flags.set_repeated_bus_off(self.repeated_bus_off);
        buf[1] = u8::from(flags).value();

        buf[2] = self.last_error;
        // buf[3] 保留
        put_u32_le(&mut buf, 4, self.tx_errors);
        put_u32_le(&mut buf, 8, self.rx_errors);
        put_u32_le(&mut buf, 12, self.tx_overflow);
        put_u32_le(&mut buf, 16, self.rx_overflow);
        put_u32_le(&mut buf, 20, self.bus_off_count);
        put_u32_le(&mut buf, 24, self.arbitration_lost);
        put_u32_le(&mut buf, 28, self.fd_frames);
        put_u32_le(&mut buf, 32, self.brs_frames);
        put_u32_le(&mut buf, 36, self.fd_error_signalling);
        put_u32_le(&mut buf, 40, self.recoveries);
        put_u32_le(&mut buf, 44, self.total_tx);
        buf
    }

    pub fn unpack(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() != CAN_HEALTH_PACKET_SIZE {
            return Err(ProtocolError::InvalidLength {
                expected: CAN_HEALTH_PACKET_SIZE,
                actual: buf.len(),
            });
        }

        let bus_state =
            BusStateCode::try_from(buf[0]).map_err(|_| ProtocolError::InvalidValue {
                field: "bus_state",
                value: buf[0] as u32,
            })?;
        let flags = CanHealthFlags::from(u8::new(buf[1]));

        Ok(Self {
            bus_state,
            warning: flags.warning(),
            passive: flags.passive(),
            bus_off: flags.bus_off(),
            fd_enabled: flags.fd_enabled(),
            brs_enabled: flags.brs_enabled(),
            repeated_bus_off: flags.repeated_bus_off(),
            last_error: buf[2],
            tx_errors: get_u32_le(buf, 4),
            rx_errors: get_u32_le(buf, 8),
            tx_overflow: get_u32_le(buf, 12),
            rx_overflow: get_u32_le(buf, 16),
            bus_off_count: get_u32_le(buf, 20),
            arbitration_lost: get_u32_le(buf, 24),
            fd_frames: get_u32_le(buf, 28),
            brs_frames: get_u32_le(buf, 32),
            fd_error_signalling: get_u32_le(buf, 36),
            recoveries: get_u32_le(buf, 40),
            total_tx: get_u32_le(buf, 44),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_packet_offsets() {
        let pkt = HealthPacket {
            voltage_mv: 12_345,
            current_ma: 0x0102_0304,
            harness_status: 2,
            ignition_line: false,
            ignition_can: true,
            safety_mode: 3,
            safety_param: 0xBEEF,
            tx_blocked: 7,
            tx_allowed: 8,
            rx_invalid: 9,
            rx_valid: 10,
            heartbeat_lost: 1,
            uptime_s: 3600,
            sbu1_mv: 500,
            sbu2_mv: 600,
            interrupt_load: 42,
            bus_errors: [1, 2, 3],
        };
        let buf = pkt.pack();

        assert_eq!(get_u32_le(&buf, 0), 12_345);
        assert_eq!(&buf[4..8], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(buf[8], 2);
        assert_eq!(buf[9], 0b10);
        assert_eq!(buf[10], 3);
        assert_eq!(&buf[11..13], &[0xEF, 0xBE]);
        assert_eq!(get_u32_le(&buf, 13), 7);
        assert_eq!(get_u32_le(&buf, 29), 1);
        assert_eq!(get_u16_le(&buf, 37), 500);
        assert_eq!(buf[41], 42);
        assert_eq!(get_u32_le(&buf, 50), 3);

        assert_eq!(HealthPacket::unpack(&buf).unwrap(), pkt);
    }

    #[test]
    fn test_health_packet_wrong_length() {
        let err = HealthPacket::unpack(&[0u8; 53]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::InvalidLength {
                expected: 54,
                actual: 53
            }
        );
    }

    #[test]
    fn test_can_health_flags_byte() {
        let pkt = CanHealthPacket {
            bus_state: BusStateCode::BusOff,
            warning: true,
            bus_off: true,
            repeated_bus_off: true,
            ..Default::default()
        };
        let buf = pkt.pack();
        assert_eq!(buf[0], 2);
        assert_eq!(buf[1], 0b0010_0101);
        assert_eq!(buf[3], 0);
    }

    #[test]
    fn test_can_health_counters() {
        let pkt = CanHealthPacket {
            bus_state: BusStateCode::Passive,
            passive: true,
            fd_enabled: true,
            last_error: 3,
            tx_errors: 136,
            rx_errors: 4,
            rx_overflow: 5,
            recoveries: 2,
            total_tx: 1000,
            ..Default::default()
        };
        let buf = pkt.pack();
        assert_eq!(buf[2], 3);
        assert_eq!(get_u32_le(&buf, 4), 136);
        assert_eq!(get_u32_le(&buf, 16), 5);
        assert_eq!(get_u32_le(&buf, 40), 2);
        assert_eq!(get_u32_le(&buf, 44), 1000);
        assert_eq!(CanHealthPacket::unpack(&buf).unwrap(), pkt);
    }

    #[test]
    fn test_can_health_invalid_state() {
        let mut buf = CanHealthPacket::default().pack();
        buf[0] = 9;
        assert_eq!(
            CanHealthPacket::unpack(&buf),
            Err(ProtocolError::InvalidValue {
                field: "bus_state",
                value: 9
            })
        );
    }
}
