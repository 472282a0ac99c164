//! 控制端点
//!
//! 每个请求按 `(操作码, 方向)` 分派。未知操作码和方向不匹配的请求返回空响应；
//! 已知操作码的参数非法时返回错误（真实设备上表现为 STALL）。

use crate::dispatcher::UsbDispatcher;
use crate::error::UsbError;
use bytes::Bytes;
use panda_protocol::{
    ALL_BUSES, BUS_COUNT, ControlOpcode, ControlRequest, HealthPacket, PacketVersions,
    RequestDirection,
};
use std::time::Duration;
use tracing::{debug, info, trace};

use RequestDirection::{In, Out};

impl UsbDispatcher {
    /// 处理一个控制请求
    ///
    /// `now` 为自启动以来的时间，用于心跳和运行时长。
    pub fn control(&self, req: &ControlRequest, now: Duration) -> Result<Bytes, UsbError> {
        self.begin_transfer()?;

        let opcode = match req.opcode() {
            Ok(opcode) => opcode,
            Err(err) => {
                debug!("{}, empty response", err);
                return Ok(Bytes::new());
            },
        };
        trace!(
            "Control {:?} {:?} value=0x{:04X} index=0x{:04X}",
            opcode,
            req.direction(),
            req.value,
            req.index
        );

        match (opcode, req.direction()) {
            (ControlOpcode::Reset, Out) => {
                self.reset()?;
                Ok(Bytes::new())
            },
            (ControlOpcode::DeviceId, In) => Ok(Bytes::copy_from_slice(&self.board.device_id())),
            (ControlOpcode::InterruptLoad, In) => Ok(byte(self.board.interrupt_load())),
            (ControlOpcode::HarnessStatus, In) => Ok(byte(self.board.harness_status())),
            (ControlOpcode::FirmwareVersion, In) => Ok(Bytes::copy_from_slice(
                self.board.firmware_version().as_bytes(),
            )),
            (ControlOpcode::EnterBootloader, Out) => {
                info!("Entering firmware-update mode {}", req.value);
                self.board.enter_bootloader(req.value);
                Ok(Bytes::new())
            },
            (ControlOpcode::Health, In) => {
                Ok(Bytes::copy_from_slice(&self.health_packet(now).pack()))
            },
            (ControlOpcode::PacketVersions, In) => {
                Ok(Bytes::copy_from_slice(&PacketVersions::CURRENT.pack()))
            },
            (ControlOpcode::SafetyMode, Out) => {
                self.ctx.safety.select_mode(req.value, req.index)?;
                Ok(Bytes::new())
            },
            (ControlOpcode::SafetyMode, In) => {
                let mode = u16::from(self.ctx.safety.mode());
                let param = self.ctx.safety.param();
                let mut buf = [0u8; 4];
                buf[..2].copy_from_slice(&mode.to_le_bytes());
                buf[2..].copy_from_slice(&param.to_le_bytes());
                Ok(Bytes::copy_from_slice(&buf))
            },
            (ControlOpcode::CanSpeed, Out) => {
                let bus = bus_param(req.value)?;
                let data_kbps = self.settings(bus)?.data_kbps;
                self.manager.set_speed(bus, req.index, data_kbps)?;
                Ok(Bytes::new())
            },
            (ControlOpcode::CanSpeed, In) => {
                let settings = self.settings(bus_param(req.value)?)?;
                Ok(Bytes::copy_from_slice(&settings.nominal_kbps.to_le_bytes()))
            },
            (ControlOpcode::CanHealth, In) => {
                let bus = bus_param(req.value)?;
                let packet = self
                    .manager
                    .can_health(bus)
                    .ok_or(UsbError::InvalidParam {
                        name: "bus",
                        value: req.value,
                    })?;
                Ok(Bytes::copy_from_slice(&packet.pack()))
            },
            (ControlOpcode::UartBaud, Out) => {
                self.board.set_uart_baud(req.value, u32::from(req.index));
                Ok(Bytes::new())
            },
            (ControlOpcode::Loopback, Out) => {
                self.manager.set_loopback(req.value != 0)?;
                Ok(Bytes::new())
            },
            (ControlOpcode::Loopback, In) => {
                let settings = self.settings(0)?;
                Ok(byte(u8::from(settings.loopback)))
            },
            (ControlOpcode::Silent, Out) => {
                self.manager.set_silent(bus_param(req.value)?, req.index != 0)?;
                Ok(Bytes::new())
            },
            (ControlOpcode::Silent, In) => {
                let settings = self.settings(bus_param(req.value)?)?;
                Ok(byte(u8::from(settings.silent)))
            },
            (ControlOpcode::RealTimeClock, In) => {
                Ok(Bytes::copy_from_slice(&self.board.rtc().pack()))
            },
            (ControlOpcode::Heartbeat, Out) => {
                self.ctx.safety.heartbeat(now);
                Ok(Bytes::new())
            },
            (ControlOpcode::ClearRingBuffers, Out) => {
                if req.value == ALL_BUSES {
                    self.manager.clear_queues(None);
                } else {
                    self.manager.clear_queues(Some(bus_param(req.value)?));
                }
                Ok(Bytes::new())
            },
            (ControlOpcode::DisableHeartbeat, Out) => {
                self.ctx.safety.set_heartbeat_required(false, now);
                Ok(Bytes::new())
            },
            (ControlOpcode::FdDataSpeed, Out) => {
                let bus = bus_param(req.value)?;
                let nominal_kbps = self.settings(bus)?.nominal_kbps;
                self.manager.set_speed(bus, nominal_kbps, req.index)?;
                Ok(Bytes::new())
            },
            (ControlOpcode::FdDataSpeed, In) => {
                let settings = self.settings(bus_param(req.value)?)?;
                Ok(Bytes::copy_from_slice(&settings.data_kbps.to_le_bytes()))
            },
            (ControlOpcode::FdStatus, In) => {
                let settings = self.settings(bus_param(req.value)?)?;
                Ok(Bytes::copy_from_slice(&[
                    u8::from(settings.fd_enabled),
                    u8::from(settings.brs_enabled),
                ]))
            },
            (ControlOpcode::FdNonIso, Out) => {
                self.manager.set_non_iso(bus_param(req.value)?, req.index != 0)?;
                Ok(Bytes::new())
            },
            (ControlOpcode::FdNonIso, In) => {
                let settings = self.settings(bus_param(req.value)?)?;
                Ok(byte(u8::from(settings.non_iso)))
            },
            (opcode, direction) => {
                debug!("{:?} has no {:?} handler, empty response", opcode, direction);
                Ok(Bytes::new())
            },
        }
    }

    /// 组装健康包
    pub fn health_packet(&self, now: Duration) -> HealthPacket {
        let power = self.board.power();
        let status = self.ctx.safety.status();

        let mut bus_errors = [0u32; BUS_COUNT];
        for (bus, errors) in bus_errors.iter_mut().enumerate() {
            if let Some(health) = self.ctx.bus_health(bus as u8) {
                *errors = health.tx_errors.saturating_add(health.rx_errors);
            }
        }

        HealthPacket {
            voltage_mv: power.voltage_mv,
            current_ma: power.current_ma,
            harness_status: self.board.harness_status(),
            ignition_line: self.board.ignition_line(),
            ignition_can: status.ignition_can,
            safety_mode: u16::from(status.mode) as u8,
            safety_param: status.param,
            tx_blocked: status.counters.tx_blocked,
            tx_allowed: status.counters.tx_allowed,
            rx_invalid: status.counters.rx_invalid,
            rx_valid: status.counters.rx_valid,
            heartbeat_lost: status.counters.heartbeat_lost,
            uptime_s: u32::try_from(now.as_secs()).unwrap_or(u32::MAX),
            sbu1_mv: power.sbu1_mv,
            sbu2_mv: power.sbu2_mv,
            interrupt_load: self.board.interrupt_load(),
            bus_errors,
        }
    }

    fn settings(&self, bus: u8) -> Result<panda_can::BusSettings, UsbError> {
        self.ctx.bus_settings(bus).ok_or(UsbError::InvalidParam {
            name: "bus",
            value: u16::from(bus),
        })
    }
}

fn bus_param(value: u16) -> Result<u8, UsbError> {
    if (value as usize) < BUS_COUNT {
        Ok(value as u8)
    } else {
        Err(UsbError::InvalidParam { name: "bus", value })
    }
}

fn byte(value: u8) -> Bytes {
    Bytes::copy_from_slice(&[value])
}
