//! 表驱动的车型策略
//!
//! 每个车型用一个静态 [`VehicleSpec`] 描述：
//!
//! - **TX 白名单**：只有列出的 (bus, address) 可以发送，转向报文额外限幅
//! - **控制许可**：巡航信号上升沿开启 `controls_allowed`，巡航关闭、
//!   油门或刹车的按下沿关闭它
//! - **RX 长度检查**：关键报文长度不符视为无效
//! - **转发规则**：主总线 ↔ 摄像头总线，被替换的报文不从摄像头侧转发

use super::{CAMERA_BUS, MAIN_BUS, PARAM_FLAG_EXTENDED, SafetyHooks};
use panda_protocol::CanMessage;
use tracing::debug;

/// 转向力矩限幅
///
/// 力矩为 `data[offset..offset + 2]` 的大端 i16。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SteerLimit {
    pub offset: usize,
    pub max: i16,
}

impl SteerLimit {
    fn torque(&self, msg: &CanMessage) -> Option<i16> {
        if msg.len() < self.offset + 2 {
            return None;
        }
        Some(i16::from_be_bytes([
            msg.byte(self.offset),
            msg.byte(self.offset + 1),
        ]))
    }
}

/// 白名单条目的放行条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    /// 无条件放行（HUD、取消按钮等）
    Always,
    /// 需要 `controls_allowed`
    ControlsRequired,
    /// 转向：未允许控制时力矩必须为 0，允许时不超过上限
    Steer(SteerLimit),
    /// 纵向控制：需要 param 开启纵向且 `controls_allowed`
    Longitudinal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxRule {
    pub bus: u8,
    pub address: u32,
    pub kind: TxKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxCheck {
    pub bus: u8,
    pub address: u32,
    pub len: usize,
}

/// 单比特信号：`data[byte] & mask != 0` 即为激活
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalRule {
    pub bus: u8,
    pub address: u32,
    pub byte: usize,
    pub mask: u8,
}

impl SignalRule {
    fn matches(&self, msg: &CanMessage) -> bool {
        !msg.is_extended() && msg.bus() == self.bus && msg.address() == self.address
    }

    fn active(&self, msg: &CanMessage) -> bool {
        msg.byte(self.byte) & self.mask != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forwarding {
    /// 不转发
    None,
    /// 主总线 → 摄像头总线全部转发；摄像头总线 → 主总线时跳过被替换的报文
    CameraBridge { blocked_from_camera: &'static [u32] },
}

/// 车型描述
#[derive(Debug)]
pub struct VehicleSpec {
    pub name: &'static str,
    pub tx_rules: &'static [TxRule],
    pub rx_checks: &'static [RxCheck],
    pub cruise: SignalRule,
    pub gas: SignalRule,
    pub brake: SignalRule,
    pub forwarding: Forwarding,
}

/// 车型策略实例（持有逐帧更新的控制状态）
#[derive(Debug)]
pub struct VehiclePolicy {
    spec: &'static VehicleSpec,
    longitudinal: bool,
    controls_allowed: bool,
    cruise_engaged: bool,
    gas_pressed: bool,
    brake_pressed: bool,
}

impl VehiclePolicy {
    pub fn new(spec: &'static VehicleSpec, param: u16) -> Self {
        Self {
            spec,
            longitudinal: param & PARAM_FLAG_EXTENDED != 0,
            controls_allowed: false,
            cruise_engaged: false,
            gas_pressed: false,
            brake_pressed: false,
        }
    }

    pub fn spec(&self) -> &'static VehicleSpec {
        self.spec
    }

    fn disengage(&mut self, reason: &str) {
        if self.controls_allowed {
            debug!("{}: controls disengaged ({})", self.spec.name, reason);
        }
        self.controls_allowed = false;
    }
}

impl SafetyHooks for VehiclePolicy {
    fn tx_hook(&mut self, msg: &CanMessage) -> bool {
        if msg.is_extended() {
            return false;
        }
        let Some(rule) = self
            .spec
            .tx_rules
            .iter()
            .find(|rule| rule.bus == msg.bus() && rule.address == msg.address())
        else {
            return false;
        };

        match rule.kind {
            TxKind::Always => true,
            TxKind::ControlsRequired => self.controls_allowed,
            TxKind::Longitudinal => self.longitudinal && self.controls_allowed,
            TxKind::Steer(limit) => match limit.torque(msg) {
                Some(torque) if self.controls_allowed => {
                    torque.unsigned_abs() <= limit.max.unsigned_abs()
                }
                Some(torque) => torque == 0,
                None => false,
            },
        }
    }

    fn rx_hook(&mut self, msg: &CanMessage) -> bool {
        let length_ok = self
            .spec
            .rx_checks
            .iter()
            .find(|check| {
                !msg.is_extended() && check.bus == msg.bus() && check.address == msg.address()
            })
            .is_none_or(|check| msg.len() == check.len);
        if !length_ok {
            return false;
        }

        let spec = self.spec;
        if spec.cruise.matches(msg) {
            let engaged = spec.cruise.active(msg);
            if engaged && !self.cruise_engaged {
                self.controls_allowed = true;
                debug!("{}: controls allowed (cruise engaged)", spec.name);
            } else if !engaged {
                self.disengage("cruise off");
            }
            self.cruise_engaged = engaged;
        }

        if spec.gas.matches(msg) {
            let pressed = spec.gas.active(msg);
            if pressed && !self.gas_pressed {
                self.disengage("gas pressed");
            }
            self.gas_pressed = pressed;
        }

        if spec.brake.matches(msg) {
            let pressed = spec.brake.active(msg);
            if pressed && !self.brake_pressed {
                self.disengage("brake pressed");
            }
            self.brake_pressed = pressed;
        }

        true
    }

    fn fwd_hook(&self, bus: u8, address: u32) -> Option<u8> {
        match self.spec.forwarding {
            Forwarding::None => None,
            Forwarding::CameraBridge {
                blocked_from_camera,
            } => match bus {
                MAIN_BUS => Some(CAMERA_BUS),
                CAMERA_BUS if !blocked_from_camera.contains(&address) => Some(MAIN_BUS),
                _ => None,
            },
        }
    }

    fn controls_allowed(&self) -> bool {
        self.controls_allowed
    }
}
