//! 通用策略：全部放行 / 全部禁止

use super::{CAMERA_BUS, MAIN_BUS, PARAM_FLAG_EXTENDED, SafetyHooks};
use panda_protocol::CanMessage;

/// ALL_OUTPUT：不做任何限制
///
/// `param` bit 0 置位时，在主总线与摄像头总线之间双向透传。
#[derive(Debug, Clone, Copy)]
pub struct AllOutputPolicy {
    passthrough: bool,
}

impl AllOutputPolicy {
    pub fn new(param: u16) -> Self {
        Self {
            passthrough: param & PARAM_FLAG_EXTENDED != 0,
        }
    }
}

impl SafetyHooks for AllOutputPolicy {
    fn tx_hook(&mut self, _msg: &CanMessage) -> bool {
        true
    }

    fn rx_hook(&mut self, _msg: &CanMessage) -> bool {
        true
    }

    fn fwd_hook(&self, bus: u8, _address: u32) -> Option<u8> {
        if !self.passthrough {
            return None;
        }
        match bus {
            MAIN_BUS => Some(CAMERA_BUS),
            CAMERA_BUS => Some(MAIN_BUS),
            _ => None,
        }
    }

    fn controls_allowed(&self) -> bool {
        true
    }
}

/// NO_OUTPUT：禁止一切发送和转发，只监听
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOutputPolicy;

impl SafetyHooks for NoOutputPolicy {
    fn tx_hook(&mut self, _msg: &CanMessage) -> bool {
        false
    }

    fn rx_hook(&mut self, _msg: &CanMessage) -> bool {
        true
    }

    fn fwd_hook(&self, _bus: u8, _address: u32) -> Option<u8> {
        None
    }
}
