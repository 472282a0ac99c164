//! 安全模式定义
//!
//! 模式编号与固件线协议一致，不可重新编号。

use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;

/// 安全模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum SafetyMode {
    /// 全部放行（调试用）
    AllOutput = 0x00,
    /// 禁止一切输出（上电默认、心跳丢失回退）
    NoOutput = 0x01,
    Honda = 0x02,
    Toyota = 0x03,
    Gm = 0x04,
    Tesla = 0x05,
}

impl SafetyMode {
    /// 上电默认模式
    pub const DEFAULT: SafetyMode = SafetyMode::NoOutput;

    pub fn name(self) -> &'static str {
        match self {
            SafetyMode::AllOutput => "ALL_OUTPUT",
            SafetyMode::NoOutput => "NO_OUTPUT",
            SafetyMode::Honda => "HONDA",
            SafetyMode::Toyota => "TOYOTA",
            SafetyMode::Gm => "GM",
            SafetyMode::Tesla => "TESLA",
        }
    }
}

impl Default for SafetyMode {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for SafetyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
