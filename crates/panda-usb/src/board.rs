//! 板级协作者
//!
//! 电源测量、线束检测、设备标识、实时时钟、固件更新入口和 UART 属于板级代码，
//! 分发器只通过 [`Board`] trait 调用它们。

use parking_lot::Mutex;

/// 设备标识长度
pub const DEVICE_ID_SIZE: usize = 12;

/// 实时时钟响应长度
pub const RTC_SIZE: usize = 8;

/// 实时时钟读数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RtcTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub weekday: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl RtcTime {
    /// year u16 LE @0，其余各 1 字节
    pub fn pack(&self) -> [u8; RTC_SIZE] {
        let [lo, hi] = self.year.to_le_bytes();
        [
            lo,
            hi,
            self.month,
            self.day,
            self.weekday,
            self.hour,
            self.minute,
            self.second,
        ]
    }
}

/// 电源与线束测量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PowerReadings {
    pub voltage_mv: u32,
    pub current_ma: u32,
    pub sbu1_mv: u16,
    pub sbu2_mv: u16,
}

/// 板级协作者
pub trait Board: Send + Sync {
    fn power(&self) -> PowerReadings;

    /// 线束方向（0 = 未连接）
    fn harness_status(&self) -> u8;

    /// 点火线（硬件引脚）
    fn ignition_line(&self) -> bool;

    /// 中断负载（百分比）
    fn interrupt_load(&self) -> u8;

    fn device_id(&self) -> [u8; DEVICE_ID_SIZE];

    fn firmware_version(&self) -> &str;

    fn rtc(&self) -> RtcTime;

    /// 进入固件更新模式
    fn enter_bootloader(&self, mode: u16);

    /// 设置串口透传速率
    fn set_uart_baud(&self, uart: u16, baud: u32);
}

/// 固定读数的板卡（主机侧仿真和测试）
///
/// 记录固件更新和 UART 请求，不执行任何硬件动作。
#[derive(Debug, Default)]
pub struct StaticBoard {
    pub power: PowerReadings,
    pub harness_status: u8,
    pub ignition_line: bool,
    pub interrupt_load: u8,
    pub device_id: [u8; DEVICE_ID_SIZE],
    pub firmware_version: String,
    pub rtc: RtcTime,
    requests: Mutex<BoardRequests>,
}

/// [`StaticBoard`] 收到的板级请求
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardRequests {
    pub bootloader: Vec<u16>,
    pub uart_baud: Vec<(u16, u32)>,
}

impl StaticBoard {
    pub fn new(firmware_version: impl Into<String>) -> Self {
        Self {
            firmware_version: firmware_version.into(),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> BoardRequests {
        self.requests.lock().clone()
    }
}

impl Board for StaticBoard {
    fn power(&self) -> PowerReadings {
        self.power
    }

    fn harness_status(&self) -> u8 {
        self.harness_status
    }

    fn ignition_line(&self) -> bool {
        self.ignition_line
    }

    fn interrupt_load(&self) -> u8 {
        self.interrupt_load
    }

    fn device_id(&self) -> [u8; DEVICE_ID_SIZE] {
        self.device_id
    }

    fn firmware_version(&self) -> &str {
        &self.firmware_version
    }

    fn rtc(&self) -> RtcTime {
        self.rtc
    }

    fn enter_bootloader(&self, mode: u16) {
        self.requests.lock().bootloader.push(mode);
    }

    fn set_uart_baud(&self, uart: u16, baud: u32) {
        self.requests.lock().uart_baud.push((uart, baud));
    }
}
