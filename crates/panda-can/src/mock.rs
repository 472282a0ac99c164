//! Mock CAN 控制器
//!
//! 无硬件依赖，记录所有发送的帧，可注入邮箱满和控制器故障。
//! 回环模式下，发送的帧会作为 [`HardwareEvent::Frame`] 送回事件通道，
//! 与真实控制器的内部回环行为一致。

use crate::{
    BusSettings, CanController, CanDeviceError, CanDeviceErrorKind, CanError, HardwareEvent,
};
use crossbeam_channel::Sender;
use panda_protocol::CanMessage;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct MockState {
    sent: Vec<CanMessage>,
    settings: Option<BusSettings>,
    busy: bool,
    fail_configure: bool,
    resets: u32,
}

/// Mock 控制器
pub struct MockController {
    bus: u8,
    state: Arc<Mutex<MockState>>,
    loopback_tx: Option<Sender<HardwareEvent>>,
}

/// 测试侧句柄（与控制器共享状态）
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockController {
    pub fn new(bus: u8) -> Self {
        Self {
            bus,
            state: Arc::new(Mutex::new(MockState::default())),
            loopback_tx: None,
        }
    }

    /// 连接事件通道（用于回环模式）
    #[must_use]
    pub fn with_event_sender(mut self, tx: Sender<HardwareEvent>) -> Self {
        self.loopback_tx = Some(tx);
        self
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: self.state.clone(),
        }
    }
}

impl CanController for MockController {
    fn bus(&self) -> u8 {
        self.bus
    }

    fn configure(&mut self, settings: &BusSettings) -> Result<(), CanError> {
        let mut state = self.state.lock();
        if state.fail_configure {
            return Err(
                CanDeviceError::new(CanDeviceErrorKind::InitFailed, "mock configure failure")
                    .into(),
            );
        }
        state.settings = Some(*settings);
        Ok(())
    }

    fn transmit(&mut self, msg: &CanMessage) -> Result<(), CanError> {
        let mut state = self.state.lock();
        if state.busy {
            return Err(CanError::TxBusy { bus: self.bus });
        }
        if state.settings.is_some_and(|s| s.silent) {
            return Err(CanError::NotStarted);
        }
        state.sent.push(*msg);

        if state.settings.is_some_and(|s| s.loopback) {
            if let Some(tx) = &self.loopback_tx {
                let _ = tx.try_send(HardwareEvent::Frame(*msg));
            }
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), CanError> {
        self.state.lock().resets += 1;
        Ok(())
    }
}

impl MockHandle {
    /// 已发送帧的副本
    pub fn sent(&self) -> Vec<CanMessage> {
        self.state.lock().sent.clone()
    }

    /// 取出并清空已发送帧
    pub fn take_sent(&self) -> Vec<CanMessage> {
        std::mem::take(&mut self.state.lock().sent)
    }

    /// 模拟发送邮箱已满
    pub fn set_busy(&self, busy: bool) {
        self.state.lock().busy = busy;
    }

    pub fn set_fail_configure(&self, fail: bool) {
        self.state.lock().fail_configure = fail;
    }

    /// 最近一次应用的配置
    pub fn settings(&self) -> Option<BusSettings> {
        self.state.lock().settings
    }

    pub fn resets(&self) -> u32 {
        self.state.lock().resets
    }
}
