//! USB 协议分发器
//!
//! 持有连接状态，把控制请求和批量传输分派到总线管理器、安全引擎和板级协作者。

use crate::board::Board;
use crate::bulk::{self, BulkOutReport};
use crate::error::UsbError;
use crate::state::UsbState;
use bytes::Bytes;
use panda_driver::{Bridge, BridgeContext, BusManager};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// USB 协议分发器
pub struct UsbDispatcher {
    pub(crate) ctx: Arc<BridgeContext>,
    pub(crate) manager: Arc<BusManager>,
    pub(crate) board: Arc<dyn Board>,
    state: Mutex<UsbState>,
    max_transfer: usize,
}

impl UsbDispatcher {
    pub fn new(manager: Arc<BusManager>, board: Arc<dyn Board>, max_transfer: usize) -> Self {
        Self {
            ctx: Arc::clone(manager.context()),
            manager,
            board,
            state: Mutex::new(UsbState::Disconnected),
            max_transfer,
        }
    }

    /// 挂接到已构建的桥接核心，批量传输上限取自其配置
    pub fn for_bridge(bridge: &Bridge, board: Arc<dyn Board>) -> Self {
        Self::new(
            Arc::clone(&bridge.manager),
            board,
            bridge.config.bulk_transfer_size,
        )
    }

    pub fn state(&self) -> UsbState {
        *self.state.lock()
    }

    pub fn max_transfer(&self) -> usize {
        self.max_transfer
    }

    pub fn context(&self) -> &Arc<BridgeContext> {
        &self.ctx
    }

    pub fn manager(&self) -> &Arc<BusManager> {
        &self.manager
    }

    /// 主机完成 SET_CONFIGURATION
    pub fn configure(&self) {
        let mut state = self.state.lock();
        if *state == UsbState::Disconnected {
            *state = UsbState::Configured;
            info!("USB configured");
        }
    }

    /// 主机断开（任意状态）
    pub fn disconnect(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), UsbState::Disconnected);
        if previous.is_connected() {
            info!("USB disconnected (was {:?})", previous);
        }
    }

    /// 通信复位：清空队列、清零总线健康，安全模式保持不变
    pub fn reset(&self) -> Result<(), UsbError> {
        self.begin_transfer()?;
        self.manager.reset();
        *self.state.lock() = UsbState::Configured;
        Ok(())
    }

    /// 检查连接状态并标记为活跃
    pub(crate) fn begin_transfer(&self) -> Result<(), UsbError> {
        let mut state = self.state.lock();
        if !state.is_connected() {
            return Err(UsbError::NotConfigured { state: *state });
        }
        *state = state.on_transfer();
        Ok(())
    }

    /// Bulk-in 传输
    ///
    /// 返回的字节数不超过 `max_len` 与分发器传输上限中的较小者。
    pub fn bulk_in(&self, max_len: usize) -> Result<Bytes, UsbError> {
        self.begin_transfer()?;
        Ok(bulk::bulk_in(&self.manager, max_len.min(self.max_transfer)))
    }

    /// Bulk-out 传输
    pub fn bulk_out(&self, data: &[u8]) -> Result<BulkOutReport, UsbError> {
        self.begin_transfer()?;
        let report = bulk::bulk_out(&self.manager, data);
        if report.corrupt + report.truncated + report.invalid > 0 {
            debug!("Bulk-out transfer of {} bytes: {:?}", data.len(), report);
        }
        Ok(report)
    }
}

impl std::fmt::Debug for UsbDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbDispatcher")
            .field("state", &self.state())
            .field("max_transfer", &self.max_transfer)
            .field("safety_mode", &self.ctx.safety.mode())
            .finish()
    }
}
