//! 安全计数器

/// 安全计数器快照
///
/// 设备级计数器只在重启时清零；模式级计数器在每次 `select_mode` 时清零。
/// 所有计数均为饱和运算。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SafetyCounters {
    pub tx_blocked: u32,
    pub tx_allowed: u32,
    pub rx_valid: u32,
    pub rx_invalid: u32,
    /// 仅设备级计数器使用
    pub heartbeat_lost: u32,
}

impl SafetyCounters {
    pub(crate) fn record_tx(&mut self, allowed: bool) {
        let counter = if allowed {
            &mut self.tx_allowed
        } else {
            &mut self.tx_blocked
        };
        *counter = counter.saturating_add(1);
    }

    pub(crate) fn record_rx(&mut self, valid: bool) {
        let counter = if valid {
            &mut self.rx_valid
        } else {
            &mut self.rx_invalid
        };
        *counter = counter.saturating_add(1);
    }

    pub(crate) fn record_heartbeat_lost(&mut self) {
        self.heartbeat_lost = self.heartbeat_lost.saturating_add(1);
    }
}
