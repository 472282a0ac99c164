//! 设备级共享上下文
//!
//! 所有组件共享的可变状态集中在一个显式构造的 [`BridgeContext`] 中，
//! 不使用任何全局静态变量；测试可以为每个用例构造独立的上下文。

use crate::config::BridgeConfig;
use crate::error::DriverError;
use crate::metrics::BridgeMetrics;
use arc_swap::ArcSwap;
use panda_can::{BusHealth, BusHealthTracker, BusSettings};
use panda_protocol::BUS_COUNT;
use panda_safety::SafetyEngine;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// 共享上下文
///
/// - `safety`: 内部自带锁，模式切换与钩子调用互斥
/// - `health`: 短临界区（`parking_lot::Mutex`）
/// - `settings`: 每条总线一份配置，`ArcSwap` 无锁读取，写入整体替换
/// - `metrics`: 原子计数器
pub struct BridgeContext {
    pub safety: SafetyEngine,
    pub health: Mutex<BusHealthTracker>,
    pub metrics: BridgeMetrics,
    pub settings: [ArcSwap<BusSettings>; BUS_COUNT],
}

impl BridgeContext {
    /// 按配置创建上下文，`now` 为自启动起的时间
    pub fn new(config: &BridgeConfig, now: Duration) -> Result<Self, DriverError> {
        config.validate()?;
        Ok(Self {
            safety: SafetyEngine::new(config.safety_config(), now)?,
            health: Mutex::new(BusHealthTracker::new(config.recovery_policy())),
            metrics: BridgeMetrics::new(),
            settings: std::array::from_fn(|bus| {
                ArcSwap::from_pointee(config.bus_settings(bus as u8))
            }),
        })
    }

    /// 当前总线配置（无锁读取）
    pub fn bus_settings(&self, bus: u8) -> Option<BusSettings> {
        self.settings
            .get(bus as usize)
            .map(|settings| **settings.load())
    }

    pub(crate) fn store_settings(&self, bus: u8, settings: BusSettings) {
        if let Some(slot) = self.settings.get(bus as usize) {
            slot.store(Arc::new(settings));
        }
    }

    /// 总线健康快照
    pub fn bus_health(&self, bus: u8) -> Option<BusHealth> {
        self.health.lock().snapshot(bus)
    }
}

impl std::fmt::Debug for BridgeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeContext")
            .field("safety", &self.safety.status())
            .field("metrics", &self.metrics.snapshot())
            .finish_non_exhaustive()
    }
}
