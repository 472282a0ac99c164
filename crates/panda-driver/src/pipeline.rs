//! 主循环管线
//!
//! 中断上下文通过 [`IsrProducer`] 把硬件事件 `try_send` 进有界通道，从不阻塞；
//! 协作式主循环每个周期调用一次 [`Pipeline::poll`]：
//!
//! 1. 按预算取出硬件事件，交给总线管理器
//! 2. 推进 Bus-Off 恢复定时器
//! 3. 检查心跳看门狗（超时在本周期内强制 `NO_OUTPUT`）
//! 4. 按预算把 TX 队列写入控制器

use crate::config::BridgeConfig;
use crate::context::BridgeContext;
use crate::manager::BusManager;
use crate::metrics::BridgeMetrics;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use panda_can::HardwareEvent;
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

/// Pipeline 配置
///
/// # Example
///
/// ```
/// use panda_driver::PipelineConfig;
///
/// let config = PipelineConfig {
///     max_events_per_poll: 16,
///     max_tx_per_poll: 8,
/// };
/// assert!(config.max_events_per_poll > config.max_tx_per_poll);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// 每个周期最多处理的硬件事件数
    pub max_events_per_poll: usize,
    /// 每个周期每条总线最多发送的帧数
    pub max_tx_per_poll: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_events_per_poll: 64,
            max_tx_per_poll: 32,
        }
    }
}

impl From<&BridgeConfig> for PipelineConfig {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            max_events_per_poll: config.max_events_per_poll,
            max_tx_per_poll: config.max_tx_per_poll,
        }
    }
}

/// 中断侧事件生产者
///
/// 只做 `try_send`：通道满时丢弃事件并计入 `isr_drops`。
#[derive(Clone)]
pub struct IsrProducer {
    tx: Sender<HardwareEvent>,
    ctx: Arc<BridgeContext>,
}

impl IsrProducer {
    /// 推送一个事件，返回是否入队
    pub fn push(&self, event: HardwareEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                BridgeMetrics::bump(&self.ctx.metrics.isr_drops);
                false
            },
        }
    }

    /// 原始发送端（供控制器内部回环使用）
    pub fn sender(&self) -> Sender<HardwareEvent> {
        self.tx.clone()
    }
}

/// 单个周期的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollReport {
    pub events: usize,
    pub recovered_buses: usize,
    /// 本周期是否因心跳丢失强制切换到 `NO_OUTPUT`
    pub heartbeat_lost: bool,
    pub transmitted: usize,
}

/// 主循环
pub struct Pipeline {
    ctx: Arc<BridgeContext>,
    manager: Arc<BusManager>,
    events: Receiver<HardwareEvent>,
    config: PipelineConfig,
}

impl Pipeline {
    /// 创建主循环和对应的中断侧生产者
    pub fn new(
        ctx: Arc<BridgeContext>,
        manager: Arc<BusManager>,
        channel_capacity: usize,
        config: PipelineConfig,
    ) -> (Self, IsrProducer) {
        let (tx, rx) = bounded(channel_capacity);
        let producer = IsrProducer {
            tx,
            ctx: ctx.clone(),
        };
        let pipeline = Self {
            ctx,
            manager,
            events: rx,
            config,
        };
        (pipeline, producer)
    }

    pub fn config(&self) -> PipelineConfig {
        self.config
    }

    /// 待处理的事件数
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// 执行一个主循环周期
    pub fn poll(&self, now: Duration) -> PollReport {
        let mut report = PollReport::default();

        for _ in 0..self.config.max_events_per_poll {
            match self.events.try_recv() {
                Ok(event) => {
                    self.manager.on_hardware_event(event, now);
                    report.events += 1;
                },
                Err(_) => break,
            }
        }
        if report.events == self.config.max_events_per_poll && !self.events.is_empty() {
            trace!(
                "Event budget exhausted, deferred {} events",
                self.events.len()
            );
        }
        self.ctx
            .metrics
            .events_processed
            .fetch_add(report.events as u64, std::sync::atomic::Ordering::Relaxed);

        report.recovered_buses = self.manager.tick(now);

        report.heartbeat_lost = self.ctx.safety.tick(now);
        if report.heartbeat_lost {
            warn!("Dropping queued TX after heartbeat loss");
            self.manager.clear_tx_queues();
        }

        report.transmitted = self.manager.service_tx(self.config.max_tx_per_poll, now);
        report
    }
}
