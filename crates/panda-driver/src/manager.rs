//! 总线管理器
//!
//! 持有每条总线的 RX/TX 队列和控制器，把安全引擎的判定落实到报文流上：
//!
//! ```text
//! 主机 ──enqueue_tx──> tx_hook ──拒绝──> RX 队列（returned + rejected）
//!                         │
//!                         └─允许──> TX 队列 ──service_tx──> 控制器 ──> RX 队列（returned）
//!
//! 硬件 ──on_hardware_frame──> 健康统计 → FD/BRS 自动升级 → rx_hook → fwd_hook
//!                                                                  │
//!                              RX 队列 <──────────────────────────┤
//!                              目标总线 TX 队列 <── tx_hook <──────┘
//! ```
//!
//! # 锁
//!
//! 每条总线的 RX 队列、TX 队列、控制器各一把 `parking_lot::Mutex`。
//! 同时持有多把锁时的顺序：TX 队列 → 控制器；多条 RX 队列按总线编号递增加锁。
//! 健康跟踪器和安全引擎的锁从不与队列锁嵌套。

use crate::context::BridgeContext;
use crate::error::DriverError;
use crate::metrics::BridgeMetrics;
use crate::queue::RingQueue;
use panda_can::health::Overflow;
use panda_can::{
    BusSettings, BusState, CanController, CanError, CanErrorCode, HardwareEvent, Transitions,
    validate_data_speed, validate_nominal_speed,
};
use panda_protocol::{BUS_COUNT, CanHealthPacket, CanMessage};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// `enqueue_tx` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    /// 已进入 TX 队列
    Queued,
    /// 被安全策略拒绝，已作为 `rejected` 回显给主机
    Rejected,
}

/// TX 队列中报文的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOrigin {
    /// 主机经 bulk-out 提交，发送成功后回显
    Host,
    /// 从其他总线转发，不回显
    Forwarded { from: u8 },
}

#[derive(Debug, Clone, Copy)]
struct TxEntry {
    msg: CanMessage,
    origin: TxOrigin,
}

type ControllerSlot = Mutex<Option<Box<dyn CanController>>>;

/// 总线管理器
pub struct BusManager {
    ctx: Arc<BridgeContext>,
    rx: [Mutex<RingQueue<CanMessage>>; BUS_COUNT],
    tx: [Mutex<RingQueue<TxEntry>>; BUS_COUNT],
    controllers: [ControllerSlot; BUS_COUNT],
    /// `dequeue_rx_batch` 的起始总线（轮转）
    rx_cursor: AtomicUsize,
    /// `dequeue_tx` 的起始总线（轮转）
    tx_cursor: AtomicUsize,
}

impl BusManager {
    /// 创建管理器，每条总线的 RX/TX 队列容量为 `queue_capacity`
    pub fn new(ctx: Arc<BridgeContext>, queue_capacity: usize) -> Self {
        Self {
            ctx,
            rx: std::array::from_fn(|_| Mutex::new(RingQueue::new(queue_capacity))),
            tx: std::array::from_fn(|_| Mutex::new(RingQueue::new(queue_capacity))),
            controllers: std::array::from_fn(|_| Mutex::new(None)),
            rx_cursor: AtomicUsize::new(0),
            tx_cursor: AtomicUsize::new(0),
        }
    }

    pub fn context(&self) -> &Arc<BridgeContext> {
        &self.ctx
    }

    /// 挂接控制器并应用当前总线配置
    pub fn attach(&self, mut controller: Box<dyn CanController>) -> Result<(), DriverError> {
        let bus = controller.bus();
        let settings = self
            .ctx
            .bus_settings(bus)
            .ok_or(DriverError::InvalidBus { bus })?;
        controller.configure(&settings)?;
        let previous = self.controllers[bus as usize].lock().replace(controller);
        if previous.is_some() {
            warn!("Controller for bus {} replaced", bus);
        }
        info!("Bus {} attached ({} kbps)", bus, settings.nominal_kbps);
        Ok(())
    }

    pub fn has_controller(&self, bus: u8) -> bool {
        self.controllers
            .get(bus as usize)
            .is_some_and(|slot| slot.lock().is_some())
    }

    fn check_bus(&self, bus: u8) -> Result<usize, DriverError> {
        if self.has_controller(bus) {
            Ok(bus as usize)
        } else {
            Err(DriverError::InvalidBus { bus })
        }
    }

    // ==================== TX ====================

    /// 提交一条主机报文
    ///
    /// 总线 Bus-Off 或只听时直接返回错误，报文不交给安全引擎评估。
    /// 其余报文经过 `tx_hook`：被拒绝的报文不发送，以 `returned = rejected = true`
    /// 回显到 RX 队列，返回 [`TxOutcome::Rejected`]；允许的报文在队列满时丢弃并计数。
    pub fn enqueue_tx(&self, msg: CanMessage) -> Result<TxOutcome, DriverError> {
        let bus = msg.bus();
        self.check_bus(bus)?;
        self.check_tx_ready(bus)?;

        if !self.ctx.safety.tx_hook(&msg) {
            BridgeMetrics::bump(&self.ctx.metrics.tx_rejected);
            trace!("TX 0x{:X} on bus {} rejected by safety", msg.address(), bus);
            let mut echo = msg;
            echo.mark_returned();
            echo.mark_rejected();
            // RX 满时溢出已计入健康记录
            let _ = self.enqueue_rx(echo);
            return Ok(TxOutcome::Rejected);
        }

        self.push_tx(TxEntry {
            msg,
            origin: TxOrigin::Host,
        })?;
        Ok(TxOutcome::Queued)
    }

    /// Bus-Off 或只听的总线不接收任何发送请求
    fn check_tx_ready(&self, bus: u8) -> Result<(), DriverError> {
        if self.ctx.health.lock().is_bus_off(bus) {
            return Err(DriverError::BusOff { bus });
        }
        if self.ctx.bus_settings(bus).is_some_and(|s| s.silent) {
            return Err(DriverError::BusSilent { bus });
        }
        Ok(())
    }

    fn push_tx(&self, entry: TxEntry) -> Result<(), DriverError> {
        let bus = entry.msg.bus();
        let pushed = self.tx[bus as usize].lock().push(entry);
        if pushed.is_err() {
            self.ctx.health.lock().on_overflow(bus, Overflow::Tx);
            debug!("TX queue full on bus {}, newest dropped", bus);
            return Err(DriverError::QueueFull { bus });
        }
        Ok(())
    }

    /// 取出下一条待发送报文（跨总线轮转，单总线内保持顺序）
    ///
    /// 供自行驱动发送的调用方使用；主循环使用 [`service_tx`](Self::service_tx)。
    pub fn dequeue_tx(&self) -> Option<CanMessage> {
        let start = self.tx_cursor.fetch_add(1, Ordering::Relaxed) % BUS_COUNT;
        (0..BUS_COUNT)
            .map(|offset| (start + offset) % BUS_COUNT)
            .find_map(|bus| self.tx[bus].lock().pop())
            .map(|entry| entry.msg)
    }

    /// 把待发送报文写入控制器，每条总线最多 `max_per_bus` 帧
    ///
    /// 邮箱满时报文留在队首，下个周期重试。Bus-Off 或只听的总线跳过。
    /// 返回成功发送的帧数。
    pub fn service_tx(&self, max_per_bus: usize, now: Duration) -> usize {
        (0..BUS_COUNT as u8)
            .map(|bus| self.service_bus_tx(bus, max_per_bus, now))
            .sum()
    }

    fn service_bus_tx(&self, bus: u8, max_per_bus: usize, now: Duration) -> usize {
        if self.ctx.health.lock().is_bus_off(bus)
            || self.ctx.bus_settings(bus).is_some_and(|s| s.silent)
        {
            return 0;
        }

        let mut sent: Vec<TxEntry> = Vec::new();
        let mut fault: Option<CanError> = None;
        {
            let mut queue = self.tx[bus as usize].lock();
            let mut slot = self.controllers[bus as usize].lock();
            let Some(controller) = slot.as_mut() else {
                return 0;
            };

            for _ in 0..max_per_bus {
                let Some(entry) = queue.front().copied() else {
                    break;
                };
                match controller.transmit(&entry.msg) {
                    Ok(()) => {
                        queue.pop();
                        sent.push(entry);
                    },
                    Err(CanError::TxBusy { .. }) => {
                        BridgeMetrics::bump(&self.ctx.metrics.tx_busy_retries);
                        break;
                    },
                    Err(err) => {
                        // 无法发送的报文丢弃，避免堵住队列
                        queue.pop();
                        fault = Some(err);
                        break;
                    },
                }
            }
            if !queue.is_empty() && sent.len() == max_per_bus {
                trace!(
                    "Bus {} TX budget exhausted, deferred {} frames",
                    bus,
                    queue.len()
                );
            }
        }

        {
            let mut health = self.ctx.health.lock();
            for _ in &sent {
                health.on_frame_sent(bus);
            }
            if let Some(CanError::BusOff { .. }) = fault {
                let transitions = health.on_hardware_error(bus, CanErrorCode::Offline, now);
                log_transitions(bus, &transitions);
            }
        }

        if let Some(err) = fault {
            BridgeMetrics::bump(&self.ctx.metrics.device_errors);
            warn!("Bus {} transmit failed: {}", bus, err);
        }

        let metrics = &self.ctx.metrics;
        metrics
            .tx_frames
            .fetch_add(sent.len() as u64, Ordering::Relaxed);
        for entry in &sent {
            if entry.origin == TxOrigin::Host {
                let mut echo = entry.msg;
                echo.mark_returned();
                BridgeMetrics::bump(&metrics.tx_echoes);
                let _ = self.enqueue_rx(echo);
            }
        }
        sent.len()
    }

    // ==================== RX ====================

    /// 放入 RX 队列；队列满时丢弃新报文并计入 `rx_overflow`
    pub fn enqueue_rx(&self, msg: CanMessage) -> Result<(), DriverError> {
        let bus = msg.bus();
        let pushed = self.rx[bus as usize].lock().push(msg);
        if pushed.is_err() {
            self.ctx.health.lock().on_overflow(bus, Overflow::Rx);
            trace!("RX queue full on bus {}, newest dropped", bus);
            return Err(DriverError::QueueFull { bus });
        }
        Ok(())
    }

    /// 按字节预算取出一批 RX 报文
    ///
    /// 各总线轮流取一条，单总线内保持到达顺序；遇到第一条放不下的报文即停止，
    /// 报文从不拆分，返回报文的编码长度之和不超过 `max_bytes`。
    pub fn dequeue_rx_batch(&self, max_bytes: usize) -> Vec<CanMessage> {
        let start = self.rx_cursor.fetch_add(1, Ordering::Relaxed) % BUS_COUNT;
        let mut queues: [_; BUS_COUNT] = std::array::from_fn(|bus| self.rx[bus].lock());

        let mut batch = Vec::new();
        let mut used = 0usize;
        'fill: loop {
            let mut progressed = false;
            for offset in 0..BUS_COUNT {
                let queue = &mut queues[(start + offset) % BUS_COUNT];
                let Some(size) = queue.front().map(CanMessage::wire_len) else {
                    continue;
                };
                if used + size > max_bytes {
                    break 'fill;
                }
                if let Some(msg) = queue.pop() {
                    used += size;
                    batch.push(msg);
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        batch
    }

    /// 硬件帧进入管线
    ///
    /// 顺序：健康统计 → FD/BRS 自动升级 → `rx_hook` → `fwd_hook` → RX 队列 → 转发。
    /// `rx_hook` 的结果只影响计数和策略状态，报文总是交付主机。
    pub fn on_hardware_frame(&self, msg: CanMessage) {
        let bus = msg.bus();
        {
            let mut health = self.ctx.health.lock();
            let transitions = health.on_frame_received(bus);
            log_transitions(bus, &transitions);
            if msg.is_fd() {
                health.on_fd_frame(bus, msg.is_brs());
            }
        }
        BridgeMetrics::bump(&self.ctx.metrics.rx_frames);

        self.auto_promote(&msg);

        self.ctx.safety.rx_hook(&msg);
        let target = self.ctx.safety.fwd_hook(bus, msg.address());

        let _ = self.enqueue_rx(msg);

        if let Some(target) = target {
            self.forward(msg, target);
        }
    }

    /// 单向的 FD / BRS 自动升级
    fn auto_promote(&self, msg: &CanMessage) {
        if !msg.is_fd() {
            return;
        }
        let bus = msg.bus();
        let Some(mut settings) = self.ctx.bus_settings(bus) else {
            return;
        };
        let mut changed = false;
        if !settings.fd_enabled {
            settings.fd_enabled = true;
            changed = true;
            BridgeMetrics::bump(&self.ctx.metrics.fd_promotions);
            info!("Bus {} promoted to CAN-FD (FD frame observed)", bus);
        }
        if msg.is_brs() && !settings.brs_enabled {
            settings.brs_enabled = true;
            changed = true;
            BridgeMetrics::bump(&self.ctx.metrics.brs_promotions);
            info!("Bus {} promoted to BRS (BRS frame observed)", bus);
        }
        if changed {
            self.ctx.store_settings(bus, settings);
        }
    }

    /// 转发副本同样经过 `tx_hook`，被拒绝的副本只计数，不回显
    fn forward(&self, msg: CanMessage, target: u8) {
        let from = msg.bus();
        if !self.has_controller(target) {
            trace!("Forward target bus {} not attached", target);
            return;
        }
        let Ok(copy) = msg.with_bus(target) else {
            return;
        };
        if let Err(err) = self.check_tx_ready(target) {
            trace!("Forward {} -> {} dropped: {}", from, target, err);
            return;
        }

        if !self.ctx.safety.tx_hook(&copy) {
            BridgeMetrics::bump(&self.ctx.metrics.forward_rejected);
            return;
        }

        match self.push_tx(TxEntry {
            msg: copy,
            origin: TxOrigin::Forwarded { from },
        }) {
            Ok(()) => {
                BridgeMetrics::bump(&self.ctx.metrics.forwarded);
                self.ctx.health.lock().on_forwarded(from);
            },
            Err(err) => trace!("Forward {} -> {} dropped: {}", from, target, err),
        }
    }

    /// 处理一个硬件事件
    pub fn on_hardware_event(&self, event: HardwareEvent, now: Duration) {
        match event {
            HardwareEvent::Frame(msg) => self.on_hardware_frame(msg),
            HardwareEvent::Error { bus, code } => {
                let transitions = self.ctx.health.lock().on_hardware_error(bus, code, now);
                log_transitions(bus, &transitions);
            },
            HardwareEvent::ArbitrationLost { bus } => {
                self.ctx.health.lock().on_arbitration_lost(bus);
            },
            HardwareEvent::FdErrorSignalling { bus } => {
                self.ctx.health.lock().on_fd_error_signalling(bus);
            },
            HardwareEvent::BusOffRecovered { bus } => {
                self.ctx.health.lock().on_bus_recovered(bus, now);
            },
        }
    }

    /// 推进 Bus-Off 恢复定时器，恢复的总线重新初始化控制器
    ///
    /// 返回本次恢复的总线数。
    pub fn tick(&self, now: Duration) -> usize {
        let mut recovered = 0;
        for bus in 0..BUS_COUNT as u8 {
            if !self.ctx.health.lock().tick(bus, now) {
                continue;
            }
            recovered += 1;
            if let Err(err) = self.reinit_controller(bus) {
                BridgeMetrics::bump(&self.ctx.metrics.device_errors);
                warn!("Bus {} re-init after recovery failed: {}", bus, err);
            }
        }
        recovered
    }

    fn reinit_controller(&self, bus: u8) -> Result<(), DriverError> {
        let settings = self
            .ctx
            .bus_settings(bus)
            .ok_or(DriverError::InvalidBus { bus })?;
        if let Some(controller) = self.controllers[bus as usize].lock().as_mut() {
            controller.reset()?;
            controller.configure(&settings)?;
        }
        Ok(())
    }

    // ==================== 配置 ====================

    /// 修改总线配置：先写入控制器，成功后再发布
    fn update_settings(
        &self,
        bus: u8,
        update: impl FnOnce(&mut BusSettings),
    ) -> Result<BusSettings, DriverError> {
        let index = self.check_bus(bus)?;
        let mut settings = self
            .ctx
            .bus_settings(bus)
            .ok_or(DriverError::InvalidBus { bus })?;
        update(&mut settings);
        if let Some(controller) = self.controllers[index].lock().as_mut() {
            controller.configure(&settings)?;
        }
        self.ctx.store_settings(bus, settings);
        Ok(settings)
    }

    /// 设置仲裁段和数据段速率（kbps）
    pub fn set_speed(&self, bus: u8, nominal_kbps: u16, data_kbps: u16) -> Result<(), DriverError> {
        validate_nominal_speed(bus, nominal_kbps)?;
        validate_data_speed(bus, data_kbps)?;
        self.update_settings(bus, |s| {
            s.nominal_kbps = nominal_kbps;
            s.data_kbps = data_kbps;
        })?;
        info!(
            "Bus {} speed set to {}/{} kbps",
            bus, nominal_kbps, data_kbps
        );
        Ok(())
    }

    /// 显式开关 CAN-FD（关闭时同时关闭 BRS）
    pub fn set_fd_enabled(&self, bus: u8, enabled: bool) -> Result<(), DriverError> {
        self.update_settings(bus, |s| {
            s.fd_enabled = enabled;
            if !enabled {
                s.brs_enabled = false;
            }
        })?;
        Ok(())
    }

    pub fn set_non_iso(&self, bus: u8, enabled: bool) -> Result<(), DriverError> {
        self.update_settings(bus, |s| s.non_iso = enabled)?;
        Ok(())
    }

    pub fn set_silent(&self, bus: u8, enabled: bool) -> Result<(), DriverError> {
        self.update_settings(bus, |s| s.silent = enabled)?;
        Ok(())
    }

    /// 所有已挂接总线的回环模式
    pub fn set_loopback(&self, enabled: bool) -> Result<(), DriverError> {
        for bus in 0..BUS_COUNT as u8 {
            if self.has_controller(bus) {
                self.update_settings(bus, |s| s.loopback = enabled)?;
            }
        }
        Ok(())
    }

    // ==================== 复位与查询 ====================

    /// 清空队列，`bus` 为 `None` 时清空所有总线
    pub fn clear_queues(&self, bus: Option<u8>) {
        for index in 0..BUS_COUNT {
            if bus.is_none_or(|bus| bus as usize == index) {
                self.rx[index].lock().clear();
                self.tx[index].lock().clear();
            }
        }
    }

    /// 清空所有 TX 队列（心跳丢失时停止对车辆总线输出）
    pub fn clear_tx_queues(&self) {
        for queue in &self.tx {
            queue.lock().clear();
        }
    }

    /// 通信复位：清空队列、清零总线健康、重新初始化控制器
    ///
    /// 安全模式不受影响。
    pub fn reset(&self) {
        self.clear_queues(None);
        self.ctx.health.lock().reset_all();
        for bus in 0..BUS_COUNT as u8 {
            if let Err(err) = self.reinit_controller(bus) {
                BridgeMetrics::bump(&self.ctx.metrics.device_errors);
                warn!("Bus {} re-init on reset failed: {}", bus, err);
            }
        }
        info!("Communication reset (safety mode {} kept)", self.ctx.safety.mode());
    }

    /// CAN 健康包
    pub fn can_health(&self, bus: u8) -> Option<CanHealthPacket> {
        let settings = self.ctx.bus_settings(bus)?;
        let health = self.ctx.bus_health(bus)?;
        Some(health.to_packet(settings.fd_enabled, settings.brs_enabled))
    }

    pub fn rx_len(&self, bus: u8) -> usize {
        self.rx.get(bus as usize).map_or(0, |q| q.lock().len())
    }

    pub fn tx_len(&self, bus: u8) -> usize {
        self.tx.get(bus as usize).map_or(0, |q| q.lock().len())
    }
}

fn log_transitions(bus: u8, transitions: &Transitions) {
    for state in transitions {
        match state {
            BusState::BusOff => warn!("Bus {} is now bus-off", bus),
            BusState::Passive => debug!("Bus {} is now error passive", bus),
            BusState::Active => debug!("Bus {} is now error active", bus),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use panda_can::{MockController, MockHandle};
    use panda_safety::SafetyMode;

    fn setup(capacity: usize) -> (BusManager, [MockHandle; BUS_COUNT]) {
        let config = BridgeConfig {
            queue_capacity: capacity,
            ..BridgeConfig::default()
        };
        let ctx = Arc::new(BridgeContext::new(&config, Duration::ZERO).unwrap());
        let manager = BusManager::new(ctx, capacity);
        let handles = std::array::from_fn(|bus| {
            let controller = MockController::new(bus as u8);
            let handle = controller.handle();
            manager.attach(Box::new(controller)).unwrap();
            handle
        });
        (manager, handles)
    }

    fn frame(bus: u8, address: u32, data: &[u8]) -> CanMessage {
        CanMessage::new_standard(bus, address, data).unwrap()
    }

    fn allow_all(manager: &BusManager) {
        manager
            .context()
            .safety
            .select_mode(SafetyMode::AllOutput.into(), 0)
            .unwrap();
    }

    #[test]
    fn test_rejected_tx_echoed_not_sent() {
        let (manager, handles) = setup(8);
        let msg = frame(0, 0x123, &[1, 2, 3]);

        assert_eq!(manager.enqueue_tx(msg).unwrap(), TxOutcome::Rejected);
        assert_eq!(manager.tx_len(0), 0);
        assert_eq!(manager.service_tx(8, Duration::ZERO), 0);
        assert!(handles[0].sent().is_empty());

        let echoed = manager.dequeue_rx_batch(1024);
        assert_eq!(echoed.len(), 1);
        assert!(echoed[0].returned());
        assert!(echoed[0].rejected());
        assert_eq!(echoed[0].data(), msg.data());
        assert_eq!(manager.context().safety.counters().tx_blocked, 1);
    }

    #[test]
    fn test_allowed_tx_sent_and_echoed() {
        let (manager, handles) = setup(8);
        allow_all(&manager);
        let msg = frame(1, 0x200, &[9]);

        assert_eq!(manager.enqueue_tx(msg).unwrap(), TxOutcome::Queued);
        assert_eq!(manager.service_tx(8, Duration::ZERO), 1);
        assert_eq!(handles[1].sent(), vec![msg]);

        let echoed = manager.dequeue_rx_batch(1024);
        assert_eq!(echoed.len(), 1);
        assert!(echoed[0].returned());
        assert!(!echoed[0].rejected());
        assert_eq!(manager.context().bus_health(1).unwrap().total_tx, 1);
    }

    #[test]
    fn test_busy_mailbox_keeps_message_queued() {
        let (manager, handles) = setup(8);
        allow_all(&manager);
        handles[0].set_busy(true);
        manager.enqueue_tx(frame(0, 0x10, &[1])).unwrap();
        manager.enqueue_tx(frame(0, 0x11, &[2])).unwrap();

        assert_eq!(manager.service_tx(8, Duration::ZERO), 0);
        assert_eq!(manager.tx_len(0), 2);

        handles[0].set_busy(false);
        assert_eq!(manager.service_tx(8, Duration::ZERO), 2);
        let sent: Vec<u32> = handles[0].sent().iter().map(|m| m.address()).collect();
        assert_eq!(sent, vec![0x10, 0x11]);
        assert_eq!(manager.context().metrics.snapshot().tx_busy_retries, 1);
    }

    #[test]
    fn test_tx_budget_per_bus() {
        let (manager, handles) = setup(16);
        allow_all(&manager);
        for i in 0..10 {
            manager.enqueue_tx(frame(2, 0x100 + i, &[])).unwrap();
        }
        assert_eq!(manager.service_tx(4, Duration::ZERO), 4);
        assert_eq!(manager.tx_len(2), 6);
        assert_eq!(handles[2].sent().len(), 4);
    }

    #[test]
    fn test_bus_off_refuses_tx() {
        let (manager, _handles) = setup(8);
        allow_all(&manager);
        manager.on_hardware_event(
            HardwareEvent::Error {
                bus: 0,
                code: CanErrorCode::Offline,
            },
            Duration::ZERO,
        );
        assert!(matches!(
            manager.enqueue_tx(frame(0, 0x10, &[])),
            Err(DriverError::BusOff { bus: 0 })
        ));
        // 其他总线不受影响
        assert!(manager.enqueue_tx(frame(1, 0x10, &[])).is_ok());
    }

    #[test]
    fn test_recovery_reinitialises_controller() {
        let (manager, handles) = setup(8);
        manager.on_hardware_event(
            HardwareEvent::Error {
                bus: 1,
                code: CanErrorCode::Offline,
            },
            Duration::from_secs(1),
        );
        assert_eq!(manager.tick(Duration::from_millis(1050)), 0);
        assert_eq!(manager.tick(Duration::from_millis(1100)), 1);
        assert_eq!(handles[1].resets(), 1);
        assert_eq!(
            manager.context().bus_health(1).unwrap().state,
            BusState::Active
        );
    }

    #[test]
    fn test_silent_bus_refuses_tx() {
        let (manager, handles) = setup(8);
        allow_all(&manager);
        manager.set_silent(2, true).unwrap();
        assert!(handles[2].settings().unwrap().silent);
        assert!(matches!(
            manager.enqueue_tx(frame(2, 0x10, &[])),
            Err(DriverError::BusSilent { bus: 2 })
        ));
    }

    #[test]
    fn test_missing_controller_is_invalid_bus() {
        let ctx = Arc::new(BridgeContext::new(&BridgeConfig::default(), Duration::ZERO).unwrap());
        let manager = BusManager::new(ctx, 4);
        assert!(matches!(
            manager.enqueue_tx(frame(1, 0x10, &[])),
            Err(DriverError::InvalidBus { bus: 1 })
        ));
        assert!(manager.set_fd_enabled(1, true).is_err());
    }

    #[test]
    fn test_hardware_frame_delivered_even_if_rx_invalid() {
        let (manager, _handles) = setup(8);
        manager
            .context()
            .safety
            .select_mode(SafetyMode::Toyota.into(), 0)
            .unwrap();
        // 长度不符的 PCM_CRUISE 报文：rx_hook 判定无效，但仍交付主机
        manager.on_hardware_frame(frame(0, 0x1D2, &[0x20, 0, 0]));
        assert_eq!(manager.rx_len(0), 1);
        assert_eq!(manager.context().safety.counters().rx_invalid, 1);
    }

    #[test]
    fn test_fd_auto_promotion_is_one_way() {
        let (manager, _handles) = setup(8);
        let classic = frame(0, 0x10, &[1]);
        manager.on_hardware_frame(classic);
        assert!(!manager.context().bus_settings(0).unwrap().fd_enabled);

        let fd = frame(0, 0x11, &[0; 12]);
        manager.on_hardware_frame(fd);
        let settings = manager.context().bus_settings(0).unwrap();
        assert!(settings.fd_enabled);
        assert!(!settings.brs_enabled);

        manager.on_hardware_frame(frame(0, 0x12, &[0; 16]).with_fd(true));
        manager.on_hardware_frame(classic);
        let settings = manager.context().bus_settings(0).unwrap();
        assert!(settings.fd_enabled);
        assert!(settings.brs_enabled);

        let metrics = manager.context().metrics.snapshot();
        assert_eq!(metrics.fd_promotions, 1);
        assert_eq!(metrics.brs_promotions, 1);

        let health = manager.context().bus_health(0).unwrap();
        assert_eq!(health.fd_frames, 2);
        assert_eq!(health.brs_frames, 1);
    }

    #[test]
    fn test_forwarding_goes_through_tx_hook() {
        let (manager, handles) = setup(8);
        manager
            .context()
            .safety
            .select_mode(SafetyMode::Toyota.into(), 0)
            .unwrap();

        // 摄像头 → 主总线：被替换的 STEERING_LKA 不转发
        manager.on_hardware_frame(frame(2, 0x2E4, &[0; 5]));
        // 主总线 → 摄像头：转发目标地址不在 TOYOTA 白名单中，被 tx_hook 拒绝
        manager.on_hardware_frame(frame(0, 0x123, &[1]));
        assert_eq!(manager.tx_len(0), 0);
        assert_eq!(manager.tx_len(2), 0);

        let metrics = manager.context().metrics.snapshot();
        assert_eq!(metrics.forward_rejected, 1);
        assert_eq!(metrics.forwarded, 0);
        // 被拒绝的转发副本不回显给主机
        assert_eq!(manager.rx_len(0), 1);
        assert_eq!(manager.rx_len(2), 1);
        assert!(handles[2].sent().is_empty());
    }

    #[test]
    fn test_forwarded_copy_sent_without_echo() {
        let (manager, handles) = setup(8);
        manager
            .context()
            .safety
            .select_mode(SafetyMode::AllOutput.into(), 1)
            .unwrap();

        manager.on_hardware_frame(frame(0, 0x321, &[7]));
        assert_eq!(manager.tx_len(2), 1);
        assert_eq!(manager.service_tx(8, Duration::ZERO), 1);
        assert_eq!(handles[2].sent()[0].bus(), 2);
        assert_eq!(handles[2].sent()[0].address(), 0x321);

        // 只有原始帧进入 RX，转发副本没有回执
        let rx = manager.dequeue_rx_batch(1024);
        assert_eq!(rx.len(), 1);
        assert!(!rx[0].returned());
        assert_eq!(manager.context().bus_health(0).unwrap().total_forwarded, 1);
    }

    #[test]
    fn test_rx_overflow_drops_newest() {
        let capacity = 4;
        let (manager, _handles) = setup(capacity);
        for i in 0..(2 * capacity) as u32 {
            manager.on_hardware_frame(frame(1, 0x100 + i, &[i as u8]));
        }
        let health = manager.context().bus_health(1).unwrap();
        assert_eq!(health.rx_overflow, capacity as u32);

        let retained: Vec<u32> = manager
            .dequeue_rx_batch(usize::MAX)
            .iter()
            .map(|m| m.address())
            .collect();
        assert_eq!(retained, vec![0x100, 0x101, 0x102, 0x103]);
    }

    #[test]
    fn test_tx_overflow_counted() {
        let (manager, handles) = setup(2);
        allow_all(&manager);
        handles[0].set_busy(true);
        manager.enqueue_tx(frame(0, 1, &[])).unwrap();
        manager.enqueue_tx(frame(0, 2, &[])).unwrap();
        assert!(matches!(
            manager.enqueue_tx(frame(0, 3, &[])),
            Err(DriverError::QueueFull { bus: 0 })
        ));
        assert_eq!(manager.context().bus_health(0).unwrap().tx_overflow, 1);
    }

    #[test]
    fn test_batch_respects_budget_and_order() {
        let (manager, _handles) = setup(16);
        for i in 0..4 {
            manager.on_hardware_frame(frame(0, 0x10 + i, &[0; 8]));
            manager.on_hardware_frame(frame(1, 0x20 + i, &[0; 8]));
        }
        // 每条 14 字节，预算 50 字节只能放下 3 条
        let batch = manager.dequeue_rx_batch(50);
        assert_eq!(batch.len(), 3);
        assert!(batch.iter().map(CanMessage::wire_len).sum::<usize>() <= 50);

        let mut all = batch;
        all.extend(manager.dequeue_rx_batch(usize::MAX));
        assert_eq!(all.len(), 8);
        for bus in 0..2u8 {
            let order: Vec<u32> = all
                .iter()
                .filter(|m| m.bus() == bus)
                .map(|m| m.address() & 0xF)
                .collect();
            assert_eq!(order, vec![0, 1, 2, 3]);
        }
    }

    #[test]
    fn test_batch_smaller_than_one_packet() {
        let (manager, _handles) = setup(4);
        manager.on_hardware_frame(frame(0, 0x10, &[0; 8]));
        assert!(manager.dequeue_rx_batch(13).is_empty());
        assert_eq!(manager.rx_len(0), 1);
    }

    #[test]
    fn test_dequeue_tx_round_robin() {
        let (manager, _handles) = setup(8);
        allow_all(&manager);
        manager.enqueue_tx(frame(0, 0xA, &[])).unwrap();
        manager.enqueue_tx(frame(0, 0xB, &[])).unwrap();
        manager.enqueue_tx(frame(1, 0xC, &[])).unwrap();

        let mut drained = Vec::new();
        while let Some(msg) = manager.dequeue_tx() {
            drained.push(msg.address());
        }
        assert_eq!(drained.len(), 3);
        let bus0: Vec<u32> = drained.iter().copied().filter(|a| *a != 0xC).collect();
        assert_eq!(bus0, vec![0xA, 0xB]);
    }

    #[test]
    fn test_set_speed_validates_and_applies() {
        let (manager, handles) = setup(4);
        assert!(manager.set_speed(0, 333, 2000).is_err());
        manager.set_speed(0, 250, 5000).unwrap();
        let settings = handles[0].settings().unwrap();
        assert_eq!(settings.nominal_kbps, 250);
        assert_eq!(settings.data_kbps, 5000);
        assert_eq!(manager.context().bus_settings(0).unwrap().nominal_kbps, 250);
    }

    #[test]
    fn test_failed_configure_keeps_previous_settings() {
        let (manager, handles) = setup(4);
        handles[1].set_fail_configure(true);
        assert!(manager.set_fd_enabled(1, true).is_err());
        assert!(!manager.context().bus_settings(1).unwrap().fd_enabled);
    }

    #[test]
    fn test_reset_clears_queues_and_health_keeps_mode() {
        let (manager, handles) = setup(4);
        manager
            .context()
            .safety
            .select_mode(SafetyMode::Honda.into(), 0)
            .unwrap();
        for i in 0..8 {
            manager.on_hardware_frame(frame(0, 0x100 + i, &[]));
        }
        manager.on_hardware_event(
            HardwareEvent::Error {
                bus: 0,
                code: CanErrorCode::Crc,
            },
            Duration::ZERO,
        );

        manager.reset();
        assert_eq!(manager.rx_len(0), 0);
        assert_eq!(manager.tx_len(2), 0);
        assert_eq!(
            manager.context().bus_health(0).unwrap(),
            panda_can::BusHealth::default()
        );
        assert_eq!(manager.context().safety.mode(), SafetyMode::Honda);
        assert_eq!(handles[0].resets(), 1);
    }

    #[test]
    fn test_can_health_packet_reflects_settings() {
        let (manager, _handles) = setup(4);
        manager.set_fd_enabled(2, true).unwrap();
        let packet = manager.can_health(2).unwrap();
        assert!(packet.fd_enabled);
        assert!(!packet.brs_enabled);
        assert!(manager.can_health(3).is_none());
    }
}
