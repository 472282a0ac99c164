//! 总线健康跟踪
//!
//! 按 ISO 11898 的错误计数规则维护每条总线的 TEC/REC 与状态机
//! （阈值取 [`ErrorThresholds`] 的默认值）：
//!
//! ```text
//!         max(TEC,REC) > warning          TEC > passive / OFFLINE
//! Active ──────────────────────> Passive ──────────────────────> BusOff
//!   ▲                               │                               │
//!   └──────── 两者都 ≤ warning ───────┘                               │
//!   ▲                                                               │
//!   └──────────── 恢复延时到期（tick / 硬件恢复通知）──────────────────┘
//! ```
//!
//! `warning` 是计数器仍处于告警区的上限（默认 127），`passive` 是仍处于
//! Error Passive 的上限（默认 255）。另有更低的 `flag` 级别（默认 96），
//! 只置位健康包里的 warning 标志，不引起状态迁移。
//!
//! 所有计数器都是饱和运算，不会回绕。

use crate::{CanErrorCode, ErrorClass};
use panda_protocol::{BUS_COUNT, BusStateCode, CanHealthPacket};
use smallvec::SmallVec;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 默认告警标志级别（max(TEC, REC) 达到该值置位 warning 标志）
pub const DEFAULT_WARNING_FLAG_LEVEL: u32 = 96;

/// 默认告警阈值（计数超过该值进入 Passive）
pub const DEFAULT_WARNING_THRESHOLD: u32 = 127;

/// 默认 Passive 阈值（TEC 超过该值进入 Bus-Off）
pub const DEFAULT_PASSIVE_THRESHOLD: u32 = 255;

/// 单次发送错误的 TEC 增量
pub const TX_ERROR_WEIGHT: u32 = 8;

/// 单次接收错误的 REC 增量
pub const RX_ERROR_WEIGHT: u32 = 1;

/// 总线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusState {
    #[default]
    Active,
    Passive,
    BusOff,
}

impl From<BusState> for BusStateCode {
    fn from(state: BusState) -> Self {
        match state {
            BusState::Active => BusStateCode::Active,
            BusState::Passive => BusStateCode::Passive,
            BusState::BusOff => BusStateCode::BusOff,
        }
    }
}

/// 一次事件引起的状态迁移序列（按发生顺序）
///
/// 最多两步：Active → Passive → BusOff。
pub type Transitions = SmallVec<[BusState; 2]>;

/// 溢出方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overflow {
    Tx,
    Rx,
}

/// 错误计数阈值
///
/// - `Active → Passive`：max(TEC, REC) > `warning`
/// - `Passive → BusOff`：TEC > `passive`，或控制器显式报告 Bus-Off
/// - `Passive → Active`：两个计数都回落到 ≤ `warning`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorThresholds {
    /// 置位 warning 标志的级别（≥）
    pub flag: u32,
    pub warning: u32,
    pub passive: u32,
}

impl Default for ErrorThresholds {
    fn default() -> Self {
        Self {
            flag: DEFAULT_WARNING_FLAG_LEVEL,
            warning: DEFAULT_WARNING_THRESHOLD,
            passive: DEFAULT_PASSIVE_THRESHOLD,
        }
    }
}

/// 错误状态阈值与 Bus-Off 恢复策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    pub thresholds: ErrorThresholds,
    /// 进入 Bus-Off 后的基础恢复延时
    pub recovery_delay: Duration,
    /// 恢复延时翻倍的上限
    pub max_recovery_delay: Duration,
    /// 距上次恢复在此窗口内再次 Bus-Off 视为"重复 Bus-Off"
    pub rapid_bus_off_window: Duration,
    /// 连续重复 Bus-Off 达到该次数后停止自动恢复
    pub max_rapid_recoveries: u32,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            thresholds: ErrorThresholds::default(),
            recovery_delay: Duration::from_millis(100),
            max_recovery_delay: Duration::from_millis(3200),
            rapid_bus_off_window: Duration::from_secs(1),
            max_rapid_recoveries: 5,
        }
    }
}

/// 单条总线的健康快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusHealth {
    pub state: BusState,
    pub tx_errors: u32,
    pub rx_errors: u32,
    pub tx_overflow: u32,
    pub rx_overflow: u32,
    pub last_error: CanErrorCode,
    /// max(TEC, REC) 达到告警标志级别
    pub warning: bool,
    pub arbitration_lost: u32,
    pub fd_frames: u32,
    pub brs_frames: u32,
    pub fd_error_signalling: u32,
    pub bus_off_count: u32,
    /// 重复 Bus-Off 累计次数
    pub repeated_bus_offs: u32,
    /// 当前连续重复 Bus-Off 次数（一次正常间隔的 Bus-Off 清零）
    pub consecutive_rapid_bus_offs: u32,
    /// 自动恢复已停止，需要显式复位
    pub recovery_suspended: bool,
    pub recoveries: u32,
    pub total_tx: u32,
    pub total_rx: u32,
    pub total_forwarded: u32,
}

impl BusHealth {
    pub fn is_passive(&self) -> bool {
        self.state == BusState::Passive
    }

    pub fn is_bus_off(&self) -> bool {
        self.state == BusState::BusOff
    }

    /// 组装 CAN 健康包（FD/BRS 使能来自总线配置）
    pub fn to_packet(&self, fd_enabled: bool, brs_enabled: bool) -> CanHealthPacket {
        CanHealthPacket {
            bus_state: self.state.into(),
            warning: self.warning,
            passive: self.is_passive(),
            bus_off: self.is_bus_off(),
            fd_enabled,
            brs_enabled,
            repeated_bus_off: self.consecutive_rapid_bus_offs > 0,
            last_error: self.last_error.into(),
            tx_errors: self.tx_errors,
            rx_errors: self.rx_errors,
            tx_overflow: self.tx_overflow,
            rx_overflow: self.rx_overflow,
            bus_off_count: self.bus_off_count,
            arbitration_lost: self.arbitration_lost,
            fd_frames: self.fd_frames,
            brs_frames: self.brs_frames,
            fd_error_signalling: self.fd_error_signalling,
            recoveries: self.recoveries,
            total_tx: self.total_tx,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BusRecord {
    health: BusHealth,
    /// Bus-Off 恢复截止时间（自启动起）
    deadline: Option<Duration>,
    /// 当前恢复延时（重复 Bus-Off 时翻倍）
    delay: Duration,
    last_recovery_at: Option<Duration>,
}

impl BusRecord {
    fn new(policy: &RecoveryPolicy) -> Self {
        Self {
            health: BusHealth::default(),
            deadline: None,
            delay: policy.recovery_delay,
            last_recovery_at: None,
        }
    }

    fn max_errors(&self) -> u32 {
        self.health.tx_errors.max(self.health.rx_errors)
    }

    /// 错误累积后的状态推进
    fn escalate(
        &mut self,
        bus: u8,
        explicit_bus_off: bool,
        now: Duration,
        policy: &RecoveryPolicy,
    ) -> Transitions {
        let mut transitions = Transitions::new();
        let limits = &policy.thresholds;
        self.health.warning = self.max_errors() >= limits.flag;
        let to_bus_off = explicit_bus_off || self.health.tx_errors > limits.passive;

        match self.health.state {
            BusState::Active => {
                if to_bus_off || self.max_errors() > limits.warning {
                    self.health.state = BusState::Passive;
                    transitions.push(BusState::Passive);
                    debug!("Bus {} entered error passive", bus);
                }
                if to_bus_off {
                    self.enter_bus_off(bus, now, policy);
                    transitions.push(BusState::BusOff);
                }
            },
            BusState::Passive => {
                if to_bus_off {
                    self.enter_bus_off(bus, now, policy);
                    transitions.push(BusState::BusOff);
                }
            },
            BusState::BusOff => {},
        }
        transitions
    }

    /// 成功收发后的状态回落
    fn relax(&mut self, bus: u8, limits: &ErrorThresholds) -> Transitions {
        let mut transitions = Transitions::new();
        self.health.warning = self.max_errors() >= limits.flag;
        if self.health.state == BusState::Passive && self.max_errors() <= limits.warning {
            self.health.state = BusState::Active;
            transitions.push(BusState::Active);
            debug!("Bus {} back to error active", bus);
        }
        transitions
    }

    fn enter_bus_off(&mut self, bus: u8, now: Duration, policy: &RecoveryPolicy) {
        let health = &mut self.health;
        health.state = BusState::BusOff;
        health.bus_off_count = health.bus_off_count.saturating_add(1);

        let rapid = self
            .last_recovery_at
            .is_some_and(|at| now.saturating_sub(at) <= policy.rapid_bus_off_window);

        if rapid {
            health.repeated_bus_offs = health.repeated_bus_offs.saturating_add(1);
            health.consecutive_rapid_bus_offs = health.consecutive_rapid_bus_offs.saturating_add(1);
            self.delay = self.delay.saturating_mul(2).min(policy.max_recovery_delay);
            warn!(
                "Bus {} repeated bus-off ({} consecutive), recovery delay {:?}",
                bus, health.consecutive_rapid_bus_offs, self.delay
            );

            if health.consecutive_rapid_bus_offs >= policy.max_rapid_recoveries {
                health.recovery_suspended = true;
                self.deadline = None;
                warn!(
                    "Bus {} automatic recovery suspended after {} rapid bus-offs",
                    bus, health.consecutive_rapid_bus_offs
                );
                return;
            }
        } else {
            health.consecutive_rapid_bus_offs = 0;
            self.delay = policy.recovery_delay;
            warn!("Bus {} entered bus-off, recovery in {:?}", bus, self.delay);
        }

        self.deadline = Some(now.saturating_add(self.delay));
    }

    fn recovery_due(&self, now: Duration) -> bool {
        self.health.state == BusState::BusOff
            && !self.health.recovery_suspended
            && self.deadline.is_some_and(|deadline| now >= deadline)
    }

    fn recover(&mut self, bus: u8, now: Duration) {
        let health = &mut self.health;
        health.state = BusState::Active;
        health.tx_errors = 0;
        health.rx_errors = 0;
        health.warning = false;
        health.recoveries = health.recoveries.saturating_add(1);
        self.last_recovery_at = Some(now);
        self.deadline = None;
        info!("Bus {} recovered from bus-off", bus);
    }
}

/// 所有总线的健康跟踪器
///
/// 只有跟踪器会修改 [`BusHealth`]；其他组件通过 [`snapshot`](Self::snapshot) 读取。
/// 时间参数 `now` 均为自启动起的单调时间。
///
/// # 示例
///
/// ```rust
/// use panda_can::{BusHealthTracker, BusState, CanErrorCode, RecoveryPolicy};
/// use std::time::Duration;
///
/// let mut tracker = BusHealthTracker::new(RecoveryPolicy::default());
/// let now = Duration::from_secs(1);
/// tracker.on_hardware_error(0, CanErrorCode::Offline, now);
/// assert!(tracker.is_bus_off(0));
///
/// tracker.tick(0, now + Duration::from_millis(100));
/// assert_eq!(tracker.snapshot(0).unwrap().state, BusState::Active);
/// ```
#[derive(Debug, Clone)]
pub struct BusHealthTracker {
    policy: RecoveryPolicy,
    buses: [BusRecord; BUS_COUNT],
}

impl BusHealthTracker {
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self {
            policy,
            buses: std::array::from_fn(|_| BusRecord::new(&policy)),
        }
    }

    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    fn record_mut(&mut self, bus: u8) -> Option<&mut BusRecord> {
        let record = self.buses.get_mut(bus as usize);
        if record.is_none() {
            warn!("Health event for unknown bus {} ignored", bus);
        }
        record
    }

    /// 控制器上报协议错误
    ///
    /// 无论当前状态如何，都会累加对应计数并记录 `last_error`。
    pub fn on_hardware_error(&mut self, bus: u8, code: CanErrorCode, now: Duration) -> Transitions {
        let policy = self.policy;
        let Some(record) = self.record_mut(bus) else {
            return Transitions::new();
        };

        record.health.last_error = code;
        let explicit_bus_off = match code.class() {
            ErrorClass::Transmit => {
                record.health.tx_errors = record.health.tx_errors.saturating_add(TX_ERROR_WEIGHT);
                false
            },
            ErrorClass::Receive => {
                record.health.rx_errors = record.health.rx_errors.saturating_add(RX_ERROR_WEIGHT);
                false
            },
            ErrorClass::BusOff => true,
            ErrorClass::None => false,
        };

        record.escalate(bus, explicit_bus_off, now, &policy)
    }

    /// 一帧发送成功
    pub fn on_frame_sent(&mut self, bus: u8) -> Transitions {
        let limits = self.policy.thresholds;
        let Some(record) = self.record_mut(bus) else {
            return Transitions::new();
        };
        record.health.tx_errors = record.health.tx_errors.saturating_sub(1);
        record.health.total_tx = record.health.total_tx.saturating_add(1);
        record.relax(bus, &limits)
    }

    /// 一帧接收成功
    pub fn on_frame_received(&mut self, bus: u8) -> Transitions {
        let limits = self.policy.thresholds;
        let Some(record) = self.record_mut(bus) else {
            return Transitions::new();
        };
        record.health.rx_errors = record.health.rx_errors.saturating_sub(1);
        record.health.total_rx = record.health.total_rx.saturating_add(1);
        record.relax(bus, &limits)
    }

    /// 推进恢复定时器，返回本次是否完成恢复
    pub fn tick(&mut self, bus: u8, now: Duration) -> bool {
        let Some(record) = self.record_mut(bus) else {
            return false;
        };
        if record.recovery_due(now) {
            record.recover(bus, now);
            true
        } else {
            false
        }
    }

    /// 推进所有总线的恢复定时器，返回完成恢复的总线数
    pub fn tick_all(&mut self, now: Duration) -> usize {
        (0..BUS_COUNT as u8).filter(|&bus| self.tick(bus, now)).count()
    }

    /// 控制器报告已恢复
    ///
    /// 只有恢复延时已到期时才生效，提前的通知被忽略。
    pub fn on_bus_recovered(&mut self, bus: u8, now: Duration) -> bool {
        let Some(record) = self.record_mut(bus) else {
            return false;
        };
        if record.recovery_due(now) {
            record.recover(bus, now);
            true
        } else {
            debug!("Bus {} hardware recovery ignored (deadline not reached)", bus);
            false
        }
    }

    pub fn on_overflow(&mut self, bus: u8, direction: Overflow) {
        if let Some(record) = self.record_mut(bus) {
            let counter = match direction {
                Overflow::Tx => &mut record.health.tx_overflow,
                Overflow::Rx => &mut record.health.rx_overflow,
            };
            *counter = counter.saturating_add(1);
        }
    }

    pub fn on_arbitration_lost(&mut self, bus: u8) {
        if let Some(record) = self.record_mut(bus) {
            record.health.arbitration_lost = record.health.arbitration_lost.saturating_add(1);
        }
    }

    /// 收到 CAN-FD 帧（可选 BRS）
    pub fn on_fd_frame(&mut self, bus: u8, brs: bool) {
        if let Some(record) = self.record_mut(bus) {
            record.health.fd_frames = record.health.fd_frames.saturating_add(1);
            if brs {
                record.health.brs_frames = record.health.brs_frames.saturating_add(1);
            }
        }
    }

    pub fn on_fd_error_signalling(&mut self, bus: u8) {
        if let Some(record) = self.record_mut(bus) {
            record.health.fd_error_signalling =
                record.health.fd_error_signalling.saturating_add(1);
        }
    }

    pub fn on_forwarded(&mut self, bus: u8) {
        if let Some(record) = self.record_mut(bus) {
            record.health.total_forwarded = record.health.total_forwarded.saturating_add(1);
        }
    }

    pub fn is_bus_off(&self, bus: u8) -> bool {
        self.buses
            .get(bus as usize)
            .is_some_and(|record| record.health.is_bus_off())
    }

    pub fn snapshot(&self, bus: u8) -> Option<BusHealth> {
        self.buses.get(bus as usize).map(|record| record.health)
    }

    /// 清零单条总线（包括停止自动恢复的锁存状态）
    pub fn reset(&mut self, bus: u8) {
        let policy = self.policy;
        if let Some(record) = self.record_mut(bus) {
            *record = BusRecord::new(&policy);
        }
    }

    pub fn reset_all(&mut self) {
        let policy = self.policy;
        for record in &mut self.buses {
            *record = BusRecord::new(&policy);
        }
    }
}

impl Default for BusHealthTracker {
    fn default() -> Self {
        Self::new(RecoveryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn drive_to_bus_off(tracker: &mut BusHealthTracker, bus: u8, now: Duration) {
        tracker.on_hardware_error(bus, CanErrorCode::Offline, now);
        assert!(tracker.is_bus_off(bus));
    }

    #[test]
    fn test_transmit_errors_walk_all_states() {
        let mut tracker = BusHealthTracker::default();

        for _ in 0..12 {
            tracker.on_hardware_error(0, CanErrorCode::Ack, ms(0));
        }
        let health = tracker.snapshot(0).unwrap();
        assert_eq!(health.tx_errors, 96);
        assert!(health.warning);
        assert_eq!(health.state, BusState::Active);

        for _ in 0..4 {
            tracker.on_hardware_error(0, CanErrorCode::Bit0, ms(0));
        }
        assert_eq!(tracker.snapshot(0).unwrap().state, BusState::Passive);

        for _ in 0..16 {
            tracker.on_hardware_error(0, CanErrorCode::Bit1, ms(0));
        }
        let health = tracker.snapshot(0).unwrap();
        assert_eq!(health.tx_errors, 256);
        assert_eq!(health.state, BusState::BusOff);
        assert_eq!(health.bus_off_count, 1);
        assert_eq!(health.last_error, CanErrorCode::Bit1);
    }

    #[test]
    fn test_threshold_boundaries() {
        let mut tracker = BusHealthTracker::default();

        for _ in 0..95 {
            tracker.on_hardware_error(1, CanErrorCode::Crc, ms(0));
        }
        assert!(!tracker.snapshot(1).unwrap().warning);
        tracker.on_hardware_error(1, CanErrorCode::Crc, ms(0));
        assert!(tracker.snapshot(1).unwrap().warning);

        // REC = 127 仍在告警阈值内，128 越过
        for _ in 96..127 {
            tracker.on_hardware_error(1, CanErrorCode::Crc, ms(0));
        }
        let health = tracker.snapshot(1).unwrap();
        assert_eq!(health.rx_errors, 127);
        assert_eq!(health.state, BusState::Active);
        let transitions = tracker.on_hardware_error(1, CanErrorCode::Crc, ms(0));
        assert_eq!(transitions.as_slice(), &[BusState::Passive]);

        // TEC = 255 仍为 Passive
        for _ in 0..31 {
            tracker.on_hardware_error(0, CanErrorCode::Ack, ms(0));
        }
        tracker.on_frame_sent(0);
        tracker.on_hardware_error(0, CanErrorCode::Ack, ms(0));
        let health = tracker.snapshot(0).unwrap();
        assert_eq!(health.tx_errors, 255);
        assert_eq!(health.state, BusState::Passive);

        // TEC = 256 进入 Bus-Off
        for _ in 0..32 {
            tracker.on_hardware_error(2, CanErrorCode::Ack, ms(0));
        }
        let health = tracker.snapshot(2).unwrap();
        assert_eq!(health.tx_errors, 256);
        assert_eq!(health.state, BusState::BusOff);
    }

    #[test]
    fn test_custom_thresholds() {
        let policy = RecoveryPolicy {
            thresholds: ErrorThresholds {
                flag: 8,
                warning: 16,
                passive: 32,
            },
            ..RecoveryPolicy::default()
        };
        let mut tracker = BusHealthTracker::new(policy);

        tracker.on_hardware_error(0, CanErrorCode::Ack, ms(0));
        let health = tracker.snapshot(0).unwrap();
        assert!(health.warning);
        assert_eq!(health.state, BusState::Active);

        tracker.on_hardware_error(0, CanErrorCode::Ack, ms(0));
        assert_eq!(tracker.snapshot(0).unwrap().state, BusState::Active);
        tracker.on_hardware_error(0, CanErrorCode::Ack, ms(0));
        assert_eq!(tracker.snapshot(0).unwrap().state, BusState::Passive);

        tracker.on_hardware_error(0, CanErrorCode::Ack, ms(0));
        assert_eq!(tracker.snapshot(0).unwrap().state, BusState::Passive);
        tracker.on_hardware_error(0, CanErrorCode::Ack, ms(0));
        assert!(tracker.is_bus_off(0));
    }

    #[test]
    fn test_receive_errors_never_cause_bus_off() {
        let mut tracker = BusHealthTracker::default();
        for _ in 0..300 {
            tracker.on_hardware_error(1, CanErrorCode::Crc, ms(0));
        }
        let health = tracker.snapshot(1).unwrap();
        assert_eq!(health.rx_errors, 300);
        assert_eq!(health.state, BusState::Passive);
    }

    #[test]
    fn test_explicit_bus_off_passes_through_passive() {
        let mut tracker = BusHealthTracker::default();
        let transitions = tracker.on_hardware_error(0, CanErrorCode::Offline, ms(0));
        assert_eq!(transitions.as_slice(), &[BusState::Passive, BusState::BusOff]);
    }

    #[test]
    fn test_passive_returns_to_active() {
        let mut tracker = BusHealthTracker::default();
        for _ in 0..128 {
            tracker.on_hardware_error(0, CanErrorCode::Stuff, ms(0));
        }
        assert_eq!(tracker.snapshot(0).unwrap().state, BusState::Passive);

        let transitions = tracker.on_frame_received(0);
        assert_eq!(transitions.as_slice(), &[BusState::Active]);
        let health = tracker.snapshot(0).unwrap();
        assert_eq!(health.rx_errors, 127);
        assert_eq!(health.total_rx, 1);
    }

    #[test]
    fn test_success_decrements_saturate_at_zero() {
        let mut tracker = BusHealthTracker::default();
        tracker.on_frame_sent(0);
        tracker.on_frame_received(0);
        let health = tracker.snapshot(0).unwrap();
        assert_eq!(health.tx_errors, 0);
        assert_eq!(health.rx_errors, 0);
        assert_eq!(health.total_tx, 1);
    }

    #[test]
    fn test_recovery_after_delay() {
        let mut tracker = BusHealthTracker::default();
        drive_to_bus_off(&mut tracker, 0, ms(1000));

        assert!(!tracker.tick(0, ms(1050)));
        assert!(tracker.is_bus_off(0));

        assert!(tracker.tick(0, ms(1100)));
        let health = tracker.snapshot(0).unwrap();
        assert_eq!(health.state, BusState::Active);
        assert_eq!(health.tx_errors, 0);
        assert_eq!(health.recoveries, 1);
    }

    #[test]
    fn test_errors_counted_while_bus_off() {
        let mut tracker = BusHealthTracker::default();
        drive_to_bus_off(&mut tracker, 0, ms(0));
        tracker.on_hardware_error(0, CanErrorCode::Form, ms(10));
        let health = tracker.snapshot(0).unwrap();
        assert_eq!(health.rx_errors, 1);
        assert_eq!(health.last_error, CanErrorCode::Form);
        assert_eq!(health.state, BusState::BusOff);
    }

    #[test]
    fn test_hardware_recovery_before_deadline_ignored() {
        let mut tracker = BusHealthTracker::default();
        drive_to_bus_off(&mut tracker, 2, ms(0));
        assert!(!tracker.on_bus_recovered(2, ms(20)));
        assert!(tracker.is_bus_off(2));
        assert!(tracker.on_bus_recovered(2, ms(100)));
        assert!(!tracker.is_bus_off(2));
    }

    #[test]
    fn test_repeated_bus_off_doubles_delay() {
        let mut tracker = BusHealthTracker::default();
        drive_to_bus_off(&mut tracker, 0, ms(0));
        assert!(tracker.tick(0, ms(100)));

        // 恢复后 400ms 内再次 Bus-Off
        drive_to_bus_off(&mut tracker, 0, ms(500));
        let health = tracker.snapshot(0).unwrap();
        assert_eq!(health.repeated_bus_offs, 1);
        assert_eq!(health.consecutive_rapid_bus_offs, 1);
        assert!(health.to_packet(false, false).repeated_bus_off);

        assert!(!tracker.tick(0, ms(650)));
        assert!(tracker.tick(0, ms(700)));
    }

    #[test]
    fn test_slow_bus_off_resets_delay() {
        let mut tracker = BusHealthTracker::default();
        drive_to_bus_off(&mut tracker, 0, ms(0));
        assert!(tracker.tick(0, ms(100)));
        drive_to_bus_off(&mut tracker, 0, ms(200));
        assert!(tracker.tick(0, ms(400)));

        // 距上次恢复超过窗口
        drive_to_bus_off(&mut tracker, 0, ms(5000));
        let health = tracker.snapshot(0).unwrap();
        assert_eq!(health.consecutive_rapid_bus_offs, 0);
        assert_eq!(health.repeated_bus_offs, 1);
        assert!(tracker.tick(0, ms(5100)));
    }

    #[test]
    fn test_recovery_suspended_after_rapid_bus_offs() {
        let policy = RecoveryPolicy {
            max_rapid_recoveries: 2,
            ..RecoveryPolicy::default()
        };
        let mut tracker = BusHealthTracker::new(policy);

        drive_to_bus_off(&mut tracker, 0, ms(0));
        assert!(tracker.tick(0, ms(100)));
        drive_to_bus_off(&mut tracker, 0, ms(150));
        assert!(tracker.tick(0, ms(350)));
        drive_to_bus_off(&mut tracker, 0, ms(400));

        let health = tracker.snapshot(0).unwrap();
        assert!(health.recovery_suspended);
        assert!(!tracker.tick(0, ms(60_000)));
        assert!(!tracker.on_bus_recovered(0, ms(60_000)));
        assert!(tracker.is_bus_off(0));

        tracker.reset(0);
        let health = tracker.snapshot(0).unwrap();
        assert_eq!(health.state, BusState::Active);
        assert!(!health.recovery_suspended);
        assert_eq!(health.bus_off_count, 0);
    }

    #[test]
    fn test_delay_capped() {
        let policy = RecoveryPolicy {
            recovery_delay: ms(100),
            max_recovery_delay: ms(300),
            rapid_bus_off_window: ms(1000),
            max_rapid_recoveries: 10,
            ..RecoveryPolicy::default()
        };
        let mut tracker = BusHealthTracker::new(policy);
        let mut now = ms(0);
        drive_to_bus_off(&mut tracker, 0, now);
        now += ms(100);
        assert!(tracker.tick(0, now));

        // 200ms → 300ms(上限) → 300ms
        for expected in [200, 300, 300] {
            drive_to_bus_off(&mut tracker, 0, now);
            assert!(!tracker.tick(0, now + ms(expected - 1)));
            now += ms(expected);
            assert!(tracker.tick(0, now));
        }
    }

    #[test]
    fn test_unknown_bus_ignored() {
        let mut tracker = BusHealthTracker::default();
        assert!(tracker.on_hardware_error(7, CanErrorCode::Ack, ms(0)).is_empty());
        assert!(tracker.snapshot(7).is_none());
        assert!(!tracker.is_bus_off(7));
        assert!(!tracker.tick(7, ms(0)));
    }

    #[test]
    fn test_auxiliary_counters() {
        let mut tracker = BusHealthTracker::default();
        tracker.on_overflow(1, Overflow::Rx);
        tracker.on_overflow(1, Overflow::Tx);
        tracker.on_overflow(1, Overflow::Tx);
        tracker.on_arbitration_lost(1);
        tracker.on_fd_frame(1, true);
        tracker.on_fd_frame(1, false);
        tracker.on_fd_error_signalling(1);
        tracker.on_forwarded(1);

        let health = tracker.snapshot(1).unwrap();
        assert_eq!(health.rx_overflow, 1);
        assert_eq!(health.tx_overflow, 2);
        assert_eq!(health.arbitration_lost, 1);
        assert_eq!(health.fd_frames, 2);
        assert_eq!(health.brs_frames, 1);
        assert_eq!(health.fd_error_signalling, 1);
        assert_eq!(health.total_forwarded, 1);
    }

    #[test]
    fn test_reset_all() {
        let mut tracker = BusHealthTracker::default();
        for bus in 0..3 {
            drive_to_bus_off(&mut tracker, bus, ms(0));
        }
        tracker.reset_all();
        for bus in 0..3 {
            assert_eq!(tracker.snapshot(bus).unwrap(), BusHealth::default());
        }
    }

    #[test]
    fn test_packet_flags_from_health() {
        let mut tracker = BusHealthTracker::default();
        for _ in 0..16 {
            tracker.on_hardware_error(0, CanErrorCode::Ack, ms(0));
        }
        let packet = tracker.snapshot(0).unwrap().to_packet(true, false);
        assert_eq!(packet.bus_state, BusStateCode::Passive);
        assert!(packet.passive);
        assert!(packet.warning);
        assert!(!packet.bus_off);
        assert!(packet.fd_enabled);
        assert_eq!(packet.last_error, 3);
        assert_eq!(packet.tx_errors, 128);
    }
}
