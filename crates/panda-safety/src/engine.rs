//! 安全引擎
//!
//! 所有状态在一把 `parking_lot::Mutex` 下：模式切换与钩子调用互斥，
//! 任何一帧要么完整地由旧策略判定，要么完整地由新策略判定。

use crate::counters::SafetyCounters;
use crate::heartbeat::{DEFAULT_HEARTBEAT_TIMEOUT, HeartbeatWatchdog, WatchdogStatus};
use crate::policy::{self, SafetyHooks};
use crate::{SafetyError, SafetyMode};
use panda_protocol::CanMessage;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// GM 点火状态报文
const GM_IGNITION_ADDRESS: u32 = 0x1F1;

/// Tesla 点火状态报文
const TESLA_IGNITION_ADDRESS: u32 = 0x221;

/// 安全引擎配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyConfig {
    pub heartbeat_timeout: Duration,
    /// 是否要求主机心跳
    pub heartbeat_required: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            heartbeat_required: true,
        }
    }
}

/// 引擎状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyStatus {
    pub mode: SafetyMode,
    pub param: u16,
    /// 设备级计数器
    pub counters: SafetyCounters,
    /// 当前模式下的计数器
    pub mode_counters: SafetyCounters,
    pub heartbeat_lost: bool,
    pub heartbeat_required: bool,
    pub ignition_can: bool,
    pub controls_allowed: bool,
}

struct EngineState {
    mode: SafetyMode,
    param: u16,
    policy: Box<dyn SafetyHooks>,
    counters: SafetyCounters,
    mode_counters: SafetyCounters,
    watchdog: HeartbeatWatchdog,
    ignition_can: bool,
}

impl EngineState {
    fn install(&mut self, mode: SafetyMode, param: u16, policy: Box<dyn SafetyHooks>) {
        let previous = self.mode;
        self.mode = mode;
        self.param = param;
        self.policy = policy;
        self.mode_counters = SafetyCounters::default();
        info!(
            "Safety mode {} -> {} (param 0x{:04X})",
            previous, mode, param
        );
    }

    fn infer_ignition(&mut self, msg: &CanMessage) {
        if msg.bus() != 0 || msg.is_extended() || msg.len() != 8 {
            return;
        }
        let ignition = match msg.address() {
            GM_IGNITION_ADDRESS => msg.byte(4) & 0x02 != 0,
            TESLA_IGNITION_ADDRESS => (msg.byte(0) >> 5) & 0x03 == 0x03,
            _ => return,
        };
        if ignition != self.ignition_can {
            debug!("CAN ignition {}", if ignition { "on" } else { "off" });
        }
        self.ignition_can = ignition;
    }
}

/// 安全引擎
///
/// 上电处于 `NO_OUTPUT`。`now` 参数均为自启动起的单调时间。
///
/// # 示例
///
/// ```rust
/// use panda_safety::{SafetyConfig, SafetyEngine, SafetyMode};
/// use panda_protocol::CanMessage;
/// use std::time::Duration;
///
/// let engine = SafetyEngine::new(SafetyConfig::default(), Duration::ZERO).unwrap();
/// let msg = CanMessage::new_standard(0, 0x123, &[1, 2, 3]).unwrap();
/// assert!(!engine.tx_hook(&msg));
///
/// engine.select_mode(SafetyMode::AllOutput.into(), 0).unwrap();
/// assert!(engine.tx_hook(&msg));
/// ```
pub struct SafetyEngine {
    state: Mutex<EngineState>,
}

impl SafetyEngine {
    pub fn new(config: SafetyConfig, now: Duration) -> Result<Self, SafetyError> {
        let mut watchdog = HeartbeatWatchdog::new(config.heartbeat_timeout, now)?;
        watchdog.set_enabled(config.heartbeat_required, now);

        Ok(Self {
            state: Mutex::new(EngineState {
                mode: SafetyMode::DEFAULT,
                param: 0,
                policy: Box::new(policy::NoOutputPolicy),
                counters: SafetyCounters::default(),
                mode_counters: SafetyCounters::default(),
                watchdog,
                ignition_can: false,
            }),
        })
    }

    /// 切换安全模式
    ///
    /// - 未注册的模式返回 `UnknownMode`，保持原模式
    /// - 心跳丢失期间只允许切换到 `NO_OUTPUT`
    /// - 只清零模式级计数器
    pub fn select_mode(&self, mode_id: u16, param: u16) -> Result<(), SafetyError> {
        let Some((mode, factory)) = policy::lookup(mode_id) else {
            warn!("Rejected unknown safety mode {}", mode_id);
            return Err(SafetyError::UnknownMode { mode: mode_id });
        };

        let mut state = self.state.lock();
        if state.watchdog.is_lost() && mode != SafetyMode::NoOutput {
            warn!("Rejected safety mode {} while heartbeat is lost", mode);
            return Err(SafetyError::HeartbeatLost);
        }
        state.install(mode, param, factory(param));
        Ok(())
    }

    /// 出站报文判定
    pub fn tx_hook(&self, msg: &CanMessage) -> bool {
        let mut state = self.state.lock();
        let allowed = state.policy.tx_hook(msg);
        state.counters.record_tx(allowed);
        state.mode_counters.record_tx(allowed);
        allowed
    }

    /// 入站报文判定（结果只影响计数和策略状态，不影响交付）
    pub fn rx_hook(&self, msg: &CanMessage) -> bool {
        let mut state = self.state.lock();
        state.infer_ignition(msg);
        let valid = state.policy.rx_hook(msg);
        state.counters.record_rx(valid);
        state.mode_counters.record_rx(valid);
        valid
    }

    /// 转发目标
    pub fn fwd_hook(&self, bus: u8, address: u32) -> Option<u8> {
        self.state.lock().policy.fwd_hook(bus, address)
    }

    /// 主机心跳
    pub fn heartbeat(&self, now: Duration) {
        let mut state = self.state.lock();
        if state.watchdog.is_lost() {
            info!("Heartbeat resumed");
        }
        state.watchdog.feed(now);
    }

    /// 周期检查，返回本次是否因心跳丢失强制切换到 `NO_OUTPUT`
    pub fn tick(&self, now: Duration) -> bool {
        let mut state = self.state.lock();
        match state.watchdog.check(now) {
            WatchdogStatus::Expired => {
                state.counters.record_heartbeat_lost();
                warn!(
                    "Heartbeat lost ({:?} since last), forcing NO_OUTPUT",
                    state.watchdog.time_since_last_heartbeat(now)
                );
                if state.mode != SafetyMode::NoOutput || state.param != 0 {
                    state.install(SafetyMode::NoOutput, 0, Box::new(policy::NoOutputPolicy));
                }
                true
            }
            WatchdogStatus::Alive | WatchdogStatus::Lost => false,
        }
    }

    pub fn set_heartbeat_timeout(&self, timeout: Duration) -> Result<(), SafetyError> {
        self.state.lock().watchdog.set_timeout(timeout)
    }

    /// 启用/禁用心跳要求
    pub fn set_heartbeat_required(&self, required: bool, now: Duration) {
        let mut state = self.state.lock();
        if state.watchdog.is_enabled() != required {
            info!(
                "Heartbeat requirement {}",
                if required { "enabled" } else { "disabled" }
            );
        }
        state.watchdog.set_enabled(required, now);
    }

    pub fn mode(&self) -> SafetyMode {
        self.state.lock().mode
    }

    pub fn param(&self) -> u16 {
        self.state.lock().param
    }

    pub fn counters(&self) -> SafetyCounters {
        self.state.lock().counters
    }

    pub fn ignition_can(&self) -> bool {
        self.state.lock().ignition_can
    }

    pub fn status(&self) -> SafetyStatus {
        let state = self.state.lock();
        SafetyStatus {
            mode: state.mode,
            param: state.param,
            counters: state.counters,
            mode_counters: state.mode_counters,
            heartbeat_lost: state.watchdog.is_lost(),
            heartbeat_required: state.watchdog.is_enabled(),
            ignition_can: state.ignition_can,
            controls_allowed: state.policy.controls_allowed(),
        }
    }
}
