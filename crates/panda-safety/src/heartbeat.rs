//! Heartbeat Watchdog - 检测主机是否仍在发送心跳
//!
//! **时间基准**：所有时间参数均为自启动起的单调时间（`Duration`），
//! 由调用方传入。不读取系统时钟，测试可以精确控制时间。
//!
//! **超时语义**：`now - last_heartbeat > timeout` 时开启一次"丢失周期"，
//! 每个周期只报告一次；下一次心跳关闭周期。

use crate::SafetyError;
use std::time::Duration;

/// 默认心跳超时
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);

/// 心跳超时下限
pub const MIN_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(1);

/// `check` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogStatus {
    /// 心跳正常（或检查已禁用）
    Alive,
    /// 本次检查刚刚开启一个丢失周期
    Expired,
    /// 丢失周期已开启，尚未收到新心跳
    Lost,
}

/// 心跳看门狗
#[derive(Debug, Clone)]
pub struct HeartbeatWatchdog {
    last_heartbeat: Duration,
    timeout: Duration,
    enabled: bool,
    lost: bool,
}

impl HeartbeatWatchdog {
    /// 创建看门狗，`now` 视为最近一次心跳
    ///
    /// # Example
    /// ```
    /// # use panda_safety::heartbeat::{HeartbeatWatchdog, WatchdogStatus};
    /// # use std::time::Duration;
    /// let mut watchdog = HeartbeatWatchdog::new(Duration::from_secs(5), Duration::ZERO).unwrap();
    /// assert_eq!(watchdog.check(Duration::from_secs(5)), WatchdogStatus::Alive);
    /// assert_eq!(watchdog.check(Duration::from_secs(6)), WatchdogStatus::Expired);
    /// assert_eq!(watchdog.check(Duration::from_secs(7)), WatchdogStatus::Lost);
    /// ```
    pub fn new(timeout: Duration, now: Duration) -> Result<Self, SafetyError> {
        validate_timeout(timeout)?;
        Ok(Self {
            last_heartbeat: now,
            timeout,
            enabled: true,
            lost: false,
        })
    }

    /// 登记一次主机心跳，关闭当前丢失周期
    pub fn feed(&mut self, now: Duration) {
        self.last_heartbeat = now;
        self.lost = false;
    }

    /// 检查是否超时
    pub fn check(&mut self, now: Duration) -> WatchdogStatus {
        if !self.enabled {
            return WatchdogStatus::Alive;
        }
        if self.lost {
            return WatchdogStatus::Lost;
        }
        if self.time_since_last_heartbeat(now) > self.timeout {
            self.lost = true;
            WatchdogStatus::Expired
        } else {
            WatchdogStatus::Alive
        }
    }

    /// 丢失周期是否处于开启状态
    pub fn is_lost(&self) -> bool {
        self.enabled && self.lost
    }

    pub fn time_since_last_heartbeat(&self, now: Duration) -> Duration {
        now.saturating_sub(self.last_heartbeat)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> Result<(), SafetyError> {
        validate_timeout(timeout)?;
        self.timeout = timeout;
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 启用/禁用心跳检查
    ///
    /// 重新启用时以 `now` 作为最近一次心跳，避免立即超时。
    pub fn set_enabled(&mut self, enabled: bool, now: Duration) {
        if enabled && !self.enabled {
            self.last_heartbeat = now;
        }
        self.enabled = enabled;
        self.lost = false;
    }
}

fn validate_timeout(timeout: Duration) -> Result<(), SafetyError> {
    if timeout < MIN_HEARTBEAT_TIMEOUT {
        Err(SafetyError::TimeoutTooShort {
            requested: timeout,
            minimum: MIN_HEARTBEAT_TIMEOUT,
        })
    } else {
        Ok(())
    }
}
