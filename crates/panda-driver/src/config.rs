//! # 桥接配置
//!
//! 队列容量、心跳、Bus-Off 恢复策略和各总线初始配置，
//! 从 TOML 加载，所有字段都有默认值。
//!
//! ```toml
//! queue_capacity = 256
//! bulk_transfer_size = 16384
//!
//! [heartbeat]
//! timeout_ms = 5000
//! required = true
//!
//! [[buses]]
//! nominal_kbps = 500
//! fd_enabled = true
//! ```

use panda_can::health::{
    DEFAULT_PASSIVE_THRESHOLD, DEFAULT_WARNING_FLAG_LEVEL, DEFAULT_WARNING_THRESHOLD,
};
use panda_can::{
    BusSettings, CanError, DEFAULT_DATA_KBPS, DEFAULT_NOMINAL_KBPS, ErrorThresholds,
    RecoveryPolicy, validate_data_speed, validate_nominal_speed,
};
use panda_protocol::{BUS_COUNT, CANPACKET_MAX_SIZE};
use panda_safety::{MIN_HEARTBEAT_TIMEOUT, SafetyConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl From<CanError> for ConfigError {
    fn from(err: CanError) -> Self {
        ConfigError::Invalid(err.to_string())
    }
}

/// 心跳配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeartbeatConfig {
    pub timeout_ms: u64,
    /// 上电时是否要求主机心跳
    pub required: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            required: true,
        }
    }
}

/// 错误阈值与 Bus-Off 恢复配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecoveryConfig {
    /// 置位 warning 标志的错误计数
    pub warning_flag_level: u32,
    /// 错误计数超过该值进入 Passive
    pub warning_threshold: u32,
    /// TEC 超过该值进入 Bus-Off
    pub passive_threshold: u32,
    pub delay_ms: u64,
    pub max_delay_ms: u64,
    pub rapid_window_ms: u64,
    pub max_rapid_recoveries: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            warning_flag_level: DEFAULT_WARNING_FLAG_LEVEL,
            warning_threshold: DEFAULT_WARNING_THRESHOLD,
            passive_threshold: DEFAULT_PASSIVE_THRESHOLD,
            delay_ms: 100,
            max_delay_ms: 3200,
            rapid_window_ms: 1000,
            max_rapid_recoveries: 5,
        }
    }
}

/// 单条总线的初始配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusConfig {
    pub nominal_kbps: u16,
    pub data_kbps: u16,
    pub fd_enabled: bool,
    pub brs_enabled: bool,
    pub non_iso: bool,
    pub loopback: bool,
    pub silent: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            nominal_kbps: DEFAULT_NOMINAL_KBPS,
            data_kbps: DEFAULT_DATA_KBPS,
            fd_enabled: false,
            brs_enabled: false,
            non_iso: false,
            loopback: false,
            silent: false,
        }
    }
}

impl From<BusConfig> for BusSettings {
    fn from(config: BusConfig) -> Self {
        BusSettings {
            nominal_kbps: config.nominal_kbps,
            data_kbps: config.data_kbps,
            fd_enabled: config.fd_enabled,
            brs_enabled: config.brs_enabled,
            non_iso: config.non_iso,
            loopback: config.loopback,
            silent: config.silent,
        }
    }
}

/// 桥接配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// 每条总线 RX/TX 队列容量（报文数）
    pub queue_capacity: usize,
    /// 中断事件通道容量
    pub event_channel_capacity: usize,
    /// 每个主循环周期最多处理的硬件事件数
    pub max_events_per_poll: usize,
    /// 每个主循环周期每条总线最多发送的报文数
    pub max_tx_per_poll: usize,
    /// Bulk-in 单次传输的最大字节数
    pub bulk_transfer_size: usize,
    pub heartbeat: HeartbeatConfig,
    pub recovery: RecoveryConfig,
    /// 按总线编号排列，缺省的总线使用默认配置
    pub buses: Vec<BusConfig>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            event_channel_capacity: 1024,
            max_events_per_poll: 64,
            max_tx_per_poll: 32,
            bulk_transfer_size: 16384,
            heartbeat: HeartbeatConfig::default(),
            recovery: RecoveryConfig::default(),
            buses: Vec::new(),
        }
    }
}

impl BridgeConfig {
    /// 从 TOML 文本解析并校验
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be > 0".into()));
        }
        if self.event_channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_channel_capacity must be > 0".into(),
            ));
        }
        if self.max_events_per_poll == 0 || self.max_tx_per_poll == 0 {
            return Err(ConfigError::Invalid("poll budgets must be > 0".into()));
        }
        if self.bulk_transfer_size < CANPACKET_MAX_SIZE {
            return Err(ConfigError::Invalid(format!(
                "bulk_transfer_size {} is smaller than one packet ({})",
                self.bulk_transfer_size, CANPACKET_MAX_SIZE
            )));
        }
        if self.heartbeat_timeout() < MIN_HEARTBEAT_TIMEOUT {
            return Err(ConfigError::Invalid(format!(
                "heartbeat timeout {} ms is below the {} ms minimum",
                self.heartbeat.timeout_ms,
                MIN_HEARTBEAT_TIMEOUT.as_millis()
            )));
        }
        let recovery = &self.recovery;
        if recovery.warning_flag_level > recovery.warning_threshold
            || recovery.warning_threshold >= recovery.passive_threshold
        {
            return Err(ConfigError::Invalid(
                "recovery thresholds out of order (flag <= warning < passive)".into(),
            ));
        }
        if self.recovery.delay_ms > self.recovery.max_delay_ms {
            return Err(ConfigError::Invalid(
                "recovery.delay_ms exceeds recovery.max_delay_ms".into(),
            ));
        }
        if self.recovery.max_rapid_recoveries == 0 {
            return Err(ConfigError::Invalid(
                "recovery.max_rapid_recoveries must be > 0".into(),
            ));
        }
        if self.buses.len() > BUS_COUNT {
            return Err(ConfigError::Invalid(format!(
                "{} buses configured, device has {}",
                self.buses.len(),
                BUS_COUNT
            )));
        }
        for (bus, config) in self.buses.iter().enumerate() {
            validate_nominal_speed(bus as u8, config.nominal_kbps)?;
            validate_data_speed(bus as u8, config.data_kbps)?;
        }
        Ok(())
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat.timeout_ms)
    }

    pub fn safety_config(&self) -> SafetyConfig {
        SafetyConfig {
            heartbeat_timeout: self.heartbeat_timeout(),
            heartbeat_required: self.heartbeat.required,
        }
    }

    pub fn recovery_policy(&self) -> RecoveryPolicy {
        RecoveryPolicy {
            thresholds: ErrorThresholds {
                flag: self.recovery.warning_flag_level,
                warning: self.recovery.warning_threshold,
                passive: self.recovery.passive_threshold,
            },
            recovery_delay: Duration::from_millis(self.recovery.delay_ms),
            max_recovery_delay: Duration::from_millis(self.recovery.max_delay_ms),
            rapid_bus_off_window: Duration::from_millis(self.recovery.rapid_window_ms),
            max_rapid_recoveries: self.recovery.max_rapid_recoveries,
        }
    }

    /// 总线初始配置（未配置的总线使用默认值）
    pub fn bus_settings(&self, bus: u8) -> BusSettings {
        self.buses
            .get(bus as usize)
            .copied()
            .unwrap_or_default()
            .into()
    }
}
