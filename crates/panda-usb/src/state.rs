//! USB 连接状态机
//!
//! ```text
//! Disconnected ──configure──> Configured ──首个传输──> Active
//!       ▲                         ▲                     │
//!       │                         └──────reset──────────┘
//!       └──────────────disconnect（任意状态）
//! ```

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UsbState {
    #[default]
    Disconnected,
    /// 主机已完成枚举和 SET_CONFIGURATION
    Configured,
    /// 已有控制或批量传输
    Active,
}

impl UsbState {
    pub fn is_connected(self) -> bool {
        self != UsbState::Disconnected
    }

    /// 收到任意传输后的状态
    pub(crate) fn on_transfer(self) -> UsbState {
        match self {
            UsbState::Configured | UsbState::Active => UsbState::Active,
            UsbState::Disconnected => UsbState::Disconnected,
        }
    }
}
