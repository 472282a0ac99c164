//! USB 协议层
//!
//! 设备端 USB 接口的协议语义，不涉及具体 USB 外设：
//! - 连接状态机（Disconnected → Configured → Active）
//! - 控制端点：操作码 + `value`/`index` 参数，方向位区分设置与读取
//! - Bulk-in / Bulk-out：拼接的 CAN 报文包
//! - 板级协作者 trait（电源、线束、时钟、固件更新入口）
//!
//! # 示例
//!
//! ```
//! use panda_can::MockController;
//! use panda_driver::BridgeBuilder;
//! use panda_protocol::{ControlOpcode, ControlRequest};
//! use panda_usb::{StaticBoard, UsbDispatcher};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let bridge = BridgeBuilder::new()
//!     .controller(Box::new(MockController::new(0)))
//!     .build()?;
//! let usb = UsbDispatcher::for_bridge(&bridge, Arc::new(StaticBoard::new("dev")));
//! usb.configure();
//!
//! let versions = usb.control(
//!     &ControlRequest::input(ControlOpcode::PacketVersions, 0, 0),
//!     Duration::ZERO,
//! )?;
//! assert_eq!(versions.len(), 8);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod board;
pub mod bulk;
mod control;
pub mod dispatcher;
mod error;
pub mod state;

pub use board::{Board, BoardRequests, PowerReadings, RtcTime, StaticBoard};
pub use bulk::BulkOutReport;
pub use dispatcher::UsbDispatcher;
pub use error::UsbError;
pub use state::UsbState;
