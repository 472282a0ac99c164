//! 命令定义和实现

pub mod config;
pub mod decode;
pub mod encode;
pub mod simulate;

pub use config::ConfigCommand;
pub use decode::DecodeCommand;
pub use encode::EncodeCommand;
pub use simulate::SimulateCommand;
