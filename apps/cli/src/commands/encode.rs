//! 编码命令
//!
//! 从字段构造一个 CAN 报文包并输出十六进制线格式

use crate::validation::{
    parse_address, parse_hex_bytes, validate_address, validate_bus, validate_payload,
};
use anyhow::Result;
use clap::Args;
use panda_protocol::{CanMessage, encode};

/// 编码命令参数
#[derive(Args, Debug)]
pub struct EncodeCommand {
    /// 总线编号（0-2）
    #[arg(short, long, default_value_t = 0)]
    pub bus: u8,

    /// CAN 地址（十六进制）
    #[arg(short, long)]
    pub addr: String,

    /// 数据（十六进制）
    #[arg(short, long, default_value = "")]
    pub data: String,

    /// 29-bit 扩展帧
    #[arg(long)]
    pub extended: bool,

    /// CAN-FD 帧
    #[arg(long)]
    pub fd: bool,

    /// 比特率切换（需要 --fd）
    #[arg(long, requires = "fd")]
    pub brs: bool,
}

impl EncodeCommand {
    pub fn build_message(&self) -> Result<CanMessage> {
        validate_bus(self.bus)?;
        let address = parse_address(&self.addr)?;
        validate_address(address, self.extended)?;
        let data = parse_hex_bytes(&self.data)?;
        validate_payload(&data, self.fd)?;

        let msg = CanMessage::new(self.bus, address, &data, self.extended)?;
        Ok(if self.fd { msg.with_fd(self.brs) } else { msg })
    }

    pub fn execute(&self) -> Result<()> {
        let msg = self.build_message()?;
        println!("{}", hex::encode(encode(&msg).as_bytes()));
        Ok(())
    }
}
