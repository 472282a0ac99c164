//! 解码命令
//!
//! 把一段 bulk 传输（拼接的 CAN 报文包）解码为可读形式

use crate::validation::parse_hex_bytes;
use anyhow::Result;
use clap::Args;
use panda_protocol::{CanMessage, PacketStream};

/// 解码命令参数
#[derive(Args, Debug)]
pub struct DecodeCommand {
    /// 十六进制字节串（可包含多个拼接的包）
    pub hex: String,
}

impl DecodeCommand {
    pub fn execute(&self) -> Result<()> {
        let bytes = parse_hex_bytes(&self.hex)?;
        let mut errors = 0;

        for (index, result) in PacketStream::new(&bytes).enumerate() {
            match result {
                Ok(msg) => println!("#{index:<3} {}", describe(&msg)),
                Err(err) => {
                    errors += 1;
                    println!("#{index:<3} ❌ {err}");
                },
            }
        }

        if errors > 0 {
            anyhow::bail!("{} packet(s) failed to decode", errors);
        }
        Ok(())
    }
}

/// 单行描述
pub fn describe(msg: &CanMessage) -> String {
    let mut flags = Vec::new();
    if msg.is_extended() {
        flags.push("EXT");
    }
    if msg.is_fd() {
        flags.push("FD");
    }
    if msg.is_brs() {
        flags.push("BRS");
    }
    if msg.returned() {
        flags.push("RET");
    }
    if msg.rejected() {
        flags.push("REJ");
    }

    format!(
        "bus {} id 0x{:03X} len {:>2} [{}] {}",
        msg.bus(),
        msg.address(),
        msg.len(),
        flags.join(","),
        hex::encode_upper(msg.data())
    )
}
