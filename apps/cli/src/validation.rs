//! 输入验证模块
//!
//! 命令行参数到协议字段的解析与范围检查

use anyhow::{Context, Result};
use panda_protocol::{BUS_COUNT, CAN_EFF_MASK, CAN_MAX_DATA_LEN, CAN_SFF_MASK};

/// 解析十六进制字节串
///
/// 允许空白、`:` 分隔和 `0x` 前缀，例如 `80 18 09`、`80:18:09`、`0x801809`。
pub fn parse_hex_bytes(input: &str) -> Result<Vec<u8>> {
    let trimmed = input.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let cleaned: String = trimmed
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    hex::decode(&cleaned).with_context(|| format!("invalid hex input: {input:?}"))
}

/// 解析 CAN 地址（十六进制，可带 `0x` 前缀）
pub fn parse_address(input: &str) -> Result<u32> {
    let digits = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);
    u32::from_str_radix(digits, 16).with_context(|| format!("invalid CAN address: {input:?}"))
}

/// 检查地址是否在标准帧或扩展帧的范围内
pub fn validate_address(address: u32, extended: bool) -> Result<()> {
    let mask = if extended { CAN_EFF_MASK } else { CAN_SFF_MASK };
    if address & !mask != 0 {
        anyhow::bail!(
            "address 0x{:X} exceeds the {} ID range (max 0x{:X})",
            address,
            if extended { "29-bit" } else { "11-bit" },
            mask
        );
    }
    Ok(())
}

pub fn validate_bus(bus: u8) -> Result<()> {
    if bus as usize >= BUS_COUNT {
        anyhow::bail!("bus {} out of range (0..{})", bus, BUS_COUNT);
    }
    Ok(())
}

pub fn validate_payload(data: &[u8], fd: bool) -> Result<()> {
    let max = if fd { CAN_MAX_DATA_LEN } else { 8 };
    if data.len() > max {
        anyhow::bail!(
            "payload of {} bytes exceeds {} bytes{}",
            data.len(),
            max,
            if fd { "" } else { " (use --fd for longer frames)" }
        );
    }
    Ok(())
}
