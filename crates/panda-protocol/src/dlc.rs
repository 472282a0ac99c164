//! DLC（Data Length Code）查找表
//!
//! - DLC 0~8：与字节数一一对应（经典 CAN）
//! - DLC 9~15：CAN-FD 扩展长度 12, 16, 20, 24, 32, 48, 64
//!
//! 两个方向都是纯查表，不做任何取整：不在表中的长度（如 9、13）是错误。

use crate::CAN_MAX_DATA_LEN;

/// DLC → 数据长度
pub const DLC_TO_LEN: [u8; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

/// 数据长度 → DLC（`0xFF` 表示该长度不合法）
const LEN_TO_DLC: [u8; CAN_MAX_DATA_LEN + 1] = {
    let mut table = [0xFFu8; CAN_MAX_DATA_LEN + 1];
    let mut dlc = 0;
    while dlc < DLC_TO_LEN.len() {
        table[DLC_TO_LEN[dlc] as usize] = dlc as u8;
        dlc += 1;
    }
    table
};

/// 经典 CAN 最大 DLC
pub const CLASSIC_MAX_DLC: u8 = 8;

/// DLC 转数据长度
///
/// 只取低 4 位，因此任何输入都有定义。
#[inline]
pub fn dlc_to_len(dlc: u8) -> usize {
    DLC_TO_LEN[(dlc & 0x0F) as usize] as usize
}

/// 数据长度转 DLC
///
/// 长度不在 DLC 表中时返回 `None`。
#[inline]
pub fn len_to_dlc(len: usize) -> Option<u8> {
    match LEN_TO_DLC.get(len) {
        Some(&dlc) if dlc != 0xFF => Some(dlc),
        _ => None,
    }
}

/// 该长度是否需要 CAN-FD 帧
#[inline]
pub fn requires_fd(len: usize) -> bool {
    len > CLASSIC_MAX_DLC as usize
}
