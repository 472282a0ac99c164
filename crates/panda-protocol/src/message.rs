//! CAN 报文的内存表示

use crate::codec::{CodecError, header_bytes, xor_checksum};
use crate::dlc::{dlc_to_len, len_to_dlc, requires_fd};
use crate::{BUS_COUNT, CAN_EFF_MASK, CAN_MAX_DATA_LEN, CAN_SFF_MASK};

/// CAN / CAN-FD 报文的统一抽象
///
/// # 设计目的
///
/// `CanMessage` 是线协议、安全引擎和总线管理器之间流转的唯一单元：
///
/// ```text
/// USB bulk-out ──decode──┐                 ┌──encode──> USB bulk-in
///                        ▼                 │
///                    CanMessage ──tx_hook/rx_hook──> 队列 ──> 硬件
/// ```
///
/// # 设计特性
///
/// - **Copy trait**：固定 64 字节数据区，无堆分配，适合中断上下文
/// - **构造即校验**：地址范围、总线编号、数据长度在构造时检查，
///   因此任何 `CanMessage` 都可以无错误地编码
/// - **未使用字节恒为 0**：派生的 `PartialEq` 可以直接比较
/// - **校验和派生而来**：[`CanMessage::checksum`] 总是现算，无法单独设置
///
/// # 示例
///
/// ```rust
/// use panda_protocol::CanMessage;
///
/// let msg = CanMessage::new_standard(0, 0x123, &[1, 2, 3, 4]).unwrap();
/// assert_eq!(msg.address(), 0x123);
/// assert_eq!(msg.data(), &[1, 2, 3, 4]);
/// assert!(!msg.is_fd());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanMessage {
    address: u32,
    bus: u8,
    length_code: u8,
    data: [u8; CAN_MAX_DATA_LEN],
    is_extended: bool,
    is_fd: bool,
    is_brs: bool,
    returned: bool,
    rejected: bool,
}

impl CanMessage {
    /// 创建标准帧（11-bit ID）
    ///
    /// 数据长度超过 8 字节时自动标记为 CAN-FD 帧。
    pub fn new_standard(bus: u8, address: u32, data: &[u8]) -> Result<Self, CodecError> {
        Self::new(bus, address, data, false)
    }

    /// 创建扩展帧（29-bit ID）
    pub fn new_extended(bus: u8, address: u32, data: &[u8]) -> Result<Self, CodecError> {
        Self::new(bus, address, data, true)
    }

    /// 通用构造器
    pub fn new(bus: u8, address: u32, data: &[u8], is_extended: bool) -> Result<Self, CodecError> {
        if bus as usize >= BUS_COUNT {
            return Err(CodecError::InvalidBus { bus });
        }

        let mask = if is_extended { CAN_EFF_MASK } else { CAN_SFF_MASK };
        if address & !mask != 0 {
            return Err(CodecError::InvalidAddress {
                address,
                extended: is_extended,
            });
        }

        let length_code =
            len_to_dlc(data.len()).ok_or(CodecError::UnsupportedLength { len: data.len() })?;

        let mut fixed = [0u8; CAN_MAX_DATA_LEN];
        fixed[..data.len()].copy_from_slice(data);

        Ok(Self {
            address,
            bus,
            length_code,
            data: fixed,
            is_extended,
            is_fd: requires_fd(data.len()),
            is_brs: false,
            returned: false,
            rejected: false,
        })
    }

    /// 标记为 CAN-FD 帧（可选开启 BRS）
    ///
    /// 经典长度（≤ 8 字节）的报文也可以用 FD 帧发送。
    /// BRS 只在设备内部使用（自动升级、健康计数），线格式不携带：
    /// 编码后再解码得到的报文 `is_brs()` 总是 `false`。
    #[must_use]
    pub fn with_fd(mut self, brs: bool) -> Self {
        self.is_fd = true;
        self.is_brs = brs;
        self
    }

    /// 复制到另一条总线（用于总线间转发）
    pub fn with_bus(mut self, bus: u8) -> Result<Self, CodecError> {
        if bus as usize >= BUS_COUNT {
            return Err(CodecError::InvalidBus { bus });
        }
        self.bus = bus;
        Ok(self)
    }

    /// 标记为回显帧（已发送的报文被回传给主机）
    pub fn mark_returned(&mut self) {
        self.returned = true;
    }

    /// 标记为被安全策略拒绝
    pub fn mark_rejected(&mut self) {
        self.rejected = true;
    }

    /// 清除 `returned` / `rejected`（只能由设备置位）
    pub fn clear_status_flags(&mut self) {
        self.returned = false;
        self.rejected = false;
    }

    /// 获取 CAN ID
    pub fn address(&self) -> u32 {
        self.address
    }

    /// 获取总线编号
    pub fn bus(&self) -> u8 {
        self.bus
    }

    /// 获取 DLC
    pub fn length_code(&self) -> u8 {
        self.length_code
    }

    /// 有效数据长度
    pub fn len(&self) -> usize {
        dlc_to_len(self.length_code)
    }

    /// 数据是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 获取数据切片（只包含有效数据）
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len()]
    }

    /// 读取第 `index` 个数据字节，越界时返回 0
    pub fn byte(&self, index: usize) -> u8 {
        if index < self.len() { self.data[index] } else { 0 }
    }

    pub fn is_extended(&self) -> bool {
        self.is_extended
    }

    pub fn is_fd(&self) -> bool {
        self.is_fd
    }

    pub fn is_brs(&self) -> bool {
        self.is_brs
    }

    pub fn returned(&self) -> bool {
        self.returned
    }

    pub fn rejected(&self) -> bool {
        self.rejected
    }

    /// 编码后的总字节数（头 + 数据）
    pub fn wire_len(&self) -> usize {
        crate::codec::CANPACKET_HEAD_SIZE + self.len()
    }

    /// 校验和：头部前 5 字节与全部数据字节的异或
    pub fn checksum(&self) -> u8 {
        let header = header_bytes(self);
        xor_checksum(&header) ^ xor_checksum(self.data())
    }

    /// 解码器内部使用：字段已经过校验
    pub(crate) fn from_wire_parts(
        bus: u8,
        address: u32,
        length_code: u8,
        payload: &[u8],
        flags: WireFlags,
    ) -> Self {
        let mut fixed = [0u8; CAN_MAX_DATA_LEN];
        fixed[..payload.len()].copy_from_slice(payload);
        Self {
            address,
            bus,
            length_code,
            data: fixed,
            is_extended: flags.extended,
            is_fd: flags.fd,
            is_brs: false,
            returned: flags.returned,
            rejected: flags.rejected,
        }
    }
}

/// 线格式中携带的标志位
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct WireFlags {
    pub fd: bool,
    pub extended: bool,
    pub returned: bool,
    pub rejected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_standard() {
        let msg = CanMessage::new_standard(1, 0x7FF, &[0xAA, 0xBB]).unwrap();
        assert_eq!(msg.bus(), 1);
        assert_eq!(msg.address(), 0x7FF);
        assert_eq!(msg.len(), 2);
        assert_eq!(msg.length_code(), 2);
        assert!(!msg.is_extended());
        assert!(!msg.returned());
        assert!(!msg.rejected());
    }

    #[test]
    fn test_standard_address_out_of_range() {
        let err = CanMessage::new_standard(0, 0x800, &[]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidAddress { address: 0x800, .. }));
    }

    #[test]
    fn test_extended_address_limits() {
        assert!(CanMessage::new_extended(0, 0x1FFF_FFFF, &[]).is_ok());
        assert!(CanMessage::new_extended(0, 0x2000_0000, &[]).is_err());
    }

    #[test]
    fn test_invalid_bus() {
        let err = CanMessage::new_standard(3, 0x100, &[]).unwrap_err();
        assert_eq!(err, CodecError::InvalidBus { bus: 3 });
    }

    #[test]
    fn test_unsupported_length() {
        let err = CanMessage::new_standard(0, 0x100, &[0u8; 9]).unwrap_err();
        assert_eq!(err, CodecError::UnsupportedLength { len: 9 });
    }

    #[test]
    fn test_fd_length_sets_fd_flag() {
        let msg = CanMessage::new_standard(0, 0x100, &[0u8; 12]).unwrap();
        assert!(msg.is_fd());
        assert!(!msg.is_brs());
        assert_eq!(msg.length_code(), 9);
    }

    #[test]
    fn test_with_fd_and_brs() {
        let msg = CanMessage::new_standard(0, 0x100, &[1]).unwrap().with_fd(true);
        assert!(msg.is_fd());
        assert!(msg.is_brs());
    }

    #[test]
    fn test_with_bus() {
        let msg = CanMessage::new_standard(0, 0x100, &[1]).unwrap();
        assert_eq!(msg.with_bus(2).unwrap().bus(), 2);
        assert!(msg.with_bus(5).is_err());
    }

    #[test]
    fn test_byte_out_of_range_is_zero() {
        let msg = CanMessage::new_standard(0, 0x100, &[7, 8]).unwrap();
        assert_eq!(msg.byte(1), 8);
        assert_eq!(msg.byte(2), 0);
        assert_eq!(msg.byte(100), 0);
    }

    #[test]
    fn test_flags_change_checksum() {
        let mut msg = CanMessage::new_standard(0, 0x123, &[1, 2, 3]).unwrap();
        let before = msg.checksum();
        msg.mark_rejected();
        assert_ne!(before, msg.checksum());
    }

    #[test]
    fn test_wire_len() {
        let msg = CanMessage::new_standard(0, 0x123, &[0u8; 64]).unwrap();
        assert_eq!(msg.wire_len(), 70);
    }
}
