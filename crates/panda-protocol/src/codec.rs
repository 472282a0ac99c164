//! CAN 报文线格式编解码
//!
//! # 线格式
//!
//! ```text
//! byte 0      : [DLC:4][bus:3][fd:1]          (DLC 在高 4 位，fd 在 bit 0)
//! byte 1..=4  : u32 LE = address << 3 | extended << 2 | returned << 1 | rejected
//! byte 5      : 校验和 = byte0 ^ .. ^ byte4 ^ data[0] ^ .. ^ data[n-1]
//! byte 6..    : 数据（0~64 字节，长度由 DLC 查表得出）
//! ```
//!
//! BRS 不在线格式中携带：它是总线配置层面的属性，解码结果的 `is_brs` 恒为 false。
//!
//! # 校验和的盲区
//!
//! 异或校验能检测任意单比特错误，但无法检测：
//! - 同一比特列上偶数次翻转（例如 byte 1 与 data[0] 的 bit 3 同时翻转）
//! - 字节重排（异或满足交换律，`[0x01, 0x02]` 与 `[0x02, 0x01]` 校验和相同）
//!
//! 这是协议兼容性的一部分，修改算法属于破坏性协议变更。

use crate::dlc::{CLASSIC_MAX_DLC, dlc_to_len};
use crate::message::{CanMessage, WireFlags};
use crate::{BUS_COUNT, CAN_MAX_DATA_LEN, CAN_SFF_MASK};
use bilge::prelude::*;
use thiserror::Error;

/// CAN 包头长度
pub const CANPACKET_HEAD_SIZE: usize = 6;

/// 单个 CAN 包的最大长度（头 + 64 字节数据）
pub const CANPACKET_MAX_SIZE: usize = CANPACKET_HEAD_SIZE + CAN_MAX_DATA_LEN;

/// 校验和在包头中的位置
pub const CANPACKET_CHECKSUM_OFFSET: usize = 5;

/// 编解码错误
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    #[error("Packet too short: {len} bytes (header is 6 bytes)")]
    TooShort { len: usize },

    #[error("Truncated packet: DLC implies {expected} bytes, only {actual} available")]
    Truncated { expected: usize, actual: usize },

    #[error("Trailing bytes after packet: expected {expected} bytes, got {actual}")]
    TrailingBytes { expected: usize, actual: usize },

    #[error("Checksum mismatch: computed 0x{computed:02X}, packet carries 0x{carried:02X}")]
    ChecksumMismatch { computed: u8, carried: u8 },

    #[error("Invalid bus index: {bus}")]
    InvalidBus { bus: u8 },

    #[error("Invalid CAN address 0x{address:X} (extended: {extended})")]
    InvalidAddress { address: u32, extended: bool },

    #[error("Unsupported data length: {len} (not in DLC table)")]
    UnsupportedLength { len: usize },

    #[error("Classic CAN frame cannot carry {len} bytes")]
    FdRequired { len: usize },

    #[error("Output buffer too small: need {needed}, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

/// 包头 byte 0 位域
///
/// bilge 默认使用 LSB first 位序：fd 为 bit 0，bus 为 bit 1-3，DLC 为 bit 4-7，
/// 与 `dlc << 4 | bus << 1 | fd` 一致。
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default)]
pub struct PacketHeader0 {
    pub fd: bool, // Bit 0: CAN-FD 标志
    pub bus: u3,  // Bit 1-3: 总线编号
    pub dlc: u4,  // Bit 4-7: DLC
}

const FLAG_REJECTED: u32 = 1 << 0;
const FLAG_RETURNED: u32 = 1 << 1;
const FLAG_EXTENDED: u32 = 1 << 2;
const ADDRESS_SHIFT: u32 = 3;

/// 字节切片的异或校验
#[inline]
pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// 构造包头前 5 字节（不含校验和）
pub(crate) fn header_bytes(msg: &CanMessage) -> [u8; 5] {
    let mut h0 = PacketHeader0::from(u8::new(0));
    h0.set_fd(msg.is_fd());
    h0.set_bus(u3::new(msg.bus()));
    h0.set_dlc(u4::new(msg.length_code()));

    let mut word = msg.address() << ADDRESS_SHIFT;
    if msg.is_extended() {
        word |= FLAG_EXTENDED;
    }
    if msg.returned() {
        word |= FLAG_RETURNED;
    }
    if msg.rejected() {
        word |= FLAG_REJECTED;
    }

    let w = word.to_le_bytes();
    [u8::from(h0).value(), w[0], w[1], w[2], w[3]]
}

/// 根据包头 byte 0 计算整个包的长度
#[inline]
pub fn packet_len(header0: u8) -> usize {
    CANPACKET_HEAD_SIZE + dlc_to_len(header0 >> 4)
}

/// 编码结果（栈上定长缓冲区，无堆分配）
#[derive(Clone, Copy)]
pub struct EncodedPacket {
    buf: [u8; CANPACKET_MAX_SIZE],
    len: usize,
}

impl EncodedPacket {
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl AsRef<[u8]> for EncodedPacket {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl std::fmt::Debug for EncodedPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedPacket")
            .field("bytes", &self.as_bytes())
            .finish()
    }
}

/// 编码 CAN 报文
///
/// 校验和总是重新计算。`CanMessage` 在构造时已经校验过长度和地址，
/// 因此编码本身不会失败（不在 DLC 表中的长度在构造时即被拒绝）。
/// BRS 不写入线格式，解码结果中 BRS 恒为关闭。
pub fn encode(msg: &CanMessage) -> EncodedPacket {
    let mut buf = [0u8; CANPACKET_MAX_SIZE];
    let len = write_packet(msg, &mut buf);
    EncodedPacket { buf, len }
}

/// 编码到调用方提供的缓冲区，返回写入的字节数
pub fn encode_into(msg: &CanMessage, out: &mut [u8]) -> Result<usize, CodecError> {
    let needed = msg.wire_len();
    if out.len() < needed {
        return Err(CodecError::BufferTooSmall {
            needed,
            available: out.len(),
        });
    }
    Ok(write_packet(msg, out))
}

fn write_packet(msg: &CanMessage, out: &mut [u8]) -> usize {
    let header = header_bytes(msg);
    let data = msg.data();
    let total = CANPACKET_HEAD_SIZE + data.len();

    out[..5].copy_from_slice(&header);
    out[CANPACKET_CHECKSUM_OFFSET] = xor_checksum(&header) ^ xor_checksum(data);
    out[CANPACKET_HEAD_SIZE..total].copy_from_slice(data);
    total
}

/// 解码单个 CAN 包（切片必须恰好是一个包）
///
/// 检查顺序：
/// 1. 长度不足 6 字节 → `TooShort`
/// 2. 全切片异或不为 0 → `ChecksumMismatch`（先于任何字段解释，
///    保证任意单比特错误都报告为校验和错误）
/// 3. DLC 推导的长度与切片长度不符 → `Truncated` / `TrailingBytes`
/// 4. 字段语义：总线编号、经典帧长度、标准帧地址范围
pub fn decode(wire: &[u8]) -> Result<CanMessage, CodecError> {
    if wire.len() < CANPACKET_HEAD_SIZE {
        return Err(CodecError::TooShort { len: wire.len() });
    }

    let carried = wire[CANPACKET_CHECKSUM_OFFSET];
    let computed = xor_checksum(&wire[..CANPACKET_CHECKSUM_OFFSET])
        ^ xor_checksum(&wire[CANPACKET_HEAD_SIZE..]);
    if computed != carried {
        return Err(CodecError::ChecksumMismatch { computed, carried });
    }

    let expected = packet_len(wire[0]);
    if wire.len() < expected {
        return Err(CodecError::Truncated {
            expected,
            actual: wire.len(),
        });
    }
    if wire.len() > expected {
        return Err(CodecError::TrailingBytes {
            expected,
            actual: wire.len(),
        });
    }

    let h0 = PacketHeader0::from(u8::new(wire[0]));
    let bus = h0.bus().value();
    let dlc = h0.dlc().value();
    let fd = h0.fd();

    if bus as usize >= BUS_COUNT {
        return Err(CodecError::InvalidBus { bus });
    }
    if !fd && dlc > CLASSIC_MAX_DLC {
        return Err(CodecError::FdRequired {
            len: dlc_to_len(dlc),
        });
    }

    let word = u32::from_le_bytes([wire[1], wire[2], wire[3], wire[4]]);
    let address = word >> ADDRESS_SHIFT;
    let flags = WireFlags {
        fd,
        extended: word & FLAG_EXTENDED != 0,
        returned: word & FLAG_RETURNED != 0,
        rejected: word & FLAG_REJECTED != 0,
    };
    if !flags.extended && address > CAN_SFF_MASK {
        return Err(CodecError::InvalidAddress {
            address,
            extended: false,
        });
    }

    Ok(CanMessage::from_wire_parts(
        bus,
        address,
        dlc,
        &wire[CANPACKET_HEAD_SIZE..],
        flags,
    ))
}

/// 多个拼接 CAN 包的顺序解析器
///
/// # 重同步规则
///
/// - 每个包的边界由其包头 DLC 决定
/// - 校验和失败的包按其声明长度跳过，继续解析后续包
/// - 剩余字节不足一个完整包（截断）时，产出一次错误后停止，
///   剩余字节全部丢弃；不跨传输保留任何状态
///
/// 因此 DLC 字段本身损坏会导致同一次传输内后续包错位，但影响不会跨越传输边界。
///
/// # 示例
///
/// ```rust
/// use panda_protocol::{CanMessage, PacketStream, encode};
///
/// let a = CanMessage::new_standard(0, 0x100, &[1]).unwrap();
/// let b = CanMessage::new_standard(1, 0x200, &[2, 3]).unwrap();
/// let mut stream = Vec::new();
/// stream.extend_from_slice(encode(&a).as_bytes());
/// stream.extend_from_slice(encode(&b).as_bytes());
///
/// let decoded: Vec<_> = PacketStream::new(&stream).collect();
/// assert_eq!(decoded, vec![Ok(a), Ok(b)]);
/// ```
pub struct PacketStream<'a> {
    remaining: &'a [u8],
}

impl<'a> PacketStream<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { remaining: bytes }
    }

    /// 尚未解析的字节数
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }
}

impl Iterator for PacketStream<'_> {
    type Item = Result<CanMessage, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }

        if self.remaining.len() < CANPACKET_HEAD_SIZE {
            let len = self.remaining.len();
            self.remaining = &[];
            return Some(Err(CodecError::TooShort { len }));
        }

        let total = packet_len(self.remaining[0]);
        if self.remaining.len() < total {
            let actual = self.remaining.len();
            self.remaining = &[];
            return Some(Err(CodecError::Truncated {
                expected: total,
                actual,
            }));
        }

        let (packet, rest) = self.remaining.split_at(total);
        self.remaining = rest;
        Some(decode(packet))
    }
}
