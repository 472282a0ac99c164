//! 批量端点
//!
//! - Bulk-in：按传输上限取出一批 RX 报文，逐个编码后拼接
//! - Bulk-out：按包头 DLC 顺序切分一次传输中的拼接包
//!
//! Bulk-out 的重同步边界是单次 USB 传输：校验和错误的包按其声明长度跳过，
//! 截断的尾部丢弃；不跨传输保留任何半包。

use bytes::{BufMut, Bytes, BytesMut};
use panda_driver::{BusManager, DriverError, TxOutcome};
use panda_protocol::{CodecError, PacketStream, encode};
use std::sync::atomic::Ordering;
use tracing::{debug, trace};

/// 一次 bulk-out 传输的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BulkOutReport {
    /// 通过安全检查并进入 TX 队列
    pub accepted: usize,
    /// 被安全策略拒绝（已回显）
    pub rejected: usize,
    /// 总线不可发送或队列满
    pub refused: usize,
    /// 校验和错误
    pub corrupt: usize,
    /// 传输末尾的不完整包
    pub truncated: usize,
    /// 校验和正确但字段非法（总线编号、地址、FD 长度）
    pub invalid: usize,
}

impl BulkOutReport {
    pub fn packets(&self) -> usize {
        self.accepted + self.rejected + self.refused + self.corrupt + self.invalid
    }
}

/// 编码一批 RX 报文，总长度不超过 `max_len`
///
/// 队列为空时返回空缓冲区。
pub fn bulk_in(manager: &BusManager, max_len: usize) -> Bytes {
    let batch = manager.dequeue_rx_batch(max_len);
    if batch.is_empty() {
        return Bytes::new();
    }

    let mut buf = BytesMut::with_capacity(batch.iter().map(|m| m.wire_len()).sum());
    for msg in &batch {
        buf.put_slice(encode(msg).as_bytes());
    }
    trace!("Bulk-in: {} messages, {} bytes", batch.len(), buf.len());
    buf.freeze()
}

/// 解析一次 bulk-out 传输并提交报文
///
/// 主机置位的 `returned` / `rejected` 标志在入队前清除。
pub fn bulk_out(manager: &BusManager, data: &[u8]) -> BulkOutReport {
    let metrics = &manager.context().metrics;
    let mut report = BulkOutReport::default();

    for result in PacketStream::new(data) {
        match result {
            Ok(mut msg) => {
                msg.clear_status_flags();
                match manager.enqueue_tx(msg) {
                    Ok(TxOutcome::Queued) => report.accepted += 1,
                    Ok(TxOutcome::Rejected) => report.rejected += 1,
                    Err(err) => {
                        report.refused += 1;
                        log_refusal(&err);
                    },
                }
            },
            Err(CodecError::ChecksumMismatch { computed, carried }) => {
                report.corrupt += 1;
                metrics.bulk_corrupt.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Bulk-out checksum mismatch (computed 0x{:02X}, carried 0x{:02X}), packet skipped",
                    computed, carried
                );
            },
            Err(err @ (CodecError::Truncated { .. } | CodecError::TooShort { .. })) => {
                report.truncated += 1;
                metrics.bulk_truncated.fetch_add(1, Ordering::Relaxed);
                debug!("Bulk-out tail dropped: {}", err);
            },
            Err(err) => {
                report.invalid += 1;
                debug!("Bulk-out packet dropped: {}", err);
            },
        }
    }
    report
}

fn log_refusal(err: &DriverError) {
    match err {
        DriverError::QueueFull { .. } => trace!("Bulk-out packet dropped: {}", err),
        _ => debug!("Bulk-out packet refused: {}", err),
    }
}
