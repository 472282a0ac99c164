//! 桥接管线指标
//!
//! 原子计数器，主循环更新，任何线程都可以无锁读取。
//! 与 [`BusHealth`](panda_can::BusHealth) 不同，这里的计数器不随通信复位清零。

use std::sync::atomic::{AtomicU64, Ordering};

/// 管线实时指标
///
/// # 使用示例
///
/// ```rust
/// use panda_driver::BridgeMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = BridgeMetrics::new();
/// metrics.rx_frames.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(metrics.snapshot().rx_frames, 1);
/// ```
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    /// 从硬件收到的帧数
    pub rx_frames: AtomicU64,

    /// 成功写入控制器的帧数
    pub tx_frames: AtomicU64,

    /// 回送给主机的发送回执（`returned = true`）
    pub tx_echoes: AtomicU64,

    /// 被 `tx_hook` 拒绝的主机报文
    pub tx_rejected: AtomicU64,

    /// 转发到其他总线的报文
    pub forwarded: AtomicU64,

    /// 转发副本被 `tx_hook` 拒绝
    pub forward_rejected: AtomicU64,

    /// 总线自动升级到 CAN-FD 的次数
    pub fd_promotions: AtomicU64,

    /// 总线自动开启 BRS 的次数
    pub brs_promotions: AtomicU64,

    /// 中断侧事件通道满被丢弃的事件
    ///
    /// 持续增长说明主循环处理不过来。
    pub isr_drops: AtomicU64,

    /// 主循环处理的硬件事件数
    pub events_processed: AtomicU64,

    /// 发送邮箱满，报文留在队列中重试
    pub tx_busy_retries: AtomicU64,

    /// 控制器返回的其他错误
    pub device_errors: AtomicU64,

    /// Bulk-out 中校验和错误的包
    pub bulk_corrupt: AtomicU64,

    /// Bulk-out 传输末尾不完整的包
    pub bulk_truncated: AtomicU64,
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取指标快照
    ///
    /// 各计数器分别原子读取，之间可能有微小的时间差。
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rx_frames: self.rx_frames.load(Ordering::Relaxed),
            tx_frames: self.tx_frames.load(Ordering::Relaxed),
            tx_echoes: self.tx_echoes.load(Ordering::Relaxed),
            tx_rejected: self.tx_rejected.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            forward_rejected: self.forward_rejected.load(Ordering::Relaxed),
            fd_promotions: self.fd_promotions.load(Ordering::Relaxed),
            brs_promotions: self.brs_promotions.load(Ordering::Relaxed),
            isr_drops: self.isr_drops.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            tx_busy_retries: self.tx_busy_retries.load(Ordering::Relaxed),
            device_errors: self.device_errors.load(Ordering::Relaxed),
            bulk_corrupt: self.bulk_corrupt.load(Ordering::Relaxed),
            bulk_truncated: self.bulk_truncated.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        self.rx_frames.store(0, Ordering::Relaxed);
        self.tx_frames.store(0, Ordering::Relaxed);
        self.tx_echoes.store(0, Ordering::Relaxed);
        self.tx_rejected.store(0, Ordering::Relaxed);
        self.forwarded.store(0, Ordering::Relaxed);
        self.forward_rejected.store(0, Ordering::Relaxed);
        self.fd_promotions.store(0, Ordering::Relaxed);
        self.brs_promotions.store(0, Ordering::Relaxed);
        self.isr_drops.store(0, Ordering::Relaxed);
        self.events_processed.store(0, Ordering::Relaxed);
        self.tx_busy_retries.store(0, Ordering::Relaxed);
        self.device_errors.store(0, Ordering::Relaxed);
        self.bulk_corrupt.store(0, Ordering::Relaxed);
        self.bulk_truncated.store(0, Ordering::Relaxed);
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub rx_frames: u64,
    pub tx_frames: u64,
    pub tx_echoes: u64,
    pub tx_rejected: u64,
    pub forwarded: u64,
    pub forward_rejected: u64,
    pub fd_promotions: u64,
    pub brs_promotions: u64,
    pub isr_drops: u64,
    pub events_processed: u64,
    pub tx_busy_retries: u64,
    pub device_errors: u64,
    pub bulk_corrupt: u64,
    pub bulk_truncated: u64,
}

impl MetricsSnapshot {
    /// 中断事件丢弃率（百分比）
    ///
    /// 没有任何事件时返回 0.0。
    pub fn isr_drop_rate(&self) -> f64 {
        let total = self.events_processed + self.isr_drops;
        if total == 0 {
            return 0.0;
        }
        (self.isr_drops as f64 / total as f64) * 100.0
    }
}
