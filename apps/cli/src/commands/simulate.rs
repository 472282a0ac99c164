//! 仿真命令
//!
//! 用 Mock 控制器在内存中运行完整的设备：中断侧注入随机总线流量，
//! 主机侧通过 USB 分发器发送心跳、报文并读取 bulk-in。

use anyhow::{Context, Result};
use clap::Args;
use panda_can::{CanController, HardwareEvent, MockController};
use panda_driver::{Bridge, BridgeBuilder, BridgeConfig, MetricsSnapshot};
use panda_protocol::{BUS_COUNT, CanMessage, ControlOpcode, ControlRequest, PacketStream, encode};
use panda_safety::SafetyMode;
use panda_usb::{BulkOutReport, StaticBoard, UsbDispatcher};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// 仿真命令参数
#[derive(Args, Debug, Clone)]
pub struct SimulateCommand {
    /// 桥接配置文件（TOML），缺省使用默认配置
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 安全模式编号（0 = ALL_OUTPUT, 1 = NO_OUTPUT, 2 = HONDA, 3 = TOYOTA, 4 = GM, 5 = TESLA）
    #[arg(short, long, default_value_t = 0)]
    pub mode: u16,

    /// 安全模式参数
    #[arg(long, default_value_t = 0)]
    pub param: u16,

    /// 仿真时长（毫秒）
    #[arg(short, long, default_value_t = 1000)]
    pub duration_ms: u64,

    /// 主循环周期（毫秒）
    #[arg(long, default_value_t = 10)]
    pub step_ms: u64,

    /// 每周期每条总线注入的接收帧数
    #[arg(short, long, default_value_t = 2)]
    pub rate: usize,

    /// 主机在此时刻之后停止发送心跳（毫秒）
    #[arg(long)]
    pub stop_heartbeat_ms: Option<u64>,

    /// 开启所有总线的回环模式
    #[arg(long)]
    pub loopback: bool,

    /// 随机数种子
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// 以 JSON 输出统计
    #[arg(long)]
    pub json: bool,
}

impl Default for SimulateCommand {
    fn default() -> Self {
        Self {
            config: None,
            mode: SafetyMode::AllOutput.into(),
            param: 0,
            duration_ms: 1000,
            step_ms: 10,
            rate: 2,
            stop_heartbeat_ms: None,
            loopback: false,
            seed: 0,
            json: false,
        }
    }
}

/// 单条总线的统计
#[derive(Debug, Serialize)]
pub struct BusSummary {
    pub bus: u8,
    pub state: String,
    pub total_rx: u32,
    pub total_tx: u32,
    pub total_forwarded: u32,
    pub rx_overflow: u32,
    pub tx_overflow: u32,
    pub bus_off_count: u32,
}

/// 仿真结果
#[derive(Debug, Serialize)]
pub struct SimulationSummary {
    pub duration_ms: u64,
    pub safety_mode: String,
    pub heartbeat_lost: bool,
    pub host_packets_sent: usize,
    pub host_packets_accepted: usize,
    pub host_packets_rejected: usize,
    pub host_packets_received: usize,
    pub host_echoes_received: usize,
    pub isr_drops: u64,
    pub rx_frames: u64,
    pub tx_frames: u64,
    pub forwarded: u64,
    pub buses: Vec<BusSummary>,
}

impl SimulateCommand {
    pub fn execute(&self) -> Result<()> {
        let summary = self.run()?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            print_summary(&summary);
        }
        Ok(())
    }

    /// 运行仿真并返回统计
    pub fn run(&self) -> Result<SimulationSummary> {
        if self.step_ms == 0 {
            anyhow::bail!("--step-ms must be positive");
        }

        let config = match &self.config {
            Some(path) => BridgeConfig::load(path)
                .with_context(|| format!("load config {}", path.display()))?,
            None => BridgeConfig::default(),
        };
        let bridge = build_bridge(config)?;
        let usb = UsbDispatcher::for_bridge(
            &bridge,
            Arc::new(StaticBoard::new(env!("CARGO_PKG_VERSION"))),
        );
        usb.configure();

        let mut now = Duration::ZERO;
        usb.control(&ControlRequest::out(ControlOpcode::Heartbeat, 0, 0), now)?;
        usb.control(
            &ControlRequest::out(ControlOpcode::SafetyMode, self.mode, self.param),
            now,
        )
        .context("select safety mode")?;
        if self.loopback {
            usb.control(&ControlRequest::out(ControlOpcode::Loopback, 1, 0), now)?;
        }
        info!(
            "Simulating {} ms in mode {} (param {})",
            self.duration_ms,
            bridge.ctx.safety.mode(),
            self.param
        );

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut host_out = BulkOutReport::default();
        let mut host_sent = 0;
        let mut received = 0;
        let mut echoes = 0;
        let step = Duration::from_millis(self.step_ms);
        let end = Duration::from_millis(self.duration_ms);

        while now < end {
            now += step;

            let host_alive = self
                .stop_heartbeat_ms
                .is_none_or(|stop| now < Duration::from_millis(stop));
            if host_alive {
                usb.control(&ControlRequest::out(ControlOpcode::Heartbeat, 0, 0), now)?;
            }

            for bus in 0..BUS_COUNT as u8 {
                for _ in 0..self.rate {
                    bridge
                        .producer
                        .push(HardwareEvent::Frame(random_frame(&mut rng, bus)?));
                }
            }

            if host_alive {
                let msg = random_frame(&mut rng, 0)?;
                let report = usb.bulk_out(encode(&msg).as_bytes())?;
                host_sent += 1;
                host_out.accepted += report.accepted;
                host_out.rejected += report.rejected;
                host_out.refused += report.refused;
            }

            let poll = bridge.pipeline.poll(now);
            debug!("t={:?} {:?}", now, poll);

            let bytes = usb.bulk_in(usb.max_transfer())?;
            for msg in PacketStream::new(&bytes).flatten() {
                received += 1;
                if msg.returned() {
                    echoes += 1;
                }
            }
        }

        Ok(summarize(
            &bridge,
            self.duration_ms,
            host_sent,
            host_out,
            received,
            echoes,
        ))
    }
}

fn build_bridge(config: BridgeConfig) -> Result<Bridge> {
    let mut builder = BridgeBuilder::new().config(config);
    for bus in 0..BUS_COUNT as u8 {
        builder = builder.controller_fn(move |producer| -> Box<dyn CanController> {
            Box::new(MockController::new(bus).with_event_sender(producer.sender()))
        });
    }
    Ok(builder.build()?)
}

fn random_frame(rng: &mut StdRng, bus: u8) -> Result<CanMessage> {
    let address = rng.gen_range(0..0x800);
    let len = rng.gen_range(0..=8);
    let data: Vec<u8> = (0..len).map(|_| rng.r#gen()).collect();
    Ok(CanMessage::new_standard(bus, address, &data)?)
}

fn summarize(
    bridge: &Bridge,
    duration_ms: u64,
    host_packets_sent: usize,
    host_out: BulkOutReport,
    host_packets_received: usize,
    host_echoes_received: usize,
) -> SimulationSummary {
    let metrics: MetricsSnapshot = bridge.ctx.metrics.snapshot();
    let status = bridge.ctx.safety.status();
    let buses = (0..BUS_COUNT as u8)
        .filter_map(|bus| {
            bridge.ctx.bus_health(bus).map(|health| BusSummary {
                bus,
                state: format!("{:?}", health.state),
                total_rx: health.total_rx,
                total_tx: health.total_tx,
                total_forwarded: health.total_forwarded,
                rx_overflow: health.rx_overflow,
                tx_overflow: health.tx_overflow,
                bus_off_count: health.bus_off_count,
            })
        })
        .collect();

    SimulationSummary {
        duration_ms,
        safety_mode: status.mode.to_string(),
        heartbeat_lost: status.heartbeat_lost,
        host_packets_sent,
        host_packets_accepted: host_out.accepted,
        host_packets_rejected: host_out.rejected,
        host_packets_received,
        host_echoes_received,
        isr_drops: metrics.isr_drops,
        rx_frames: metrics.rx_frames,
        tx_frames: metrics.tx_frames,
        forwarded: metrics.forwarded,
        buses,
    }
}

fn print_summary(summary: &SimulationSummary) {
    println!("⏱  {} ms simulated", summary.duration_ms);
    println!(
        "🛡  safety mode {}{}",
        summary.safety_mode,
        if summary.heartbeat_lost {
            " (heartbeat lost)"
        } else {
            ""
        }
    );
    println!(
        "⬆  host sent {} packets: {} accepted, {} rejected",
        summary.host_packets_sent, summary.host_packets_accepted, summary.host_packets_rejected
    );
    println!(
        "⬇  host received {} packets ({} echoes)",
        summary.host_packets_received, summary.host_echoes_received
    );
    println!(
        "📊 rx {} / tx {} / forwarded {} / isr drops {}",
        summary.rx_frames, summary.tx_frames, summary.forwarded, summary.isr_drops
    );
    for bus in &summary.buses {
        println!(
            "   bus {}: {:<7} rx {:>6} tx {:>6} fwd {:>6} rx_ovf {:>4} tx_ovf {:>4} bus_off {}",
            bus.bus,
            bus.state,
            bus.total_rx,
            bus.total_tx,
            bus.total_forwarded,
            bus.rx_overflow,
            bus.tx_overflow,
            bus.bus_off_count
        );
    }
}
