//! 端到端测试：主机 ⇄ USB 分发器 ⇄ 桥接核心 ⇄ 模拟控制器

use panda_can::{CanErrorCode, HardwareEvent, MockController, MockHandle};
use panda_driver::{Bridge, BridgeBuilder, BridgeConfig};
use panda_protocol::{
    CANPACKET_CHECKSUM_OFFSET, CanMessage, ControlOpcode, ControlRequest, PacketStream, decode,
    encode,
};
use panda_safety::{SafetyError, SafetyMode};
use panda_usb::{StaticBoard, UsbDispatcher, UsbError, UsbState};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::sync::Arc;
use std::time::Duration;

struct Device {
    bridge: Bridge,
    usb: UsbDispatcher,
    handles: Vec<MockHandle>,
}

fn device() -> Device {
    let mut handles = Vec::new();
    let mut builder = BridgeBuilder::new().config(BridgeConfig::default());
    for bus in 0..3 {
        let controller = MockController::new(bus);
        handles.push(controller.handle());
        builder = builder.controller(Box::new(controller));
    }
    let bridge = builder.build().unwrap();
    let usb = UsbDispatcher::for_bridge(&bridge, Arc::new(StaticBoard::new("test")));
    usb.configure();
    Device {
        bridge,
        usb,
        handles,
    }
}

fn control_out(usb: &UsbDispatcher, opcode: ControlOpcode, value: u16, index: u16, now: Duration) {
    usb.control(&ControlRequest::out(opcode, value, index), now)
        .unwrap();
}

#[test]
fn default_mode_rejection_is_echoed_over_bulk_in() {
    let dev = device();

    let mut wire = vec![0x80, 0x18, 0x09, 0x00, 0x00, 0x00, 1, 2, 3, 4, 5, 6, 7, 8];
    wire[CANPACKET_CHECKSUM_OFFSET] = wire
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != CANPACKET_CHECKSUM_OFFSET)
        .fold(0, |acc, (_, b)| acc ^ b);

    let msg = decode(&wire).unwrap();
    assert_eq!(msg.address(), 0x123);
    assert_eq!(msg.bus(), 0);
    assert_eq!(msg.data(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(encode(&msg).as_bytes(), wire.as_slice());

    let report = dev.usb.bulk_out(&wire).unwrap();
    assert_eq!(report.rejected, 1);
    assert_eq!(dev.usb.state(), UsbState::Active);

    dev.bridge.pipeline.poll(Duration::from_millis(1));
    assert!(dev.handles[0].sent().is_empty());

    let bytes = dev.usb.bulk_in(4096).unwrap();
    let echoed: Vec<CanMessage> = PacketStream::new(&bytes).map(Result::unwrap).collect();
    assert_eq!(echoed.len(), 1);
    assert_eq!(echoed[0].address(), 0x123);
    assert!(echoed[0].rejected());
    assert!(echoed[0].returned());
    assert_eq!(dev.bridge.ctx.safety.counters().tx_blocked, 1);
}

#[test]
fn unknown_mode_after_toyota_keeps_toyota() {
    let dev = device();
    let now = Duration::from_millis(10);
    control_out(&dev.usb, ControlOpcode::Heartbeat, 0, 0, now);
    for _ in 0..2 {
        control_out(
            &dev.usb,
            ControlOpcode::SafetyMode,
            SafetyMode::Toyota.into(),
            0,
            now,
        );
    }

    let err = dev
        .usb
        .control(&ControlRequest::out(ControlOpcode::SafetyMode, 9999, 0), now)
        .unwrap_err();
    assert!(matches!(
        err,
        UsbError::Safety(SafetyError::UnknownMode { mode: 9999 })
    ));
    assert_eq!(dev.bridge.ctx.safety.mode(), SafetyMode::Toyota);

    let status = dev
        .usb
        .control(&ControlRequest::input(ControlOpcode::SafetyMode, 0, 0), now)
        .unwrap();
    assert_eq!(status.as_ref(), &[3, 0, 0, 0]);
}

#[test]
fn toyota_camera_traffic_is_reported_but_not_forwarded_unchecked() {
    let dev = device();
    let now = Duration::from_millis(10);
    control_out(&dev.usb, ControlOpcode::Heartbeat, 0, 0, now);
    control_out(
        &dev.usb,
        ControlOpcode::SafetyMode,
        SafetyMode::Toyota.into(),
        0,
        now,
    );

    // 0x2E4 被 fwd_hook 拦截；0x101 的转发副本在车辆总线上被 tx_hook 拒绝
    dev.bridge
        .producer
        .push(HardwareEvent::Frame(CanMessage::new_standard(2, 0x2E4, &[0; 5]).unwrap()));
    dev.bridge
        .producer
        .push(HardwareEvent::Frame(CanMessage::new_standard(2, 0x101, &[1]).unwrap()));
    dev.bridge.pipeline.poll(now);

    assert!(dev.handles[0].sent().is_empty());
    let metrics = dev.bridge.ctx.metrics.snapshot();
    assert_eq!(metrics.forward_rejected, 1);
    assert_eq!(metrics.forwarded, 0);

    // 两条摄像头报文仍然上报主机
    let bytes = dev.usb.bulk_in(4096).unwrap();
    let reported: Vec<u32> = PacketStream::new(&bytes)
        .map(|r| r.unwrap().address())
        .collect();
    assert_eq!(reported, vec![0x2E4, 0x101]);
}

#[test]
fn reset_preserves_safety_mode_and_zeroes_health() {
    let dev = device();
    let now = Duration::ZERO;
    control_out(&dev.usb, ControlOpcode::SafetyMode, SafetyMode::Honda.into(), 1, now);

    dev.bridge.producer.push(HardwareEvent::Error {
        bus: 1,
        code: CanErrorCode::Stuff,
    });
    dev.bridge
        .producer
        .push(HardwareEvent::Frame(CanMessage::new_standard(1, 0x10, &[]).unwrap()));
    dev.bridge.pipeline.poll(now);
    assert_ne!(dev.bridge.ctx.bus_health(1).unwrap().total_rx, 0);
    assert_eq!(dev.bridge.manager.rx_len(1), 1);

    control_out(&dev.usb, ControlOpcode::Reset, 0, 0, now);
    assert_eq!(dev.usb.state(), UsbState::Configured);
    assert_eq!(dev.bridge.ctx.safety.mode(), SafetyMode::Honda);
    assert_eq!(dev.bridge.manager.rx_len(1), 0);

    let health = dev.bridge.ctx.bus_health(1).unwrap();
    assert_eq!(health.total_rx, 0);
    assert_eq!(health.rx_errors, 0);
    assert!(dev.usb.bulk_in(4096).unwrap().is_empty());
}

#[test]
fn unknown_opcode_returns_empty_response() {
    let dev = device();
    let req = ControlRequest {
        request_type: 0xC0,
        request: 0x01,
        value: 0xFFFF,
        index: 0xFFFF,
        data: vec![1, 2, 3],
    };
    assert!(dev.usb.control(&req, Duration::ZERO).unwrap().is_empty());
}

#[test]
fn corrupt_packet_mid_transfer_does_not_desync() {
    let dev = device();
    dev.bridge.ctx.safety.set_heartbeat_required(false, Duration::ZERO);
    control_out(
        &dev.usb,
        ControlOpcode::SafetyMode,
        SafetyMode::AllOutput.into(),
        0,
        Duration::ZERO,
    );

    let packets: Vec<Vec<u8>> = (0..5u32)
        .map(|i| {
            let msg = CanMessage::new_standard(1, 0x100 + i, &vec![i as u8; i as usize]).unwrap();
            encode(&msg).as_bytes().to_vec()
        })
        .collect();
    let mut transfer = Vec::new();
    for (i, packet) in packets.iter().enumerate() {
        let mut packet = packet.clone();
        if i == 2 {
            packet[CANPACKET_CHECKSUM_OFFSET] ^= 0x5A;
        }
        transfer.extend(packet);
    }

    let report = dev.usb.bulk_out(&transfer).unwrap();
    assert_eq!(report.accepted, 4);
    assert_eq!(report.corrupt, 1);

    dev.bridge.pipeline.poll(Duration::ZERO);
    let sent: Vec<u32> = dev.handles[1].sent().iter().map(CanMessage::address).collect();
    assert_eq!(sent, vec![0x100, 0x101, 0x103, 0x104]);
    assert_eq!(dev.bridge.ctx.metrics.snapshot().bulk_corrupt, 1);

    // 下一个传输从零开始解析
    let report = dev.usb.bulk_out(&packets[0]).unwrap();
    assert_eq!(report.accepted, 1);
}

#[test]
fn truncated_tail_only_affects_its_transfer() {
    let dev = device();
    let packet = encode(&CanMessage::new_standard(0, 0x20, &[1, 2, 3, 4]).unwrap())
        .as_bytes()
        .to_vec();

    let mut transfer = packet.clone();
    transfer.extend(&packet[..7]);
    let report = dev.usb.bulk_out(&transfer).unwrap();
    assert_eq!(report.rejected, 1);
    assert_eq!(report.truncated, 1);

    let report = dev.usb.bulk_out(&packet[7..]).unwrap();
    assert_eq!(report.rejected, 0);
    assert_eq!(report.packets() + report.truncated, 1);
}

#[test]
fn disconnected_device_refuses_transfers() {
    let dev = device();
    dev.usb.disconnect();
    assert!(dev.usb.bulk_in(64).is_err());
    assert!(
        dev.usb
            .control(
                &ControlRequest::input(ControlOpcode::Health, 0, 0),
                Duration::ZERO
            )
            .is_err()
    );
}

#[test]
fn random_bulk_out_never_panics() {
    let dev = device();
    let mut rng = StdRng::seed_from_u64(0x9A4DA);
    for _ in 0..500 {
        let len = rng.gen_range(0..256);
        let data: Vec<u8> = (0..len).map(|_| rng.r#gen()).collect();
        let report = dev.usb.bulk_out(&data).unwrap();
        assert!(report.packets() + report.truncated <= data.len() / 6 + 1);
        dev.bridge.pipeline.poll(Duration::ZERO);
        dev.usb.bulk_in(16384).unwrap();
    }
}
