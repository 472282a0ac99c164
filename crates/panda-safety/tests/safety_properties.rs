//! 安全引擎属性测试

use panda_protocol::{CanMessage, DLC_TO_LEN};
use panda_safety::{SafetyConfig, SafetyEngine, SafetyMode};
use proptest::prelude::*;
use std::time::Duration;

fn arb_message() -> impl Strategy<Value = CanMessage> {
    (0u8..3, 0u32..0x800, 0usize..16, prop::collection::vec(any::<u8>(), 64)).prop_map(
        |(bus, address, dlc, payload)| {
            let len = DLC_TO_LEN[dlc] as usize;
            CanMessage::new_standard(bus, address, &payload[..len]).unwrap()
        },
    )
}

fn engine() -> SafetyEngine {
    SafetyEngine::new(SafetyConfig::default(), Duration::ZERO).unwrap()
}

proptest! {
    /// NO_OUTPUT 下任何报文都被阻止，tx_blocked 单调递增
    #[test]
    fn no_output_blocks_everything(msgs in prop::collection::vec(arb_message(), 1..50)) {
        let engine = engine();
        let mut last_blocked = 0;
        for msg in &msgs {
            prop_assert!(!engine.tx_hook(msg));
            let blocked = engine.counters().tx_blocked;
            prop_assert_eq!(blocked, last_blocked + 1);
            last_blocked = blocked;
        }
        prop_assert_eq!(engine.counters().tx_allowed, 0);
    }

    /// 一个超时周期内无论 tick 多少次，只强制切换一次
    #[test]
    fn heartbeat_loss_reported_once_per_episode(
        ticks in prop::collection::vec(5_001u64..60_000, 1..30),
    ) {
        let engine = engine();
        engine.select_mode(SafetyMode::AllOutput.into(), 0).unwrap();

        let mut sorted = ticks.clone();
        sorted.sort_unstable();
        let forced = sorted
            .iter()
            .filter(|&&ms| engine.tick(Duration::from_millis(ms)))
            .count();

        prop_assert_eq!(forced, 1);
        prop_assert_eq!(engine.counters().heartbeat_lost, 1);
        prop_assert_eq!(engine.mode(), SafetyMode::NoOutput);
    }

    /// 未注册的模式编号总是被拒绝，且不改变当前模式
    #[test]
    fn unknown_modes_rejected(mode_id in 6u16..=u16::MAX) {
        let engine = engine();
        engine.select_mode(SafetyMode::Gm.into(), 0).unwrap();
        prop_assert!(engine.select_mode(mode_id, 0).is_err());
        prop_assert_eq!(engine.mode(), SafetyMode::Gm);
    }
}

#[test]
fn test_toyota_then_unknown_mode() {
    let engine = engine();
    assert!(engine.select_mode(SafetyMode::Toyota.into(), 0).is_ok());
    assert!(engine.select_mode(SafetyMode::Toyota.into(), 0).is_ok());
    assert!(engine.select_mode(9999, 0).is_err());
    assert_eq!(engine.mode(), SafetyMode::Toyota);
}

#[test]
fn test_concurrent_mode_switch_and_hooks() {
    use std::sync::Arc;
    use std::thread;

    let engine = Arc::new(engine());
    let msg = CanMessage::new_standard(0, 0x123, &[1, 2, 3]).unwrap();

    let switcher = {
        let engine = engine.clone();
        thread::spawn(move || {
            for i in 0..1000u16 {
                let mode = if i % 2 == 0 {
                    SafetyMode::AllOutput
                } else {
                    SafetyMode::NoOutput
                };
                engine.select_mode(mode.into(), 0).unwrap();
            }
        })
    };

    let mut evaluated = 0u32;
    for _ in 0..1000 {
        engine.tx_hook(&msg);
        evaluated += 1;
    }
    switcher.join().unwrap();

    let counters = engine.counters();
    assert_eq!(counters.tx_allowed + counters.tx_blocked, evaluated);
}
