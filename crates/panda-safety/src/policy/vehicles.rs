//! 编译期车型表

use super::vehicle::{
    Forwarding, RxCheck, SignalRule, SteerLimit, TxKind, TxRule, VehicleSpec,
};

pub static HONDA: VehicleSpec = VehicleSpec {
    name: "HONDA",
    tx_rules: &[
        // STEERING_CONTROL
        TxRule {
            bus: 0,
            address: 0xE4,
            kind: TxKind::Steer(SteerLimit {
                offset: 0,
                max: 0xF00,
            }),
        },
        // BRAKE_COMMAND / GAS_COMMAND
        TxRule {
            bus: 0,
            address: 0x1FA,
            kind: TxKind::Longitudinal,
        },
        TxRule {
            bus: 0,
            address: 0x200,
            kind: TxKind::Longitudinal,
        },
        // ACC_HUD / LKAS_HUD
        TxRule {
            bus: 0,
            address: 0x30C,
            kind: TxKind::Always,
        },
        TxRule {
            bus: 0,
            address: 0x33D,
            kind: TxKind::Always,
        },
        // 巡航取消按钮
        TxRule {
            bus: 0,
            address: 0x296,
            kind: TxKind::Always,
        },
    ],
    rx_checks: &[
        RxCheck {
            bus: 0,
            address: 0x1A6,
            len: 8,
        },
        RxCheck {
            bus: 0,
            address: 0x158,
            len: 8,
        },
        RxCheck {
            bus: 0,
            address: 0x17C,
            len: 8,
        },
    ],
    cruise: SignalRule {
        bus: 0,
        address: 0x1A6,
        byte: 0,
        mask: 0x08,
    },
    gas: SignalRule {
        bus: 0,
        address: 0x17C,
        byte: 0,
        mask: 0xFF,
    },
    brake: SignalRule {
        bus: 0,
        address: 0x17C,
        byte: 6,
        mask: 0x20,
    },
    forwarding: Forwarding::CameraBridge {
        blocked_from_camera: &[0xE4, 0x194, 0x33D],
    },
};

pub static TOYOTA: VehicleSpec = VehicleSpec {
    name: "TOYOTA",
    tx_rules: &[
        // STEERING_LKA
        TxRule {
            bus: 0,
            address: 0x2E4,
            kind: TxKind::Steer(SteerLimit {
                offset: 1,
                max: 1500,
            }),
        },
        // ACC_CONTROL
        TxRule {
            bus: 0,
            address: 0x343,
            kind: TxKind::Longitudinal,
        },
        // LKAS_HUD
        TxRule {
            bus: 0,
            address: 0x412,
            kind: TxKind::Always,
        },
    ],
    rx_checks: &[
        RxCheck {
            bus: 0,
            address: 0xAA,
            len: 8,
        },
        RxCheck {
            bus: 0,
            address: 0x260,
            len: 8,
        },
        RxCheck {
            bus: 0,
            address: 0x1D2,
            len: 8,
        },
    ],
    // PCM_CRUISE.CRUISE_ACTIVE
    cruise: SignalRule {
        bus: 0,
        address: 0x1D2,
        byte: 0,
        mask: 0x20,
    },
    gas: SignalRule {
        bus: 0,
        address: 0x2C1,
        byte: 6,
        mask: 0xFF,
    },
    brake: SignalRule {
        bus: 0,
        address: 0x224,
        byte: 0,
        mask: 0x20,
    },
    forwarding: Forwarding::CameraBridge {
        blocked_from_camera: &[0x2E4, 0x412, 0x343],
    },
};

pub static GM: VehicleSpec = VehicleSpec {
    name: "GM",
    tx_rules: &[
        // ASCMLKASteeringCmd
        TxRule {
            bus: 0,
            address: 0x180,
            kind: TxKind::Steer(SteerLimit {
                offset: 0,
                max: 300,
            }),
        },
        // ASCMGasRegenCmd / EBCMFrictionBrakeCmd
        TxRule {
            bus: 0,
            address: 0x2CB,
            kind: TxKind::Longitudinal,
        },
        TxRule {
            bus: 2,
            address: 0x315,
            kind: TxKind::Longitudinal,
        },
        // ASCMKeepAlive
        TxRule {
            bus: 0,
            address: 0x409,
            kind: TxKind::Always,
        },
        TxRule {
            bus: 0,
            address: 0x40A,
            kind: TxKind::Always,
        },
        // ASCMSteeringButton（取消）
        TxRule {
            bus: 0,
            address: 0x1E1,
            kind: TxKind::Always,
        },
    ],
    rx_checks: &[
        RxCheck {
            bus: 0,
            address: 0x1E1,
            len: 7,
        },
        RxCheck {
            bus: 0,
            address: 0xF1,
            len: 6,
        },
    ],
    cruise: SignalRule {
        bus: 0,
        address: 0x3D1,
        byte: 4,
        mask: 0x80,
    },
    gas: SignalRule {
        bus: 0,
        address: 0x417,
        byte: 6,
        mask: 0xFF,
    },
    brake: SignalRule {
        bus: 0,
        address: 0xF1,
        byte: 1,
        mask: 0xFF,
    },
    forwarding: Forwarding::None,
};

pub static TESLA: VehicleSpec = VehicleSpec {
    name: "TESLA",
    tx_rules: &[
        // DAS_steeringControl
        TxRule {
            bus: 0,
            address: 0x488,
            kind: TxKind::Steer(SteerLimit {
                offset: 0,
                max: 3600,
            }),
        },
        // DAS_control
        TxRule {
            bus: 0,
            address: 0x2B9,
            kind: TxKind::Longitudinal,
        },
        // STW_ACTN_RQ（取消）
        TxRule {
            bus: 0,
            address: 0x45,
            kind: TxKind::Always,
        },
    ],
    rx_checks: &[
        RxCheck {
            bus: 0,
            address: 0x370,
            len: 8,
        },
        RxCheck {
            bus: 0,
            address: 0x108,
            len: 8,
        },
    ],
    cruise: SignalRule {
        bus: 0,
        address: 0x368,
        byte: 1,
        mask: 0x40,
    },
    gas: SignalRule {
        bus: 0,
        address: 0x118,
        byte: 4,
        mask: 0xFF,
    },
    brake: SignalRule {
        bus: 0,
        address: 0x20A,
        byte: 0,
        mask: 0x0C,
    },
    forwarding: Forwarding::None,
};
