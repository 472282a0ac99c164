//! 安全策略
//!
//! 每个安全模式对应一个实现 [`SafetyHooks`] 的策略。所有策略在编译期注册到
//! [`REGISTRY`]，`select_mode` 时解析一次，之后逐帧调用不再查表。
//! 设备从不在运行时加载策略代码。

mod passthrough;
mod vehicle;
mod vehicles;

pub use passthrough::{AllOutputPolicy, NoOutputPolicy};
pub use vehicle::{
    Forwarding, RxCheck, SignalRule, SteerLimit, TxKind, TxRule, VehiclePolicy, VehicleSpec,
};
pub use vehicles::{GM, HONDA, TESLA, TOYOTA};

use crate::SafetyMode;
use panda_protocol::CanMessage;

/// 摄像头总线（车辆侧 ADAS 摄像头所在总线）
pub const CAMERA_BUS: u8 = 2;

/// 主车辆总线
pub const MAIN_BUS: u8 = 0;

/// 安全参数 bit 0：ALL_OUTPUT 下开启 0↔2 透传；车型模式下开启纵向控制报文
pub const PARAM_FLAG_EXTENDED: u16 = 1 << 0;

/// 安全策略的钩子集合
///
/// 钩子在引擎锁内被调用，实现必须是纯计算：不做 I/O，不阻塞。
/// 策略内部状态（如 `controls_allowed`）由策略自己持有，对引擎不透明。
pub trait SafetyHooks: Send {
    /// 出站报文是否允许发送
    fn tx_hook(&mut self, msg: &CanMessage) -> bool;

    /// 入站报文是否有效（不影响报文是否交付主机）
    fn rx_hook(&mut self, msg: &CanMessage) -> bool;

    /// 入站报文的转发目标总线
    fn fwd_hook(&self, bus: u8, address: u32) -> Option<u8>;

    /// 策略是否已允许主动控制
    fn controls_allowed(&self) -> bool {
        false
    }
}

/// 策略构造函数（参数为 `select_mode` 的 param）
pub type PolicyFactory = fn(u16) -> Box<dyn SafetyHooks>;

fn all_output(param: u16) -> Box<dyn SafetyHooks> {
    Box::new(AllOutputPolicy::new(param))
}

fn no_output(_param: u16) -> Box<dyn SafetyHooks> {
    Box::new(NoOutputPolicy)
}

fn honda(param: u16) -> Box<dyn SafetyHooks> {
    Box::new(VehiclePolicy::new(&HONDA, param))
}

fn toyota(param: u16) -> Box<dyn SafetyHooks> {
    Box::new(VehiclePolicy::new(&TOYOTA, param))
}

fn gm(param: u16) -> Box<dyn SafetyHooks> {
    Box::new(VehiclePolicy::new(&GM, param))
}

fn tesla(param: u16) -> Box<dyn SafetyHooks> {
    Box::new(VehiclePolicy::new(&TESLA, param))
}

/// 编译期策略注册表
pub static REGISTRY: [(SafetyMode, PolicyFactory); 6] = [
    (SafetyMode::AllOutput, all_output as PolicyFactory),
    (SafetyMode::NoOutput, no_output as PolicyFactory),
    (SafetyMode::Honda, honda as PolicyFactory),
    (SafetyMode::Toyota, toyota as PolicyFactory),
    (SafetyMode::Gm, gm as PolicyFactory),
    (SafetyMode::Tesla, tesla as PolicyFactory),
];

/// 按模式编号查找策略
pub fn lookup(mode_id: u16) -> Option<(SafetyMode, PolicyFactory)> {
    REGISTRY
        .iter()
        .find(|(mode, _)| u16::from(*mode) == mode_id)
        .copied()
}
