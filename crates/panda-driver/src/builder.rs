//! Builder 模式实现
//!
//! 提供链式构造 [`Bridge`] 实例的便捷方式。

use crate::config::BridgeConfig;
use crate::context::BridgeContext;
use crate::error::DriverError;
use crate::manager::BusManager;
use crate::pipeline::{IsrProducer, Pipeline, PipelineConfig};
use panda_can::CanController;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

type ControllerFactory = Box<dyn FnOnce(&IsrProducer) -> Box<dyn CanController>>;

/// 组装完成的桥接核心
///
/// `manager` 和 `ctx` 可以共享给 USB 层，`pipeline` 由主循环独占，
/// `producer` 交给中断上下文。
pub struct Bridge {
    pub ctx: Arc<BridgeContext>,
    pub manager: Arc<BusManager>,
    pub pipeline: Pipeline,
    pub producer: IsrProducer,
    pub config: BridgeConfig,
}

/// Bridge Builder（链式构造）
///
/// # Example
///
/// ```
/// use panda_can::MockController;
/// use panda_driver::{BridgeBuilder, BridgeConfig};
/// use std::time::Duration;
///
/// let bridge = BridgeBuilder::new()
///     .config(BridgeConfig::default())
///     .controller(Box::new(MockController::new(0)))
///     .controller_fn(|producer| {
///         Box::new(MockController::new(1).with_event_sender(producer.sender()))
///     })
///     .build()
///     .unwrap();
///
/// assert!(bridge.manager.has_controller(1));
/// assert!(!bridge.manager.has_controller(2));
/// bridge.pipeline.poll(Duration::ZERO);
/// ```
pub struct BridgeBuilder {
    config: BridgeConfig,
    boot_time: Duration,
    controllers: Vec<ControllerFactory>,
}

impl BridgeBuilder {
    pub fn new() -> Self {
        Self {
            config: BridgeConfig::default(),
            boot_time: Duration::ZERO,
            controllers: Vec::new(),
        }
    }

    /// 设置桥接配置（可选，默认 [`BridgeConfig::default`]）
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// 设置启动时刻（自启动起的时间，心跳看门狗从这里开始计时）
    pub fn boot_time(mut self, now: Duration) -> Self {
        self.boot_time = now;
        self
    }

    /// 挂接一个控制器
    pub fn controller(mut self, controller: Box<dyn CanController>) -> Self {
        self.controllers.push(Box::new(move |_| controller));
        self
    }

    /// 挂接一个需要事件通道的控制器（例如支持内部回环的控制器）
    pub fn controller_fn<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(&IsrProducer) -> Box<dyn CanController> + 'static,
    {
        self.controllers.push(Box::new(factory));
        self
    }

    /// 构建 [`Bridge`]
    ///
    /// 配置校验失败、控制器初始化失败或总线编号无效时返回错误。
    pub fn build(self) -> Result<Bridge, DriverError> {
        let ctx = Arc::new(BridgeContext::new(&self.config, self.boot_time)?);
        let manager = Arc::new(BusManager::new(ctx.clone(), self.config.queue_capacity));
        let (pipeline, producer) = Pipeline::new(
            ctx.clone(),
            manager.clone(),
            self.config.event_channel_capacity,
            PipelineConfig::from(&self.config),
        );

        for factory in self.controllers {
            manager.attach(factory(&producer))?;
        }

        info!(
            "Bridge ready: queue capacity {}, heartbeat {:?} ({})",
            self.config.queue_capacity,
            self.config.heartbeat_timeout(),
            if self.config.heartbeat.required {
                "required"
            } else {
                "not required"
            }
        );

        Ok(Bridge {
            ctx,
            manager,
            pipeline,
            producer,
            config: self.config,
        })
    }
}

impl Default for BridgeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
