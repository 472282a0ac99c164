//! 配置管理命令
//!
//! 输出默认桥接配置，或校验一个 TOML 配置文件

use anyhow::{Context, Result};
use clap::Subcommand;
use panda_driver::BridgeConfig;
use std::path::PathBuf;

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 输出默认配置（TOML）
    Default,

    /// 校验配置文件并输出生效配置
    Check {
        /// 配置文件路径
        path: PathBuf,
    },
}

impl ConfigCommand {
    pub fn execute(&self) -> Result<()> {
        match self {
            ConfigCommand::Default => {
                let text = BridgeConfig::default()
                    .to_toml_string()
                    .context("serialize default config")?;
                print!("{text}");
            },
            ConfigCommand::Check { path } => {
                let config = BridgeConfig::load(path)
                    .with_context(|| format!("load config {}", path.display()))?;
                println!("✅ {} is valid", path.display());
                print!("{}", config.to_toml_string()?);
            },
        }
        Ok(())
    }
}
