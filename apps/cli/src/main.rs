//! # Panda CLI
//!
//! panda CAN/CAN-FD ⇄ USB 桥接核心的命令行工具。
//!
//! ```bash
//! # 解码一段 bulk 传输
//! panda-cli decode "80 18 09 00 00 XX 01 02 03 04 05 06 07 08"
//!
//! # 编码一个报文包
//! panda-cli encode --bus 0 --addr 0x123 --data 0102030405060708
//!
//! # 用 Mock 控制器运行一次内存仿真
//! panda-cli simulate --mode 0 --duration-ms 2000
//!
//! # 输出默认配置
//! panda-cli config default > panda.toml
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod validation;

use commands::{ConfigCommand, DecodeCommand, EncodeCommand, SimulateCommand};

/// Panda CLI - CAN 桥接命令行工具
#[derive(Parser, Debug)]
#[command(name = "panda-cli")]
#[command(about = "Command-line tools for the panda CAN/CAN-FD USB bridge", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 解码十六进制 bulk 数据
    Decode {
        #[command(flatten)]
        args: DecodeCommand,
    },

    /// 编码一个 CAN 报文包
    Encode {
        #[command(flatten)]
        args: EncodeCommand,
    },

    /// 运行内存仿真
    Simulate {
        #[command(flatten)]
        args: SimulateCommand,
    },
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new(
                        "panda_cli=info,panda_driver=warn,panda_safety=info",
                    )
                }),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config(cmd) => cmd.execute(),
        Commands::Decode { args } => args.execute(),
        Commands::Encode { args } => args.execute(),
        Commands::Simulate { args } => args.execute(),
    }
}
