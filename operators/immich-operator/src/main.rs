//! Immich Operator 主程序入口

use anyhow::Result;
use clap::{Parser, Subcommand};
use kube::{Client, CustomResourceExt};
use tracing::info;
use tracing_subscriber::EnvFilter;

use immich_operator::controller;
use immich_operator::crd::Immich;

#[derive(Parser)]
#[command(
    name = "immich-operator",
    about = "Kubernetes Operator for the Immich photo management stack"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 运行控制器
    Run,
    /// 输出 Immich CustomResourceDefinition YAML
    Crd,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Crd => {
            println!("{}", serde_yaml::to_string(&Immich::crd())?);
        }
        Command::Run => {
            info!("启动 immich-operator");
            let client = Client::try_default().await?;
            controller::run(client).await?;
        }
    }

    Ok(())
}
