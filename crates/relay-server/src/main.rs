//! 订阅中继进程入口。
//!
//! # 使用方法
//! ```bash
//! relay-server --config relay.toml --addr 127.0.0.1:6969
//! ```
//! - `--config`：可选，TOML 配置文件；缺省时全部取默认值；
//! - `--addr`：可选，覆盖配置中的监听地址。
//!
//! # 运行时装配（How）
//! - 日志：`RUST_LOG` 优先，未设置时使用配置中的 `log_level`；
//! - 频道注册表：进程内 [`MemoryRegistry`]；
//! - 收到 Ctrl-C 后关闭监听套接字，进行中的会话不被强制终止。

use std::{env, path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::{Context, bail};
use relay_core::{MemoryRegistry, RelayConfig};
use relay_transport_tcp::{ConnectionContext, TcpAcceptor};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("relay-server: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<()> {
    let options = CliOptions::parse(env::args().skip(1))?;
    let config = options.load_config()?;
    install_tracing(&config.log_level)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("relay-worker")
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(serve(config))
}

async fn serve(config: RelayConfig) -> anyhow::Result<()> {
    let registry = Arc::new(
        MemoryRegistry::new(config.offline_capacity)
            .with_delivery_timeout(config.delivery_timeout()),
    );
    let context = ConnectionContext::from_config(&config, registry)?;
    let acceptor = TcpAcceptor::bind(&config.addr, context)
        .await
        .with_context(|| format!("cannot listen on `{}`", config.addr))?;

    info!(
        addr = %acceptor.local_addr(),
        auth = config.auth,
        heartbeat_secs = config.heartbeat_secs,
        line_terminator = ?config.line_terminator,
        "relay listening"
    );
    acceptor.serve_until(shutdown_signal()).await;
    info!("relay stopped accepting connections");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "ctrl-c handler unavailable; serving until killed");
        std::future::pending::<()>().await;
    }
}

fn install_tracing(level: &str) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .with_context(|| format!("invalid log_level `{level}`"))?,
    };
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")
}

/// 命令行参数。
#[derive(Debug, Default, PartialEq, Eq)]
struct CliOptions {
    config: Option<PathBuf>,
    addr: Option<String>,
}

impl CliOptions {
    fn parse<I>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut options = Self::default();
        let mut args = args.into_iter();
        while let Some(flag) = args.next() {
            match flag.as_str() {
                "--config" | "-c" => {
                    let value = args.next().context("--config requires a file path")?;
                    options.config = Some(PathBuf::from(value));
                }
                "--addr" => {
                    let value = args.next().context("--addr requires an address")?;
                    options.addr = Some(value);
                }
                "--help" | "-h" => {
                    bail!("usage: relay-server [--config <path>] [--addr <host:port>]")
                }
                unknown => bail!("unknown argument `{unknown}`"),
            }
        }
        Ok(options)
    }

    fn load_config(&self) -> anyhow::Result<RelayConfig> {
        let mut config = match &self.config {
            Some(path) => RelayConfig::load(path)?,
            None => RelayConfig::default(),
        };
        if let Some(addr) = &self.addr {
            config.addr = addr.clone();
            config.validate()?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|arg| (*arg).to_owned()).collect()
    }

    #[test]
    fn flags_are_parsed() {
        let options =
            CliOptions::parse(args(&["--config", "relay.toml", "--addr", "127.0.0.1:7000"]))
                .expect("valid flags");
        assert_eq!(options.config, Some(PathBuf::from("relay.toml")));
        assert_eq!(options.addr.as_deref(), Some("127.0.0.1:7000"));
    }

    #[test]
    fn missing_values_and_unknown_flags_fail() {
        assert!(CliOptions::parse(args(&["--config"])).is_err());
        assert!(CliOptions::parse(args(&["--verbose"])).is_err());
    }

    #[test]
    fn address_override_replaces_default() {
        let options = CliOptions {
            config: None,
            addr: Some("127.0.0.1:7001".to_owned()),
        };
        let config = options.load_config().expect("config");
        assert_eq!(config.addr, "127.0.0.1:7001");
        assert_eq!(config.heartbeat_secs, RelayConfig::default().heartbeat_secs);
    }

    #[test]
    fn empty_address_override_is_rejected() {
        let options = CliOptions {
            config: None,
            addr: Some(" ".to_owned()),
        };
        assert!(options.load_config().is_err());
    }
}
