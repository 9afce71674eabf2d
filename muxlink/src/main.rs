use std::{io::IsTerminal, path::PathBuf, process::exit, rc::Rc};

use anyhow::Context;
use clap::Parser;
use muxlink::{
    config::{Config, TunnelConfig},
    logging, signals,
    transport::LocalTransport,
    SessionManager, TunnelManager,
};
use tokio::task::LocalSet;
use tracing::{error, info, warn};

/// Runs remote commands and forwards local ports over one transport.
#[derive(Debug, Parser)]
#[command(name = "muxlink", version, about)]
struct Cli {
    /// Path to the TOML config file (default: muxlink.toml in the working directory)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{error}");
            exit(1);
        }
    };

    logging::init_tracing(&config.logging.level);

    let runtime_result = tokio::runtime::Builder::new_current_thread().enable_all().build();

    let result = match runtime_result {
        Ok(runtime) => LocalSet::new().block_on(&runtime, async_main(config)),
        Err(err) => {
            eprintln!("Failed to start Tokio runtime: {err}");
            exit(1);
        }
    };

    if let Err(error) = result {
        error!("{error:#}");
        exit(1);
    }
}

async fn async_main(config: Config) -> anyhow::Result<()> {
    // The secure transport is established outside muxlink; the loopback transport stands in for it.
    let transport = Rc::new(LocalTransport::new());
    info!("Using the local loopback transport");

    let sessions = Rc::new(SessionManager::new(Rc::clone(&transport)));
    let tunnels = Rc::new(TunnelManager::new(Rc::clone(&transport), config.tunnels.options()));

    tokio::task::spawn_local({
        let sessions = Rc::clone(&sessions);
        async move { sessions.run().await }
    });
    tokio::task::spawn_local({
        let tunnels = Rc::clone(&tunnels);
        async move { tunnels.run().await }
    });

    let broadcaster = sessions.broadcaster();
    tokio::task::spawn_local(async move {
        if let Err(error) = signals::forward_signals(broadcaster).await {
            warn!("Signal forwarding stopped: {error}");
        }
    });

    for tunnel_config in &config.tunnel_list {
        let opened = match tunnel_config.clone() {
            TunnelConfig::Fixed { name, listen, target } => tunnels.fixed(name, listen, target).await,
            TunnelConfig::Dynamic { name, listen } => tunnels.dynamic(name, listen).await,
            TunnelConfig::Socket { name, listen, path } => tunnels.socket(name, listen, path).await,
        };

        opened.with_context(|| format!("Failed to open tunnel {}", tunnel_config.name()))?;
    }

    let headless = !std::io::stdout().is_terminal();
    for command in &config.commands {
        let session = sessions
            .new_session(command.name.as_str())
            .await
            .with_context(|| format!("Failed to start session {}", command.name))?;

        let result = match headless {
            true => session.run_with_size(&command.run, config.session.default_size()).await,
            false => session.run(&command.run).await,
        };
        result.with_context(|| format!("Session {} failed", command.name))?;

        session.wait().await.with_context(|| format!("Session {} failed", command.name))?;
    }

    if config.commands.is_empty() && !config.tunnel_list.is_empty() {
        info!("Forwarding tunnels until interrupted");
        tokio::signal::ctrl_c().await.context("Failed to wait for Ctrl-C")?;
    }

    tunnels.close_all();
    Ok(())
}
