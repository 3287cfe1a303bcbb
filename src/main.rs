use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{crate_authors, crate_version, Parser};

use zonecore::config::Config;
use zonecore::daemon::{daemonize, SocketProvider};
use zonecore::log::Logger;
use zonecore::manager::Manager;
use zonecore::xfr::NullXfrEngine;
use zonecore::zoneio::FileZoneIo;

#[derive(Parser, Debug)]
#[command(name = "zonecored", version = crate_version!(), author = crate_authors!())]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "/etc/zonecore/zonecore.toml")]
    config: Utf8PathBuf,

    /// Check the configuration and exit, without starting the daemon.
    #[arg(long)]
    check_config: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("zonecored couldn't be configured: {err}");
            return ExitCode::FAILURE;
        }
    };

    if cli.check_config {
        return ExitCode::SUCCESS;
    }

    let Ok(_logger) = Logger::launch(&config.logging) else {
        eprintln!("zonecored failed to initialize logging");
        return ExitCode::FAILURE;
    };

    let mut socket_provider = SocketProvider::new();
    for addr in &config.daemon.listen {
        if let Err(err) = socket_provider.pre_bind_udp(*addr) {
            tracing::error!("{err}");
            return ExitCode::FAILURE;
        }
        if let Err(err) = socket_provider.pre_bind_tcp(*addr) {
            tracing::error!("{err}");
            return ExitCode::FAILURE;
        }
    }

    if let Err(err) = daemonize(&config.daemon) {
        tracing::error!("failed to daemonize: {err}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("couldn't start the async runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async move {
        let manager = Manager::new(config, Arc::new(NullXfrEngine), Arc::new(FileZoneIo));

        if let Err(err) = manager.reload().await {
            tracing::error!("initial reload failed: {err}");
            return ExitCode::FAILURE;
        }
        manager.spawn_sync_timers();

        tracing::info!("zonecored started, {} zone(s) configured", manager.database().snapshot().len());

        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("listening for CTRL-C failed: {err}");
            return ExitCode::FAILURE;
        }

        tracing::info!("shutting down");
        manager.shutdown().await;
        ExitCode::SUCCESS
    })
}
