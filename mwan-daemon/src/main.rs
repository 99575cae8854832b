//
// Copyright (c) The Mwan Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

mod config;

use std::sync::Arc;

use clap::{App, Arg};
use config::Config;
use mwan_core::command::SystemRunner;
use mwan_core::consts::SYSLOG_BIND_ADDR;
use mwan_core::controller::{Controller, ControllerCfg};
use mwan_core::syslog;
use mwan_core::tasks::Task;
use nix::unistd::Uid;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::prelude::*;

fn init_tracing(config: &config::Logging) {
    // Enable logging to a file.
    let file = config.file.enabled.then(|| {
        let file_appender = tracing_appender::rolling::never(
            &config.file.dir,
            &config.file.name,
        );
        tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(false)
            .with_ansi(false)
            .with_filter(LevelFilter::from_level(tracing::Level::TRACE))
    });

    // Enable logging to stdout.
    let stdout = config.stdout.enabled.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_filter(LevelFilter::from_level(tracing::Level::TRACE))
    });

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("mwan=debug".parse().unwrap())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(file)
        .with(stdout)
        .init();
}

async fn run(config: Config) {
    // Without the syslog endpoint there is nothing to supervise with.
    let socket = match syslog::bind(SYSLOG_BIND_ADDR).await {
        Ok(socket) => Arc::new(socket),
        Err(error) => {
            error.log();
            std::process::exit(1);
        }
    };

    let cfg = ControllerCfg {
        poll_interval: config.poll_interval,
        route: config.route,
        monitored_networks: config.monitored_networks,
    };
    let runner = Arc::new(SystemRunner);
    let (controller, ctl_tx, _flags) = Controller::new(cfg, runner);
    let _listener = syslog::spawn_listener(socket, ctl_tx);

    // SIGINT and SIGTERM both mean a graceful stop.
    let (signal_tx, signal_rx) = mpsc::channel(1);
    let mut sigint =
        signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let _signals: Task<()> = Task::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => (),
            _ = sigterm.recv() => (),
        }
        let _ = signal_tx.send(()).await;
    });

    controller.run(signal_rx).await;
}

// ===== main =====

fn main() {
    // Parse command-line parameters.
    let matches = App::new("Multi-WAN internet gateway supervisor")
        .version(clap::crate_version!())
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("file")
                .help("Specify an alternative configuration file."),
        )
        .get_matches();

    // Read configuration file.
    let config_file = matches.value_of("config");
    let config = Config::load(config_file);

    // Check for root privileges; ip(8) and iptables(8) need them for the
    // daemon's whole lifetime.
    if !Uid::effective().is_root() {
        eprintln!("need privileged user");
        std::process::exit(1);
    }

    // Initialize tracing.
    init_tracing(&config.logging);

    // Set panic handler to abort the process if any child task panics.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    // We're ready to go!
    info!("starting up");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime")
        .block_on(async {
            run(config).await;
        });

    info!("exiting");
}
