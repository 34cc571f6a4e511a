//! hermesd: the storage node daemon.
//!
//! Exit codes: 0 normal shutdown, 1 config error, 2 transport bind failure,
//! 3 target init failure.

use std::sync::Arc;

use hermes::config::NodeConfig;
use hermes::rpc::Server;
use hermes::service::Service;
use tracing::{error, info};

fn parse_config_flag() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    None
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_target(false).with_thread_ids(true).init();

    let config = match NodeConfig::load(parse_config_flag().as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let service = match Service::start(config) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to initialize targets");
            std::process::exit(3);
        }
    };

    let bind_addr = format!("0.0.0.0:{}", service.config.rpc.port);
    let borg_period = std::time::Duration::from_millis(service.config.borg.period_ms);

    let borg_service = service.clone();
    let borg_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(borg_period);
        loop {
            ticker.tick().await;
            let stats = borg_service.tick_borg();
            if stats.promoted > 0 || stats.demoted > 0 {
                info!(promoted = stats.promoted, demoted = stats.demoted, "borg tick");
            }
        }
    });

    let server_service = service.clone();
    let server = Server::new(server_service);
    let server_bind = bind_addr.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run(&server_bind).await {
            error!(addr = %server_bind, error = %e, "control rpc server failed");
            std::process::exit(2);
        }
    });

    info!(addr = %bind_addr, node_id = service.node_id, "hermesd ready");

    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("received shutdown signal"),
            Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
        },
        _ = service.shutdown_requested.notified() => {
            info!("received shutdown request over control rpc");
        },
    }

    borg_handle.abort();
    server_handle.abort();
    service.shutdown();
    info!("hermesd stopped");
}
