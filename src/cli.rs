//! hermes-ctl: control client.
//!
//! `hermes-ctl stop [--node ID]` requests graceful shutdown of the given
//! node (default: node 0) over the control RPC transport.

use std::sync::Arc;
use std::time::Duration;

use hermes::config::ClientConfig;
use hermes::rpc::routing::RoutingTable;
use hermes::rpc::wire::{ControlRequest, ControlResponse};
use hermes::rpc::Client;

fn parse_node_flag(args: &[String]) -> u32 {
    for (i, arg) in args.iter().enumerate() {
        if arg == "--node" {
            return args.get(i + 1).and_then(|s| s.parse().ok()).unwrap_or(0);
        }
        if let Some(rest) = arg.strip_prefix("--node=") {
            return rest.parse().unwrap_or(0);
        }
    }
    0
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("usage: hermes-ctl stop [--node ID]");
        std::process::exit(1);
    };

    match command.as_str() {
        "stop" => {
            let node_id = parse_node_flag(&args[1..]);
            let config = match ClientConfig::load(None) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("failed to load client config: {e}");
                    std::process::exit(1);
                }
            };
            let routes = Arc::new(RoutingTable::from_hosts(&config.hosts, config.port));
            let client = Client::new(routes, Duration::from_secs(5));
            match client.call(node_id, ControlRequest::Shutdown).await {
                Ok(ControlResponse::Ok) => println!("node {node_id} stopping"),
                Ok(other) => {
                    eprintln!("unexpected reply: {other:?}");
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("stop failed: {e}");
                    std::process::exit(2);
                }
            }
        }
        other => {
            eprintln!("unknown command: {other}");
            eprintln!("usage: hermes-ctl stop [--node ID]");
            std::process::exit(1);
        }
    }
}
