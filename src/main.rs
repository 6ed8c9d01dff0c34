//! node-dispatch entry point.
//!
//! Hosts the request-dispatch core and the background scheduler:
//! - Configuration loading (environment or `--config FILE`)
//! - Logging initialization
//! - Ctrl-C handling with the ordered shutdown
//!
//! ## CLI Subcommands
//!
//! - `node-dispatch` or `node-dispatch run` - Run the node (default)
//! - `node-dispatch config show|validate` - Inspect configuration
//! - `node-dispatch version` - Print the version

use std::process::ExitCode;
use std::time::Duration;

use node_dispatch::cli::{self, config_cmd};
use node_dispatch::http::HttpStatus;
use node_dispatch::shutdown::ShutdownResult;
use node_dispatch::telemetry::init_logging;
use node_dispatch::Node;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("run");

    match command {
        "run" | "" => run(&args).await,
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            let config = match cli::load_config(&args) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("ERROR: {e}");
                    return ExitCode::from(2u8);
                }
            };
            match subcommand {
                "show" => {
                    let json = args.iter().any(|a| a == "--json");
                    ExitCode::from(config_cmd::run_show(&config, json) as u8)
                }
                "validate" => ExitCode::from(config_cmd::run_validate(&config) as u8),
                _ => {
                    eprintln!("Unknown config subcommand: {subcommand}");
                    print_usage();
                    ExitCode::FAILURE
                }
            }
        }
        "help" | "--help" | "-h" => {
            print_usage();
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("node-dispatch {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {command}");
            print_usage();
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &[String]) -> ExitCode {
    let config = match cli::load_config(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: {e}");
            return ExitCode::from(2u8);
        }
    };
    if let Err(e) = init_logging(&config.log) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let node = match Node::start(config) {
        Ok(node) => node,
        Err(e) => {
            tracing::error!(error = %e, "node failed to start");
            return ExitCode::FAILURE;
        }
    };

    let probe = node.health_probe();
    node.register_handler("/health", true, move |mut req, _| {
        match serde_json::to_vec(&probe.report()) {
            Ok(body) => {
                req.write_header("Content-Type", "application/json");
                req.write_reply(HttpStatus::Ok, body);
            }
            Err(e) => req.write_reply(HttpStatus::InternalServerError, e.to_string()),
        }
    });

    let probe = node.health_probe();
    let _heartbeat = node.scheduler().schedule_every(
        move || {
            let report = probe.report();
            tracing::info!(
                queue_depth = report.queue_depth,
                in_flight = report.in_flight_requests,
                scheduled = report.scheduler.pending,
                uptime_secs = report.uptime_secs,
                "heartbeat"
            );
        },
        HEARTBEAT_INTERVAL,
    );

    tracing::info!("node running; press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
    }

    match tokio::task::spawn_blocking(move || node.shutdown()).await {
        Ok(Ok(ShutdownResult::Complete)) => ExitCode::SUCCESS,
        Ok(Ok(ShutdownResult::Timeout { remaining })) => {
            tracing::warn!(remaining, "shutdown finished with replies undelivered");
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "shutdown failed");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, "shutdown task panicked");
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "node-dispatch v{version} - request dispatch and background scheduling core

USAGE:
    node-dispatch [COMMAND] [OPTIONS]

COMMANDS:
    run          Run the node (default when no command given)
    config       Inspect configuration (show, validate)
    version      Show version information
    help         Show this help message

OPTIONS:
    --config FILE  Load configuration from a TOML file instead of the environment
    --json         With `config show`, print JSON

ENVIRONMENT:
    NODE_RPC_WORKQUEUE            Max pending HTTP requests (default: 16)
    NODE_RPC_THREADS              HTTP worker threads (default: 4)
    NODE_RPC_SERVER_TIMEOUT       Per-request timeout in seconds (default: 30)
    NODE_RPC_ALLOW_IP             Comma-separated allowed subnets (loopback always allowed)
    NODE_RPC_EVENT_LOOP_GRACE_MS  I/O loop exit grace period (default: 2000)
    NODE_SCHEDULER_THREADS        Scheduler servicing threads (default: 1)
    NODE_SCHEDULER_DRAIN          Run pending jobs on shutdown (default: false)
    NODE_SHUTDOWN_TIMEOUT         In-flight drain timeout in seconds (default: 30)
    NODE_LOG_FORMAT               json or pretty (default: json)
    NODE_LOG_LEVEL                Log filter (default: info)
    NODE_LOG_FILE                 Log file path (default: stderr)

EXIT CODES:
    0  Success
    1  Failure
    2  Configuration error
"
    );
}
