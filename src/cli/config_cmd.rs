//! Config CLI subcommands: show, validate.
//!
//! These read configuration from the environment (or a TOML file given
//! with `--config`) without starting the node.

use crate::config::{EffectiveConfig, NodeConfig};

/// Print effective config as key-value pairs to stdout.
pub fn run_show(config: &NodeConfig, json: bool) -> i32 {
    let cfg = config.effective();
    if json {
        match serde_json::to_string_pretty(&cfg) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Failed to serialize configuration: {e}");
                return 1;
            }
        }
    } else {
        print_config(&cfg);
    }
    0
}

/// Check the configuration the node would refuse to start with.
///
/// Returns 0 if valid, 2 on a configuration error.
pub fn run_validate(config: &NodeConfig) -> i32 {
    match config.validate() {
        Ok(()) => {
            println!("Configuration is valid.");
            0
        }
        Err(e) => {
            eprintln!("ERROR: {e}");
            2
        }
    }
}

fn print_config(cfg: &EffectiveConfig) {
    println!("NODE_RPC_WORKQUEUE={}", cfg.work_queue_depth);
    println!("NODE_RPC_THREADS={}", cfg.worker_threads);
    println!("NODE_RPC_SERVER_TIMEOUT={}", cfg.server_timeout_secs);
    println!("NODE_RPC_ALLOW_IP={}", cfg.allow_ip.join(","));
    println!("NODE_RPC_EVENT_LOOP_GRACE_MS={}", cfg.event_loop_grace_ms);
    println!("NODE_SCHEDULER_THREADS={}", cfg.scheduler_threads);
    println!("NODE_SCHEDULER_DRAIN={}", cfg.scheduler_drain_on_stop);
    println!("NODE_SHUTDOWN_TIMEOUT={}", cfg.shutdown_timeout_secs);
    println!("NODE_LOG_FORMAT={:?}", cfg.log_format);
    println!("NODE_LOG_LEVEL={}", cfg.log_level);
    if let Some(path) = &cfg.log_file {
        println!("NODE_LOG_FILE={}", path.display());
    }
    println!("max_headers_size={}", cfg.max_headers_size);
    println!("max_body_size={}", cfg.max_body_size);
    println!("thread_name_prefix={}", cfg.thread_name_prefix);
}
