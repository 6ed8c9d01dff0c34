//! CLI helpers for the `node-dispatch` binary.

pub mod config_cmd;

use std::path::PathBuf;

use crate::config::{self, ConfigError, NodeConfig};

/// Value of `--config FILE` (or `--config=FILE`) among `args`.
pub fn config_path(args: &[String]) -> Option<PathBuf> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            return iter.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}

/// Load from the `--config` file if one is given, else from the environment.
pub fn load_config(args: &[String]) -> Result<NodeConfig, ConfigError> {
    match config_path(args) {
        Some(path) => NodeConfig::from_file(path),
        None => Ok(config::load()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_config_path_forms() {
        assert_eq!(
            config_path(&args(&["run", "--config", "/etc/node.toml"])),
            Some(PathBuf::from("/etc/node.toml"))
        );
        assert_eq!(
            config_path(&args(&["run", "--config=node.toml"])),
            Some(PathBuf::from("node.toml"))
        );
        assert_eq!(config_path(&args(&["run"])), None);
        assert_eq!(config_path(&args(&["run", "--config"])), None);
    }

    #[test]
    fn test_load_config_reports_missing_file() {
        let result = load_config(&args(&["--config", "/nonexistent/node.toml"]));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
