use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

use crate::config::DEFAULT_CONFIG_PATH;

/// Replay buffer recorder with an HTTP control surface
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Settings file, created with defaults when missing
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// HTTP listen address, overrides the settings file
    #[arg(short, long, value_name = "ADDR")]
    pub listen: Option<SocketAddr>,

    /// Log verbosity (error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    pub log_level: log::LevelFilter,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["clipvault"]);
        assert_eq!(args.config, PathBuf::from("config/settings.json"));
        assert!(args.listen.is_none());
        assert_eq!(args.log_level, log::LevelFilter::Info);
    }

    #[test]
    fn test_overrides() {
        let args = Args::parse_from([
            "clipvault",
            "--config",
            "/etc/clipvault.json",
            "-l",
            "0.0.0.0:9000",
            "--log-level",
            "debug",
        ]);
        assert_eq!(args.config, PathBuf::from("/etc/clipvault.json"));
        assert_eq!(args.listen, Some(SocketAddr::from(([0, 0, 0, 0], 9000))));
        assert_eq!(args.log_level, log::LevelFilter::Debug);
    }
}
