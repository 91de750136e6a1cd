//! Command-line interface handling for the Horizon cluster node.
//!
//! Parsed with the `clap` builder API. Every flag except `--config` and
//! `--json-logs` overrides a setting from the configuration file.

use clap::{Arg, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the advertised `host:port`
    pub bind_address: Option<String>,
    /// Optional override for the server identity
    pub server_id: Option<String>,
    /// Optional override for the coordination store URL
    pub store_url: Option<String>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

impl CliArgs {
    /// Parses command line arguments using clap.
    ///
    /// # Returns
    ///
    /// A `CliArgs` instance containing all parsed command-line options.
    pub fn parse() -> Self {
        Self::from_matches(Self::command().get_matches())
    }

    /// Parses an explicit argument list; the first item is the binary name.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_matches(Self::command().try_get_matches_from(args)?))
    }

    fn command() -> Command {
        Command::new("Horizon Cluster Node")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Session coordination for a cluster of Horizon servers")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("config.toml"),
            )
            .arg(
                Arg::new("bind")
                    .short('b')
                    .long("bind")
                    .value_name("ADDRESS")
                    .help("Advertised address of this server (e.g., 10.0.0.7:25565)"),
            )
            .arg(
                Arg::new("server-id")
                    .long("server-id")
                    .value_name("ID")
                    .help("Server identity; defaults to the advertised host:port"),
            )
            .arg(
                Arg::new("store-url")
                    .long("store-url")
                    .value_name("URL")
                    .help("Coordination store (e.g., redis://127.0.0.1:6379/0)"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(clap::ArgAction::SetTrue),
            )
    }

    fn from_matches(matches: clap::ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config.toml")),
            bind_address: matches.get_one::<String>("bind").cloned(),
            server_id: matches.get_one::<String>("server-id").cloned(),
            store_url: matches.get_one::<String>("store-url").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}
