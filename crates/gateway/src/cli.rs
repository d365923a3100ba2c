//! Command-line interface handling for the gateway.
//!
//! Every option here overrides the matching value from the configuration
//! file.

use clap::{value_parser, Arg, ArgMatches, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for bind address
    pub bind_address: Option<String>,
    /// Optional override for the WebSocket path
    pub path: Option<String>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Optional override for the wire format (json, binary)
    pub wire_format: Option<String>,
    /// Optional override for the connection ceiling
    pub max_connections: Option<usize>,
}

fn command() -> Command {
    Command::new("Game Gateway")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Real-time WebSocket gateway for multiplayer games")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("gateway.toml"),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDRESS")
                .help("Bind address (e.g., 0.0.0.0:8888)"),
        )
        .arg(
            Arg::new("path")
                .long("path")
                .value_name("PATH")
                .help("HTTP path accepting WebSocket upgrades (e.g., /ws)"),
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
        .arg(
            Arg::new("wire-format")
                .short('f')
                .long("wire-format")
                .value_name("FORMAT")
                .help("Wire format for client frames (json, binary)"),
        )
        .arg(
            Arg::new("max-connections")
                .short('m')
                .long("max-connections")
                .value_name("COUNT")
                .help("Maximum number of logged-in connections")
                .value_parser(value_parser!(usize)),
        )
}

impl CliArgs {
    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::try_parse_from(std::env::args_os()).unwrap_or_else(|e| e.exit())
    }

    /// Parses an explicit argument list.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("gateway.toml")),
            bind_address: matches.get_one::<String>("bind").cloned(),
            path: matches.get_one::<String>("path").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            wire_format: matches.get_one::<String>("wire-format").cloned(),
            max_connections: matches.get_one::<usize>("max-connections").copied(),
        }
    }
}
