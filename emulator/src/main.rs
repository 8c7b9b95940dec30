//! Commonware Emulator CLI

use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;
use tracing::error;

mod commands;

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Flag for verbose output
const VERBOSE_FLAG: &str = "verbose";

/// Entrypoint for the Commonware Emulator CLI
#[tokio::main]
async fn main() -> std::process::ExitCode {
    // Define application
    let matches = Command::new("emulator")
        .version(crate_version())
        .about("Emulate a ledger network of containerized validators, gateways, and clients.")
        .arg(
            Arg::new(VERBOSE_FLAG)
                .short('v')
                .long(VERBOSE_FLAG)
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new(commands::UP_CMD)
                .about("Deploy every node of a YAML topology and run until interrupted.")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .required(true)
                        .help("Path to YAML topology file")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("concurrency")
                        .long("concurrency")
                        .default_value(commands::DEFAULT_CONCURRENCY)
                        .help("Maximum nodes to bring up at once (must be >= 1)")
                        .value_parser(clap::builder::RangedU64ValueParser::<usize>::new().range(1..)),
                ),
        )
        .subcommand(
            Command::new(commands::RENDER_CMD)
                .about("Write the genesis and node configurations of a YAML topology to a directory.")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .required(true)
                        .help("Path to YAML topology file")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .required(true)
                        .help("Directory to write artifacts to")
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new(commands::DOWN_CMD)
                .about("Remove every container (and the network) of a YAML topology.")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .required(true)
                        .help("Path to YAML topology file")
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .get_matches();

    // Create logger
    let level = if matches.get_flag(VERBOSE_FLAG) {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    // Parse subcommands
    match matches.subcommand() {
        Some((commands::UP_CMD, matches)) => {
            let config_path = matches.get_one::<PathBuf>("config").unwrap();
            let concurrency = *matches.get_one::<usize>("concurrency").unwrap();
            if let Err(e) = commands::up(config_path, concurrency).await {
                error!(error=?e, "failed to run network");
            } else {
                return std::process::ExitCode::SUCCESS;
            }
        }
        Some((commands::RENDER_CMD, matches)) => {
            let config_path = matches.get_one::<PathBuf>("config").unwrap();
            let output = matches.get_one::<PathBuf>("output").unwrap();
            if let Err(e) = commands::render(config_path, output) {
                error!(error=?e, "failed to render network");
            } else {
                return std::process::ExitCode::SUCCESS;
            }
        }
        Some((commands::DOWN_CMD, matches)) => {
            let config_path = matches.get_one::<PathBuf>("config").unwrap();
            if let Err(e) = commands::down(config_path).await {
                error!(error=?e, "failed to remove network");
            } else {
                return std::process::ExitCode::SUCCESS;
            }
        }
        Some((cmd, _)) => {
            error!(cmd, "invalid subcommand");
        }
        None => {
            error!("no subcommand provided");
        }
    }
    std::process::ExitCode::FAILURE
}
