//! Command-line argument parsing: a single required config path.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "journal-shipper", about = "Ships systemd journal entries to a file or Kinesis")]
pub struct Cli {
    /// Path to the YAML (or JSON) configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,
}
