//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! - `--pool <file>`: simulated device pool to operate on
//! - `--config <file>`: configuration file instead of the standard search
//! - `--verbose` / `-v`: debug logging
//! - `--json-log`: JSON log events on stderr
//! - `--test`: simulation mode, nothing is written

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Default pool file, relative to the working directory.
pub const DEFAULT_POOL_FILE: &str = "vgc-pool.json";

/// vgc - volume group metadata cache tool
#[derive(Parser, Debug)]
#[command(name = "vgc")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Simulated device pool file
    #[arg(long, global = true, value_name = "FILE", default_value = DEFAULT_POOL_FILE)]
    pub pool: PathBuf,

    /// Configuration file
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log as JSON
    #[arg(long, global = true)]
    pub json_log: bool,

    /// Simulation mode: metadata, labels, archives and backups are left
    /// untouched
    #[arg(short, long, global = true)]
    pub test: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// Available commands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Rescan every device and report what was found
    Scan,

    /// List volume groups
    Vgs,

    /// Print a volume group's metadata document
    Show {
        /// Volume group name
        vg: String,

        /// Read precommitted metadata
        #[arg(long)]
        precommitted: bool,
    },

    /// Back up a volume group's current metadata
    #[command(
        long_about = "Back up a volume group's current metadata.\n\n\
            The previous backup is archived first if it no longer matches the \
            group on disk."
    )]
    Backup {
        /// Volume group name
        vg: String,
    },

    /// List a volume group's archived metadata
    Archives {
        /// Volume group name
        vg: String,
    },

    /// Write backed-up or archived metadata back to the devices
    #[command(after_help = "\
EXAMPLES:
    # Restore the current backup
    vgc restore vg0

    # Restore a specific archive
    vgc archives vg0
    vgc restore vg0 --file /etc/vgcache/archive/vg0_00003-41020.vg")]
    Restore {
        /// Volume group name
        vg: String,

        /// Archive or backup file to restore from
        #[arg(long, value_name = "PATH")]
        file: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["vgc", "vgs", "--pool", "p.json", "--test", "-v"]).unwrap();
        assert_eq!(cli.pool, PathBuf::from("p.json"));
        assert!(cli.test);
        assert!(cli.verbose);
        assert_eq!(cli.command, Command::Vgs);
    }

    #[test]
    fn restore_file_is_optional() {
        let cli = Cli::try_parse_from(["vgc", "restore", "vg0"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Restore {
                vg: "vg0".to_string(),
                file: None
            }
        );
        assert_eq!(cli.pool, PathBuf::from(DEFAULT_POOL_FILE));
    }
}
