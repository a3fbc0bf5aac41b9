//! Command-line argument parsing

use crate::ledger::LedgerMode;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "image-migrator")]
#[command(about = "Migrate container images in bulk between two registries")]
#[command(version)]
pub struct Cli {
    /// Verbose output
    #[arg(long = "verbose", short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Migrate using the sync_method from the config file
    Run(RunArgs),
    /// Migrate, keeping earlier failure records
    Sync(RunArgs),
    /// Migrate, resetting the failure ledger first
    Migrate(RunArgs),
    /// Insert image metadata rows for every image in the success ledger
    Publish(PublishArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(
        long = "config",
        short = 'c',
        default_value = "./config/config.yaml",
        help = "Path to the YAML config file"
    )]
    pub config: PathBuf,

    #[arg(long = "proc", short = 'p', help = "Number of images migrated in parallel")]
    pub proc: Option<usize>,

    #[arg(
        long = "image-list",
        short = 'l',
        help = "Spreadsheet of images to migrate instead of the catalog query"
    )]
    pub image_list: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct PublishArgs {
    #[arg(
        long = "config",
        short = 'c',
        default_value = "./config/config.yaml",
        help = "Path to the YAML config file"
    )]
    pub config: PathBuf,
}

impl Command {
    /// Ledger mode forced by the subcommand; `None` defers to the config
    pub fn ledger_mode(&self) -> Option<LedgerMode> {
        match self {
            Command::Sync(_) => Some(LedgerMode::Sync),
            Command::Migrate(_) => Some(LedgerMode::Migration),
            Command::Run(_) | Command::Publish(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_with_overrides() {
        let cli = Cli::try_parse_from([
            "image-migrator",
            "migrate",
            "--config",
            "/etc/sync.yaml",
            "--proc",
            "8",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.command.ledger_mode(), Some(LedgerMode::Migration));
        let Command::Migrate(args) = cli.command else {
            panic!("expected migrate");
        };
        assert_eq!(args.config, PathBuf::from("/etc/sync.yaml"));
        assert_eq!(args.proc, Some(8));
        assert!(args.image_list.is_none());
    }

    #[test]
    fn test_run_uses_default_config() {
        let cli = Cli::try_parse_from(["image-migrator", "run"]).unwrap();
        assert_eq!(cli.command.ledger_mode(), None);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.config, PathBuf::from("./config/config.yaml"));
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
