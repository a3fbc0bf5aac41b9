use anyhow::Context;
use clap::Parser;
use image_migrator::cli::{Cli, Command, Runner};
use image_migrator::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let runner = Runner::new(cli.verbose);
    let forced_mode = cli.command.ledger_mode();
    match &cli.command {
        Command::Run(args) | Command::Sync(args) | Command::Migrate(args) => {
            runner
                .run(args, forced_mode)
                .await
                .with_context(|| format!("migration with {} failed", args.config.display()))?;
        }
        Command::Publish(args) => {
            runner
                .publish(args)
                .await
                .with_context(|| format!("publish with {} failed", args.config.display()))?;
        }
    }

    // partial failures are reported through the failure ledger, not the exit code
    Ok(())
}
