use anyhow::Result;
use clap::Parser;
use tracing::error;

use blocksync::cli::{self, Cli};
use blocksync::logging::init_logging;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // The guard flushes the file writer when dropped
    let _guard = init_logging(&cli.logging_config())?;

    if let Err(e) = cli::run(cli) {
        error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}
