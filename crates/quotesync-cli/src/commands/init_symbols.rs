use quotesync_core::{ScraperConfig, SymbolUniverse};
use tracing::info;

use crate::cli::InitSymbolsArgs;
use crate::error::CliError;

pub fn run(config: &ScraperConfig, args: &InitSymbolsArgs) -> Result<(), CliError> {
    let path = &config.symbols_file;
    if path.exists() && !args.force {
        return Err(CliError::SymbolsFileExists(path.clone()));
    }

    let count = SymbolUniverse::write_default(path)?;
    info!(path = %path.display(), count, "symbols file written");
    println!("wrote {count} symbols to {}", path.display());
    Ok(())
}
