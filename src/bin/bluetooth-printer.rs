use clap::Parser;
use log::{error, info};
use bluetooth_printer::{init_logging, run, Cli};
use bluetooth_printer::error::{AppRunError, ConfigError};

#[tokio::main]
async fn main() -> Result<(), AppRunError> {
    let cli = Cli::parse();
    init_logging(cli.log_level());
    info!(concat!("Bluetooth Printer ", env!("CARGO_PKG_VERSION")));

    match run(cli).await {
        Err(err @ AppRunError::Config { source: ConfigError::CanNotLock { .. } }) => {
            error!("Another instance is already using the printer");
            Err(err)
        },
        Err(err) => {
            error!("Unexpected error: {}", err);
            Err(err)
        },
        Ok(_) => Ok(()),
    }
}
