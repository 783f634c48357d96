use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use clap::{Parser, Subcommand};
use log::{info, warn};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::bluetooth::btle::{watch_adapter, BtleScanner};
use crate::bluetooth::connection::BluetoothConnection;
use crate::bluetooth::platform::PrinterDevice;
use crate::bluetooth::raster::BluetoothImage;
use crate::bluetooth::scanner::BluetoothScanner;
use crate::bluetooth::state_manager::BluetoothStateManager;
use crate::config::io::ConfigIO;
use crate::config::types::Config;
use crate::error::{AppRunError, ConfigError};
use crate::printer::service::PrinterService;
use crate::printer::types::PrinterState;

pub mod bluetooth;
pub mod config;
pub mod error;
pub mod printer;
pub mod util;

pub fn init_logging(level: log::LevelFilter) {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        // btleplug is very chatty at debug level
        .level_for("btleplug", log::LevelFilter::Warn)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(
            fern::log_file(log_file).expect("Failed to open LOG_FILE")
        );
    }

    dispatch.apply().expect("Failed to initialize logger");
}

#[derive(Parser, Debug)]
#[command(author, version)]
#[command(about = "Finds, pairs with and prints to bluetooth receipt printers", long_about = None)]
pub struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn log_level(&self) -> log::LevelFilter {
        if self.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Look for a printer and connect to it
    Scan {
        /// Hardware addresses (XX:XX:XX:XX:XX:XX), defaults to the configured printers
        addresses: Vec<String>,
    },
    /// Print a line of text
    PrintText {
        /// Hardware address, may be repeated; defaults to the configured printers
        #[arg(short, long = "address")]
        addresses: Vec<String>,

        text: String,
    },
    /// Print an image file
    PrintImage {
        /// Hardware address, may be repeated; defaults to the configured printers
        #[arg(short, long = "address")]
        addresses: Vec<String>,

        /// Scale the image to the printable width
        #[arg(long)]
        fit: bool,

        path: PathBuf,
    },
    /// Show or edit the known printers
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    Show,
    AddPrinter { address: String },
    RemovePrinter { address: String },
}

/// A running printer pipeline. The adapter watcher stops when this is dropped.
struct Session {
    service: PrinterService<BtleScanner>,
    _adapter_watch: DropGuard,
}

async fn open_session(config: &Config) -> Result<Session, AppRunError> {
    let timings = config.timings();
    let backend = Arc::new(BtleScanner::new().await?);
    let state_manager = Arc::new(BluetoothStateManager::new(true));

    let cancel = CancellationToken::new();
    watch_adapter(backend.adapter().clone(), state_manager.clone(), cancel.clone()).await?;

    let service = PrinterService::new(
        state_manager,
        BluetoothScanner::with_timeout(backend, timings.scan_timeout),
        BluetoothConnection::with_timeout(timings.connect_timeout),
        timings.settle_delay,
    )?;

    Ok(Session { service, _adapter_watch: cancel.drop_guard() })
}

/// Runs the pipeline until it reaches `Connected`, returning the address of the printer.
async fn connect_printer(session: &Session, addresses: &[String]) -> Result<String, AppRunError> {
    let mut state = session.service.state();
    session.service.start(addresses).await;

    let mut found = None;
    let mut left_idle = false;

    loop {
        let current = state.borrow_and_update().clone();
        match current {
            PrinterState::Connected => {
                return Ok(found.unwrap_or_else(|| "unknown printer".to_string()));
            },
            PrinterState::Found(ref device) => {
                found = Some(device.address());
            },
            PrinterState::NotFound | PrinterState::Off => {
                return Err(AppRunError::PrinterUnavailable(current.to_string()));
            },
            PrinterState::Idle if left_idle => {
                return Err(AppRunError::PrinterUnavailable("connection failed".to_string()));
            },
            _ => {},
        }

        if !matches!(current, PrinterState::Idle) {
            left_idle = true;
        }

        if state.changed().await.is_err() {
            return Err(AppRunError::PrinterUnavailable("printer service stopped".to_string()));
        }
    }
}

fn resolve_addresses(config: &Config, addresses: Vec<String>) -> Result<Vec<String>, AppRunError> {
    let addresses = if addresses.is_empty() { config.printers.clone() } else { addresses };

    if addresses.is_empty() {
        return Err(AppRunError::PrinterUnavailable(
            "no printer address given and none configured".to_string()
        ));
    }

    Ok(addresses)
}

async fn run_config(config_io: &ConfigIO, command: ConfigCommand) -> Result<(), AppRunError> {
    let mut config = config_io.read().await?;

    match command {
        ConfigCommand::Show => {
            let content = serde_json::to_string_pretty(&config).map_err(ConfigError::from)?;
            println!("{}", config_io.path().to_string_lossy());
            println!("{}", content);
        },
        ConfigCommand::AddPrinter { address } => {
            if config.add_printer(&address) {
                config_io.save(&config).await?;
                info!("Added printer {}", address);
            } else {
                warn!("Printer {} is already configured", address);
            }
        },
        ConfigCommand::RemovePrinter { address } => {
            if config.remove_printer(&address) {
                config_io.save(&config).await?;
                info!("Removed printer {}", address);
            } else {
                warn!("Printer {} is not configured", address);
            }
        },
    }

    Ok(())
}

pub async fn run(cli: Cli) -> Result<(), AppRunError> {
    let config_io = ConfigIO::new_sync()?;

    // only one process may drive the printers or edit their config at a time
    let mut locker = config_io.locker()?;
    let _lock = locker.lock()?;

    let command = match cli.command {
        Command::Config(command) => return run_config(&config_io, command).await,
        command => command,
    };

    let config = config_io.read().await?;
    let session = open_session(&config).await?;

    match command {
        Command::Scan { addresses } => {
            let addresses = resolve_addresses(&config, addresses)?;
            let address = connect_printer(&session, &addresses).await?;
            println!("Connected to {}", address);
        },
        Command::PrintText { addresses, text } => {
            let addresses = resolve_addresses(&config, addresses)?;
            let address = connect_printer(&session, &addresses).await?;
            info!("Printing text on {}", address);
            session.service.try_print_text(&text).await?;
        },
        Command::PrintImage { addresses, fit, path } => {
            let mut image = image::open(&path)?;
            if fit {
                image = BluetoothImage::fit_to_width(&image);
            }

            let addresses = resolve_addresses(&config, addresses)?;
            let address = connect_printer(&session, &addresses).await?;
            info!("Printing {} on {}", path.to_string_lossy(), address);
            session.service.try_print_image(&image).await?;
        },
        Command::Config(_) => {},
    }

    session.service.terminate().await;
    Ok(())
}
