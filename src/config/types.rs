use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::bluetooth::constants::{CONNECT_TIMEOUT, SCAN_TIMEOUT, SETTLE_DELAY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub scan_timeout: Duration,
    pub connect_timeout: Duration,
    pub settle_delay: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            scan_timeout: Duration::from_millis(SCAN_TIMEOUT),
            connect_timeout: Duration::from_millis(CONNECT_TIMEOUT),
            settle_delay: Duration::from_millis(SETTLE_DELAY),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Hardware addresses of the printers to look for
    pub printers: Vec<String>,
    pub scan_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub settle_delay_ms: u64,
}

impl Config {
    pub fn normalize_printers(&mut self) {
        for printer in &mut self.printers {
            *printer = printer.trim().to_uppercase();
        }
        self.printers.retain(|printer| !printer.is_empty());
        self.printers.sort();
        self.printers.dedup();
    }

    /// Returns false if the printer was already known.
    pub fn add_printer(&mut self, address: &str) -> bool {
        let count = self.printers.len();
        self.printers.push(address.to_string());
        self.normalize_printers();
        self.printers.len() != count
    }

    /// Returns false if the printer was not known.
    pub fn remove_printer(&mut self, address: &str) -> bool {
        let count = self.printers.len();
        self.printers.retain(|printer| !printer.eq_ignore_ascii_case(address.trim()));
        self.printers.len() != count
    }

    pub fn timings(&self) -> Timings {
        Timings {
            scan_timeout: Duration::from_millis(self.scan_timeout_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            printers: Vec::new(),
            scan_timeout_ms: SCAN_TIMEOUT,
            connect_timeout_ms: CONNECT_TIMEOUT,
            settle_delay_ms: SETTLE_DELAY,
        }
    }
}
