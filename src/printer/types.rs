use std::fmt;
use tokio::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum PrinterState<D> {
    /// Bluetooth is turned off
    Off,
    /// Bluetooth is on, but nothing is going on
    Idle,
    Scanning(Duration),
    NotFound,
    Found(D),
    Pairing,
    Connecting(Duration),
    Connected,
}

impl<D> PrinterState<D> {
    pub fn name(&self) -> &'static str {
        match self {
            PrinterState::Off => "Off",
            PrinterState::Idle => "Idle",
            PrinterState::Scanning(_) => "Scanning",
            PrinterState::NotFound => "NotFound",
            PrinterState::Found(_) => "Found",
            PrinterState::Pairing => "Pairing",
            PrinterState::Connecting(_) => "Connecting",
            PrinterState::Connected => "Connected",
        }
    }

    /// A printer was found during the current cycle and is being paired or connected to.
    pub fn has_candidate(&self) -> bool {
        matches!(
            self,
            PrinterState::Found(_) | PrinterState::Pairing | PrinterState::Connecting(_) | PrinterState::Connected
        )
    }
}

impl<D> fmt::Display for PrinterState<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrinterState::Scanning(remaining) | PrinterState::Connecting(remaining) => {
                write!(f, "{} ({}s)", self.name(), remaining.as_secs())
            },
            _ => write!(f, "{}", self.name()),
        }
    }
}
