//! The parts of the platform bluetooth stack the printer pipeline depends on.
//!
//! `btle` implements these on top of btleplug; tests use in-memory fakes.

use std::fmt::Debug;
use async_trait::async_trait;
use futures::channel::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::error::DeviceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondState {
    None,
    Bonding,
    Bonded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    LowPower,
    Balanced,
    LowLatency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSettings {
    pub mode: ScanMode,
}

impl Default for ScanSettings {
    fn default() -> Self {
        ScanSettings { mode: ScanMode::Balanced }
    }
}

/// Matches a single hardware address, ignoring case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressFilter {
    address: String,
}

impl AddressFilter {
    pub fn new(address: &str) -> Self {
        AddressFilter { address: address.trim().to_uppercase() }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn matches(&self, address: &str) -> bool {
        self.address.eq_ignore_ascii_case(address.trim())
    }
}

/// True if any of the filters matches `address`.
pub fn matches_any(filters: &[AddressFilter], address: &str) -> bool {
    filters.iter().any(|filter| filter.matches(address))
}

/// An open data channel to a printer.
#[async_trait]
pub trait PrinterSocket: Send + 'static {
    async fn write(&mut self, data: &[u8]) -> Result<(), DeviceError>;

    async fn flush(&mut self) -> Result<(), DeviceError>;

    async fn close(&mut self) -> Result<(), DeviceError>;
}

/// A remote device that was discovered during a scan.
#[async_trait]
pub trait PrinterDevice: Debug + Clone + PartialEq + Send + Sync + 'static {
    type Socket: PrinterSocket;

    fn address(&self) -> String;

    async fn bond_state(&self) -> BondState;

    /// Advertised service uuids, in advertisement order.
    async fn service_uuids(&self) -> Vec<Uuid>;

    /// Asks the platform to bond with the device. Completion is reported through
    /// `BluetoothStateManager::device_bonded`, not by this future.
    async fn create_bond(&self) -> Result<(), DeviceError>;

    async fn open_socket(&self, service: Uuid) -> Result<Self::Socket, DeviceError>;
}

/// A platform BLE scanner.
#[async_trait]
pub trait LeScanner: Send + Sync + 'static {
    type Device: PrinterDevice;

    /// Starts scanning; every device matching one of `filters` is sent to `results`.
    async fn start_scan(
        &self,
        filters: Vec<AddressFilter>,
        settings: ScanSettings,
        results: UnboundedSender<Self::Device>,
    ) -> Result<(), DeviceError>;

    async fn stop_scan(&self) -> Result<(), DeviceError>;
}
