//! btleplug backed implementation of the platform traits.
//!
//! BLE printers expose their print channel as a writable GATT characteristic, so the
//! "socket" is the first writable characteristic of the service the printer advertises,
//! and "bonding" is establishing the BLE link.

use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use futures::channel::mpsc::UnboundedSender;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bluetooth::constants::BLE_WRITE_CHUNK;
use crate::bluetooth::platform::{matches_any, AddressFilter, BondState, LeScanner, PrinterDevice, PrinterSocket, ScanSettings};
use crate::bluetooth::state_manager::BluetoothStateManager;
use crate::error::DeviceError;

pub struct BtleScanner {
    adapter: Adapter,
    discovery: Mutex<Option<CancellationToken>>,
}

impl BtleScanner {
    /// Uses the first adapter the platform reports.
    pub async fn new() -> Result<Self, DeviceError> {
        let manager = Manager::new().await?;
        let adapter = manager.adapters().await?
            .into_iter()
            .next()
            .ok_or(DeviceError::NoAdapter)?;

        info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
        Ok(BtleScanner {
            adapter,
            discovery: Mutex::new(None),
        })
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }
}

#[async_trait]
impl LeScanner for BtleScanner {
    type Device = BtleDevice;

    async fn start_scan(
        &self,
        filters: Vec<AddressFilter>,
        settings: ScanSettings,
        results: UnboundedSender<BtleDevice>,
    ) -> Result<(), DeviceError> {
        debug!("Scan mode {:?} is left to the platform", settings.mode);

        let mut events = self.adapter.events().await?;
        // btleplug only filters on services, addresses are matched below
        self.adapter.start_scan(ScanFilter::default()).await?;

        let cancel = CancellationToken::new();
        let previous = self.discovery.lock().expect("Failed to lock BtleScanner discovery").replace(cancel.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        let adapter = self.adapter.clone();
        spawn(async move {
            'mainloop: loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        break 'mainloop;
                    },
                    event = events.next() => {
                        let id = match event {
                            Some(CentralEvent::DeviceDiscovered(id)) | Some(CentralEvent::DeviceUpdated(id)) => id,
                            Some(_) => continue 'mainloop,
                            None => break 'mainloop,
                        };

                        let peripheral = match adapter.peripheral(&id).await {
                            Ok(peripheral) => peripheral,
                            Err(err) => {
                                warn!("Could not query discovered peripheral {:?}: {}", id, err);
                                continue 'mainloop;
                            },
                        };

                        if !matches_any(&filters, &peripheral.address().to_string()) {
                            continue 'mainloop;
                        }

                        if results.unbounded_send(BtleDevice::new(peripheral)).is_err() {
                            // the scanner is no longer interested in results
                            break 'mainloop;
                        }
                    },
                }
            }
        });

        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), DeviceError> {
        let discovery = self.discovery.lock().expect("Failed to lock BtleScanner discovery").take();
        if let Some(discovery) = discovery {
            discovery.cancel();
        }

        self.adapter.stop_scan().await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BtleDevice {
    peripheral: Peripheral,
}

impl BtleDevice {
    pub fn new(peripheral: Peripheral) -> Self {
        BtleDevice { peripheral }
    }

    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }
}

impl PartialEq for BtleDevice {
    fn eq(&self, other: &Self) -> bool {
        self.peripheral.id() == other.peripheral.id()
    }
}

#[async_trait]
impl PrinterDevice for BtleDevice {
    type Socket = BtleSocket;

    fn address(&self) -> String {
        self.peripheral.address().to_string()
    }

    async fn bond_state(&self) -> BondState {
        match self.peripheral.is_connected().await {
            Ok(true) => BondState::Bonded,
            Ok(false) => BondState::None,
            Err(err) => {
                warn!("Error checking for connection state: {:?}", err);
                BondState::None
            },
        }
    }

    async fn service_uuids(&self) -> Vec<Uuid> {
        let advertised = match self.peripheral.properties().await {
            Ok(Some(properties)) => properties.services,
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!("Could not query peripheral for properties: {:?}", err);
                Vec::new()
            },
        };

        if !advertised.is_empty() {
            return advertised;
        }

        // Not every printer advertises its services; once connected they are known anyway
        self.peripheral.services().iter().map(|service| service.uuid).collect()
    }

    async fn create_bond(&self) -> Result<(), DeviceError> {
        info!("Connecting to peripheral {}...", self.address());
        self.peripheral.connect().await?;
        self.peripheral.discover_services().await?;
        Ok(())
    }

    async fn open_socket(&self, service: Uuid) -> Result<BtleSocket, DeviceError> {
        if !self.peripheral.is_connected().await? {
            self.peripheral.connect().await?;
        }

        debug!("Discovering services...");
        self.peripheral.discover_services().await?;

        let writable = CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE;
        let characteristic = self.peripheral.characteristics()
            .into_iter()
            .find(|characteristic| {
                characteristic.service_uuid == service && characteristic.properties.intersects(writable)
            })
            .ok_or(DeviceError::MissingCharacteristic)?;

        let write_type = if characteristic.properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE) {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };

        info!("Writing to characteristic {:?} {:?}", service, characteristic.uuid);
        Ok(BtleSocket {
            peripheral: self.peripheral.clone(),
            characteristic,
            write_type,
        })
    }
}

pub struct BtleSocket {
    peripheral: Peripheral,
    characteristic: Characteristic,
    write_type: WriteType,
}

#[async_trait]
impl PrinterSocket for BtleSocket {
    async fn write(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        for chunk in data.chunks(BLE_WRITE_CHUNK) {
            self.peripheral.write(&self.characteristic, chunk, self.write_type).await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DeviceError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

/// Feeds adapter events into `state_manager`: a peripheral link coming up counts as bonded,
/// any link going down as disconnected.
pub async fn watch_adapter(
    adapter: Adapter,
    state_manager: Arc<BluetoothStateManager<BtleDevice>>,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>, DeviceError> {
    let mut events = adapter.events().await?;

    Ok(spawn(async move {
        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                event = events.next() => match event {
                    Some(CentralEvent::DeviceConnected(id)) => match adapter.peripheral(&id).await {
                        Ok(peripheral) => state_manager.device_bonded(BtleDevice::new(peripheral)),
                        Err(err) => warn!("Could not query connected peripheral {:?}: {}", id, err),
                    },
                    Some(CentralEvent::DeviceDisconnected(id)) => {
                        debug!("Peripheral {:?} disconnected", id);
                        state_manager.disconnected();
                    },
                    Some(_) => {},
                    None => {
                        warn!("Adapter event stream ended");
                        state_manager.update_bluetooth_state(false);
                        break 'mainloop;
                    },
                },
            }
        }
    }))
}
