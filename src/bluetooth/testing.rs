//! In-memory stand-ins for the platform bluetooth stack.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use futures::channel::mpsc::UnboundedSender;
use tokio::spawn;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bluetooth::platform::{AddressFilter, BondState, LeScanner, PrinterDevice, PrinterSocket, ScanSettings};
use crate::error::DeviceError;

/// Serial port profile
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

#[derive(Debug)]
struct DeviceInner {
    address: String,
    uuids: Vec<Uuid>,
    bond_state: Mutex<BondState>,
    connect_delay: Mutex<Duration>,
    fail_connect: AtomicBool,
    fail_bond: AtomicBool,
    fail_writes: AtomicBool,
    bond_requests: AtomicUsize,
    sockets_opened: AtomicUsize,
    sockets_closed: AtomicUsize,
    written: Mutex<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct FakeDevice {
    inner: Arc<DeviceInner>,
}

impl PartialEq for FakeDevice {
    fn eq(&self, other: &Self) -> bool {
        self.inner.address == other.inner.address
    }
}

impl FakeDevice {
    pub fn new(address: &str, bond_state: BondState) -> Self {
        FakeDevice::with_uuids(address, bond_state, vec![SPP_UUID])
    }

    pub fn with_uuids(address: &str, bond_state: BondState, uuids: Vec<Uuid>) -> Self {
        FakeDevice {
            inner: Arc::new(DeviceInner {
                address: address.to_string(),
                uuids,
                bond_state: Mutex::new(bond_state),
                connect_delay: Mutex::new(Duration::from_millis(500)),
                fail_connect: AtomicBool::new(false),
                fail_bond: AtomicBool::new(false),
                fail_writes: AtomicBool::new(false),
                bond_requests: AtomicUsize::new(0),
                sockets_opened: AtomicUsize::new(0),
                sockets_closed: AtomicUsize::new(0),
                written: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.inner.connect_delay.lock().unwrap() = delay;
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.inner.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_bond(&self, fail: bool) {
        self.inner.fail_bond.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_bond_state(&self, bond_state: BondState) {
        *self.inner.bond_state.lock().unwrap() = bond_state;
    }

    pub fn bond_requests(&self) -> usize {
        self.inner.bond_requests.load(Ordering::SeqCst)
    }

    pub fn sockets_opened(&self) -> usize {
        self.inner.sockets_opened.load(Ordering::SeqCst)
    }

    pub fn sockets_closed(&self) -> usize {
        self.inner.sockets_closed.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> Vec<u8> {
        self.inner.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl PrinterDevice for FakeDevice {
    type Socket = FakeSocket;

    fn address(&self) -> String {
        self.inner.address.clone()
    }

    async fn bond_state(&self) -> BondState {
        *self.inner.bond_state.lock().unwrap()
    }

    async fn service_uuids(&self) -> Vec<Uuid> {
        self.inner.uuids.clone()
    }

    async fn create_bond(&self) -> Result<(), DeviceError> {
        self.inner.bond_requests.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_bond.load(Ordering::SeqCst) {
            return Err(DeviceError::Io {
                source: io::Error::new(io::ErrorKind::PermissionDenied, "pairing rejected"),
            });
        }

        self.set_bond_state(BondState::Bonding);
        Ok(())
    }

    async fn open_socket(&self, _service: Uuid) -> Result<FakeSocket, DeviceError> {
        let delay = *self.inner.connect_delay.lock().unwrap();
        sleep(delay).await;

        if self.inner.fail_connect.load(Ordering::SeqCst) {
            return Err(DeviceError::Io {
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
            });
        }

        self.inner.sockets_opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSocket { device: self.inner.clone() })
    }
}

pub struct FakeSocket {
    device: Arc<DeviceInner>,
}

#[async_trait]
impl PrinterSocket for FakeSocket {
    async fn write(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        if self.device.fail_writes.load(Ordering::SeqCst) {
            return Err(DeviceError::Io {
                source: io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"),
            });
        }

        self.device.written.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DeviceError> {
        self.device.sockets_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Reports its devices after their delay, regardless of the filters, like some platforms do.
#[derive(Default)]
pub struct FakeScanner {
    devices: Mutex<Vec<(Duration, FakeDevice)>>,
    discovery: Mutex<Option<CancellationToken>>,
    filters: Mutex<Vec<AddressFilter>>,
    settings: Mutex<Option<ScanSettings>>,
    fail_start: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl FakeScanner {
    pub fn new() -> Self {
        FakeScanner::default()
    }

    pub fn discovers(&self, after: Duration, device: FakeDevice) {
        self.devices.lock().unwrap().push((after, device));
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn filters(&self) -> Vec<AddressFilter> {
        self.filters.lock().unwrap().clone()
    }

    pub fn settings(&self) -> Option<ScanSettings> {
        *self.settings.lock().unwrap()
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LeScanner for FakeScanner {
    type Device = FakeDevice;

    async fn start_scan(
        &self,
        filters: Vec<AddressFilter>,
        settings: ScanSettings,
        results: UnboundedSender<FakeDevice>,
    ) -> Result<(), DeviceError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(DeviceError::NoAdapter);
        }

        *self.filters.lock().unwrap() = filters;
        *self.settings.lock().unwrap() = Some(settings);

        let cancel = CancellationToken::new();
        if let Some(previous) = self.discovery.lock().unwrap().replace(cancel.clone()) {
            previous.cancel();
        }

        for (after, device) in self.devices.lock().unwrap().iter().cloned() {
            let cancel = cancel.clone();
            let results = results.clone();
            spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {},
                    _ = sleep(after) => {
                        let _ = results.unbounded_send(device);
                    },
                }
            });
        }

        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), DeviceError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if let Some(cancel) = self.discovery.lock().unwrap().take() {
            cancel.cancel();
        }
        Ok(())
    }
}
