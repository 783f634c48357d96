use std::future::Future;
use std::sync::{Arc, Mutex};
use futures::StreamExt;
use futures::channel::mpsc::UnboundedReceiver;
use image::DynamicImage;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::bluetooth::connection::{BluetoothConnection, ConnectionEvent};
use crate::bluetooth::platform::{BondState, LeScanner, PrinterDevice};
use crate::bluetooth::scanner::{BluetoothScanner, ScanEvent};
use crate::bluetooth::state_manager::{BluetoothStateManager, StateEvent};
use crate::error::{SendError, ServiceError};
use crate::printer::types::PrinterState;

type Device<B> = <B as LeScanner>::Device;

/// Drives one printer: scans for it, pairs if needed, connects, and forwards print jobs.
///
/// The adapter state, scan events and connection events are observed by separate tasks and
/// folded into a single `PrinterState`. Transitions are last-write-wins.
pub struct PrinterService<B: LeScanner> {
    inner: Arc<Inner<B>>,
    cancel: CancellationToken,
}

struct Inner<B: LeScanner> {
    state: watch::Sender<PrinterState<Device<B>>>,
    state_manager: Arc<BluetoothStateManager<Device<B>>>,
    scanner: BluetoothScanner<B>,
    connection: BluetoothConnection<Device<B>>,
    settle_delay: Duration,
    // address of the device the current scan cycle settled on
    candidate: Mutex<Option<String>>,
    // work started by a scan result or a bond notification
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl<B: LeScanner> PrinterService<B> {
    /// Subscribes to the event streams of all three collaborators; must be called from
    /// within a tokio runtime.
    pub fn new(
        state_manager: Arc<BluetoothStateManager<Device<B>>>,
        scanner: BluetoothScanner<B>,
        connection: BluetoothConnection<Device<B>>,
        settle_delay: Duration,
    ) -> Result<Self, ServiceError> {
        let state_events = state_manager.take_events().ok_or(ServiceError::EventsTaken("bluetooth state"))?;
        let scan_events = scanner.take_events().ok_or(ServiceError::EventsTaken("scan"))?;
        let connection_events = connection.take_events().ok_or(ServiceError::EventsTaken("connection"))?;
        let enabled = state_manager.is_enabled();

        let (state, _) = watch::channel(PrinterState::Idle);
        let inner = Arc::new(Inner {
            state,
            state_manager,
            scanner,
            connection,
            settle_delay,
            candidate: Mutex::new(None),
            pending: Mutex::new(Vec::new()),
        });

        let cancel = CancellationToken::new();
        spawn(observe_adapter(inner.clone(), enabled, cancel.clone()));
        spawn(observe_state_events(inner.clone(), state_events, cancel.clone()));
        spawn(observe_scan_events(inner.clone(), scan_events, cancel.clone()));
        spawn(observe_connection_events(inner.clone(), connection_events, cancel.clone()));

        Ok(PrinterService { inner, cancel })
    }

    pub fn state(&self) -> watch::Receiver<PrinterState<Device<B>>> {
        self.inner.state.subscribe()
    }

    pub fn current_state(&self) -> PrinterState<Device<B>> {
        self.inner.state.borrow().clone()
    }

    pub fn state_manager(&self) -> &Arc<BluetoothStateManager<Device<B>>> {
        &self.inner.state_manager
    }

    /// Drops any connection and starts looking for one of `addresses`.
    pub async fn start(&self, addresses: &[String]) {
        self.inner.abort_pending();
        self.inner.set_candidate(None);
        self.inner.connection.terminate().await;
        self.inner.set_idle();

        self.inner.scanner.scan(addresses).await;
    }

    /// Stops whatever the service is doing. Safe to call in any state.
    pub async fn terminate(&self) {
        let state = self.current_state();
        self.inner.abort_pending();
        self.inner.set_candidate(None);

        match state {
            PrinterState::Scanning(_) => {
                self.inner.scanner.stop_scan().await;
            },
            PrinterState::Found(_) | PrinterState::Pairing | PrinterState::Connecting(_) | PrinterState::Connected => {
                self.inner.connection.terminate().await;
            },
            PrinterState::Off | PrinterState::Idle | PrinterState::NotFound => return,
        }

        self.inner.set_idle();
    }

    /// Sends raw bytes to the printer, e.g. commands that do not print by themselves.
    pub async fn write(&self, bytes: &[u8]) {
        self.inner.connection.send_bytes(bytes).await
    }

    pub async fn print_text(&self, text: &str) {
        self.inner.connection.send_text(text).await
    }

    pub async fn print_image(&self, image: &DynamicImage) {
        self.inner.connection.send_image(image).await
    }

    pub async fn try_write(&self, bytes: &[u8]) -> Result<(), SendError> {
        self.inner.connection.try_send_bytes(bytes).await
    }

    pub async fn try_print_text(&self, text: &str) -> Result<(), SendError> {
        self.inner.connection.try_send_text(text).await
    }

    pub async fn try_print_image(&self, image: &DynamicImage) -> Result<(), SendError> {
        self.inner.connection.try_send_image(image).await
    }

    /// Stops observing the collaborators. The service does not change state afterwards.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.inner.abort_pending();
    }
}

impl<B: LeScanner> Drop for PrinterService<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<B: LeScanner> Inner<B> {
    fn set_state(&self, next: PrinterState<Device<B>>) {
        let description = next.to_string();
        let mut previous: Option<&'static str> = None;

        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            previous = Some(current.name());
            *current = next;
            true
        });

        if !changed {
            return;
        }

        match previous {
            Some(previous) if !description.starts_with(previous) => info!("Printer state {} -> {}", previous, description),
            _ => debug!("Printer state {}", description),
        }
    }

    /// Idle, unless bluetooth is off.
    fn set_idle(&self) {
        if self.state_is(|state| matches!(state, PrinterState::Off)) {
            return;
        }
        self.set_state(PrinterState::Idle);
    }

    fn state_is<F: FnOnce(&PrinterState<Device<B>>) -> bool>(&self, predicate: F) -> bool {
        predicate(&*self.state.borrow())
    }

    fn set_candidate(&self, address: Option<String>) {
        *self.candidate.lock().expect("Failed to lock PrinterService candidate") = address;
    }

    fn is_candidate(&self, device: &Device<B>) -> bool {
        let candidate = self.candidate.lock().expect("Failed to lock PrinterService candidate");
        candidate.as_ref().map_or(false, |address| address.eq_ignore_ascii_case(&device.address()))
    }

    fn spawn_pending<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut pending = self.pending.lock().expect("Failed to lock PrinterService pending");
        pending.retain(|handle| !handle.is_finished());
        pending.push(spawn(work));
    }

    fn abort_pending(&self) {
        let pending: Vec<_> = self.pending.lock().expect("Failed to lock PrinterService pending").drain(..).collect();
        for handle in pending {
            handle.abort();
        }
    }

    async fn settle_and_connect(self: Arc<Self>, device: Device<B>) {
        sleep(self.settle_delay).await;

        if device.bond_state().await == BondState::Bonded {
            self.connection.connect(&device).await;
            return;
        }

        self.set_state(PrinterState::Pairing);
        info!("Pairing with printer {}...", device.address());
        if let Err(err) = device.create_bond().await {
            warn!("Failed to pair with printer {}: {}", device.address(), err);
            self.set_idle();
        }
    }
}

async fn observe_adapter<B: LeScanner>(inner: Arc<Inner<B>>, mut enabled: watch::Receiver<bool>, cancel: CancellationToken) {
    'mainloop: loop {
        let is_enabled = *enabled.borrow_and_update();
        if is_enabled {
            inner.set_state(PrinterState::Idle);
        } else {
            inner.set_state(PrinterState::Off);
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            changed = enabled.changed() => {
                if changed.is_err() {
                    break 'mainloop;
                }
            },
        }
    }
}

async fn observe_state_events<B: LeScanner>(
    inner: Arc<Inner<B>>,
    mut events: UnboundedReceiver<StateEvent<Device<B>>>,
    cancel: CancellationToken,
) {
    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            event = events.next() => match event {
                None => break 'mainloop,
                Some(StateEvent::Disconnected) => {
                    inner.set_idle();
                },
                Some(StateEvent::DeviceBonded(device)) => {
                    if !inner.state_is(|state| matches!(state, PrinterState::Pairing)) {
                        debug!("Ignoring bond with {}, not pairing", device.address());
                        continue 'mainloop;
                    }
                    if !inner.is_candidate(&device) {
                        debug!("Ignoring bond with {}, not the printer being paired", device.address());
                        continue 'mainloop;
                    }

                    info!("Paired with printer {}", device.address());
                    let inner2 = inner.clone();
                    inner.spawn_pending(async move {
                        inner2.connection.connect(&device).await;
                    });
                },
            },
        }
    }
}

async fn observe_scan_events<B: LeScanner>(
    inner: Arc<Inner<B>>,
    mut events: UnboundedReceiver<ScanEvent<Device<B>>>,
    cancel: CancellationToken,
) {
    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            event = events.next() => match event {
                None => break 'mainloop,
                Some(ScanEvent::Scanning(remaining)) => {
                    // a tick that raced with the scan result
                    if inner.state_is(PrinterState::has_candidate) {
                        continue 'mainloop;
                    }
                    inner.set_state(PrinterState::Scanning(remaining));
                },
                Some(ScanEvent::Found(device)) => {
                    inner.set_candidate(Some(device.address()));
                    inner.set_state(PrinterState::Found(device.clone()));
                    inner.scanner.stop_scan().await;

                    let inner2 = inner.clone();
                    inner.spawn_pending(inner2.settle_and_connect(device));
                },
                Some(ScanEvent::NotFound) => {
                    inner.set_state(PrinterState::NotFound);
                },
            },
        }
    }
}

async fn observe_connection_events<B: LeScanner>(
    inner: Arc<Inner<B>>,
    mut events: UnboundedReceiver<ConnectionEvent>,
    cancel: CancellationToken,
) {
    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            event = events.next() => match event {
                None => break 'mainloop,
                Some(ConnectionEvent::Connecting(remaining)) => {
                    inner.set_state(PrinterState::Connecting(remaining));
                },
                Some(ConnectionEvent::Connected) => {
                    inner.set_state(PrinterState::Connected);
                },
                Some(ConnectionEvent::Failed) => {
                    inner.set_idle();
                },
            },
        }
    }
}
