use std::sync::{Arc, Mutex};
use futures::StreamExt;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::bluetooth::constants::SCAN_TIMEOUT;
use crate::bluetooth::platform::{matches_any, AddressFilter, LeScanner, PrinterDevice, ScanSettings};
use crate::util::countdown::CountdownTimer;

#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent<D> {
    Scanning(Duration),
    Found(D),
    NotFound,
}

/// Looks for one of a set of known printers, for at most `timeout`.
///
/// Finding a printer does not stop the scan, the subscriber is expected to call `stop_scan`.
pub struct BluetoothScanner<B: LeScanner> {
    backend: Arc<B>,
    countdown: CountdownTimer,
    timeout: Duration,
    settings: ScanSettings,
    // cancelled once the current scan cycle is over
    cycle: Mutex<Option<CancellationToken>>,
    events_tx: UnboundedSender<ScanEvent<B::Device>>,
    events_rx: Mutex<Option<UnboundedReceiver<ScanEvent<B::Device>>>>,
}

impl<B: LeScanner> BluetoothScanner<B> {
    pub fn new(backend: Arc<B>) -> Self {
        BluetoothScanner::with_timeout(backend, Duration::from_millis(SCAN_TIMEOUT))
    }

    pub fn with_timeout(backend: Arc<B>, timeout: Duration) -> Self {
        let (events_tx, events_rx) = unbounded();

        BluetoothScanner {
            backend,
            countdown: CountdownTimer::new(),
            timeout,
            settings: ScanSettings::default(),
            cycle: Mutex::new(None),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Hands out the event stream. There is a single subscriber: every later call returns `None`.
    pub fn take_events(&self) -> Option<UnboundedReceiver<ScanEvent<B::Device>>> {
        self.events_rx.lock().expect("Failed to lock BluetoothScanner events").take()
    }

    pub fn is_scanning(&self) -> bool {
        let cycle = self.cycle.lock().expect("Failed to lock BluetoothScanner cycle");
        cycle.as_ref().map_or(false, |cycle| !cycle.is_cancelled())
    }

    /// Scans for any of `addresses`. A scan that is already running is stopped first.
    pub async fn scan(&self, addresses: &[String]) {
        self.stop_scan().await;

        let filters: Vec<AddressFilter> = addresses.iter().map(|address| AddressFilter::new(address)).collect();
        let (results_tx, results_rx) = unbounded();

        info!("Scanning for {:?}...", filters.iter().map(AddressFilter::address).collect::<Vec<_>>());
        if let Err(err) = self.backend.start_scan(filters.clone(), self.settings, results_tx).await {
            warn!("Failed to start scanning: {}", err);
            send(&self.events_tx, ScanEvent::NotFound);
            return;
        }

        let cycle = CancellationToken::new();
        *self.cycle.lock().expect("Failed to lock BluetoothScanner cycle") = Some(cycle.clone());

        spawn(forward_first_match(cycle.clone(), filters, results_rx, self.events_tx.clone()));

        let backend = self.backend.clone();
        let timeout_events = self.events_tx.clone();
        let tick_events = self.events_tx.clone();
        self.countdown.start_timer(
            self.timeout,
            move || async move {
                cycle.cancel();
                if let Err(err) = backend.stop_scan().await {
                    warn!("Failed to stop scanning: {}", err);
                }
                info!("No printer found");
                send(&timeout_events, ScanEvent::NotFound);
            },
            move |remaining| send(&tick_events, ScanEvent::Scanning(remaining)),
        );
    }

    /// Stops the countdown and the platform scan. Does nothing if no scan is running.
    pub async fn stop_scan(&self) {
        self.countdown.stop_timer();

        let cycle = self.cycle.lock().expect("Failed to lock BluetoothScanner cycle").take();
        if let Some(cycle) = cycle {
            if cycle.is_cancelled() {
                return;
            }
            cycle.cancel();

            debug!("Stopping scan");
            if let Err(err) = self.backend.stop_scan().await {
                warn!("Failed to stop scanning: {}", err);
            }
        }
    }
}

fn send<D>(events: &UnboundedSender<ScanEvent<D>>, event: ScanEvent<D>) {
    if events.unbounded_send(event).is_err() {
        debug!("Scan event dropped, nobody is listening");
    }
}

async fn forward_first_match<D: PrinterDevice>(
    cycle: CancellationToken,
    filters: Vec<AddressFilter>,
    mut results: UnboundedReceiver<D>,
    events: UnboundedSender<ScanEvent<D>>,
) {
    'mainloop: loop {
        tokio::select! {
            _ = cycle.cancelled() => {
                break 'mainloop;
            },
            result = results.next() => {
                let device = match result {
                    Some(device) => device,
                    None => break 'mainloop,
                };

                let address = device.address();
                // Some platforms ignore the filter, so check the address again
                if !matches_any(&filters, &address) {
                    debug!("Ignoring scan result {}", address);
                    continue 'mainloop;
                }

                if cycle.is_cancelled() {
                    break 'mainloop;
                }

                info!("Found printer {}", address);
                send(&events, ScanEvent::Found(device));
                break 'mainloop;
            },
        }
    }
}
