use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use image::DynamicImage;
use log::{debug, info, warn};
use tokio::time::Duration;

use crate::bluetooth::constants::CONNECT_TIMEOUT;
use crate::bluetooth::raster::BluetoothImage;
use crate::bluetooth::platform::{PrinterDevice, PrinterSocket};
use crate::bluetooth::text::encode_text_line;
use crate::error::{DeviceError, SendError};
use crate::util::countdown::CountdownTimer;

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connecting(Duration),
    Connected,
    Failed,
}

/// The socket slot, guarded by a generation counter.
///
/// Every connect attempt and every terminate bumps the epoch. A socket opened by an attempt
/// whose epoch is no longer current is closed instead of installed, since the platform
/// connect call itself cannot be interrupted.
struct Link<S> {
    socket: tokio::sync::Mutex<Option<S>>,
    epoch: AtomicU64,
}

impl<S: PrinterSocket> Link<S> {
    fn new() -> Self {
        Link {
            socket: tokio::sync::Mutex::new(None),
            epoch: AtomicU64::new(0),
        }
    }

    fn invalidate(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Moves the epoch past `epoch` if it is still current. Only one of `install` and `expire`
    /// can succeed for the same attempt.
    fn finish(&self, epoch: u64) -> bool {
        self.epoch.compare_exchange(epoch, epoch + 1, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }

    /// Installs `socket` if `epoch` is still current, otherwise hands it back.
    async fn install(&self, epoch: u64, socket: S) -> Result<(), S> {
        let previous = {
            let mut current = self.socket.lock().await;
            if !self.finish(epoch) {
                return Err(socket);
            }
            current.replace(socket)
        };

        if let Some(previous) = previous {
            close_socket(previous).await;
        }
        Ok(())
    }

    async fn close(&self) {
        let socket = self.socket.lock().await.take();
        if let Some(socket) = socket {
            close_socket(socket).await;
            info!("Printer connection closed");
        }
    }

    /// Gives up on the attempt started under `epoch` and closes the socket, unless that
    /// attempt already installed its socket or was superseded. Returns false in that case.
    async fn expire(&self, epoch: u64) -> bool {
        let mut current = self.socket.lock().await;
        if !self.finish(epoch) {
            return false;
        }

        if let Some(socket) = current.take() {
            close_socket(socket).await;
            info!("Printer connection closed");
        }
        true
    }
}

async fn close_socket<S: PrinterSocket>(mut socket: S) {
    if let Err(err) = socket.close().await {
        warn!("Failed to close printer socket: {}", err);
    }
}

/// Owns the one socket to the printer.
pub struct BluetoothConnection<D: PrinterDevice> {
    countdown: CountdownTimer,
    timeout: Duration,
    link: Arc<Link<D::Socket>>,
    events_tx: UnboundedSender<ConnectionEvent>,
    events_rx: Mutex<Option<UnboundedReceiver<ConnectionEvent>>>,
}

impl<D: PrinterDevice> BluetoothConnection<D> {
    pub fn new() -> Self {
        BluetoothConnection::with_timeout(Duration::from_millis(CONNECT_TIMEOUT))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let (events_tx, events_rx) = unbounded();

        BluetoothConnection {
            countdown: CountdownTimer::new(),
            timeout,
            link: Arc::new(Link::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Hands out the event stream. There is a single subscriber: every later call returns `None`.
    pub fn take_events(&self) -> Option<UnboundedReceiver<ConnectionEvent>> {
        self.events_rx.lock().expect("Failed to lock BluetoothConnection events").take()
    }

    pub async fn is_connected(&self) -> bool {
        self.link.socket.lock().await.is_some()
    }

    /// Opens a socket to the first service the device advertises.
    ///
    /// Progress and outcome are reported as events; this future resolves once the platform
    /// connect call returns, which may be after the attempt already timed out.
    pub async fn connect(&self, device: &D) {
        let epoch = self.link.invalidate();

        let link = self.link.clone();
        let timeout_events = self.events_tx.clone();
        let tick_events = self.events_tx.clone();
        self.countdown.start_timer(
            self.timeout,
            move || async move {
                if !link.expire(epoch).await {
                    return;
                }
                warn!("Connecting to printer timed out");
                send(&timeout_events, ConnectionEvent::Failed);
            },
            move |remaining| send(&tick_events, ConnectionEvent::Connecting(remaining)),
        );

        info!("Connecting to printer {}...", device.address());
        let service = match device.service_uuids().await.first().copied() {
            Some(service) => service,
            None => {
                warn!("Connecting to printer failed: {}", DeviceError::NoServiceUuid);
                self.fail(epoch).await;
                return;
            },
        };

        match device.open_socket(service).await {
            Ok(socket) => match self.link.install(epoch, socket).await {
                Ok(()) => {
                    self.countdown.stop_timer();
                    info!("Connected to printer {}", device.address());
                    send(&self.events_tx, ConnectionEvent::Connected);
                },
                Err(stale) => {
                    debug!("Discarding socket of an abandoned connection attempt");
                    close_socket(stale).await;
                },
            },
            Err(err) => {
                warn!("Connecting to printer failed: {}", err);
                self.fail(epoch).await;
            },
        }
    }

    async fn fail(&self, epoch: u64) {
        if !self.link.expire(epoch).await {
            return;
        }
        self.countdown.stop_timer();
        send(&self.events_tx, ConnectionEvent::Failed);
    }

    /// Stops a pending connect countdown and closes the socket. Safe to call at any time.
    pub async fn terminate(&self) {
        self.countdown.stop_timer();
        self.link.invalidate();
        self.link.close().await;
    }

    pub async fn try_send_bytes(&self, data: &[u8]) -> Result<(), SendError> {
        let mut socket = self.link.socket.lock().await;
        let socket = socket.as_mut().ok_or(SendError::NotConnected)?;

        socket.write(data).await?;
        socket.flush().await?;
        Ok(())
    }

    pub async fn try_send_text(&self, text: &str) -> Result<(), SendError> {
        self.try_send_bytes(&encode_text_line(text)).await
    }

    pub async fn try_send_image(&self, image: &DynamicImage) -> Result<(), SendError> {
        let raster = BluetoothImage::new(image)?;
        self.try_send_bytes(raster.as_bytes()).await
    }

    /// Like `try_send_bytes`, but failures are only logged.
    pub async fn send_bytes(&self, data: &[u8]) {
        log_send_failure(self.try_send_bytes(data).await);
    }

    pub async fn send_text(&self, text: &str) {
        log_send_failure(self.try_send_text(text).await);
    }

    pub async fn send_image(&self, image: &DynamicImage) {
        log_send_failure(self.try_send_image(image).await);
    }
}

impl<D: PrinterDevice> Default for BluetoothConnection<D> {
    fn default() -> Self {
        BluetoothConnection::new()
    }
}

fn log_send_failure(result: Result<(), SendError>) {
    if let Err(err) = result {
        warn!("Failed to send to printer: {}", err);
    }
}

fn send(events: &UnboundedSender<ConnectionEvent>, event: ConnectionEvent) {
    if events.unbounded_send(event).is_err() {
        debug!("Connection event dropped, nobody is listening");
    }
}
