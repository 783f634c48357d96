use std::sync::Mutex;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use log::debug;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq)]
pub enum StateEvent<D> {
    Disconnected,
    DeviceBonded(D),
}

/// Adapter on/off status and bond/disconnect notifications, fed by the platform.
pub struct BluetoothStateManager<D> {
    enabled: watch::Sender<bool>,
    events_tx: UnboundedSender<StateEvent<D>>,
    events_rx: Mutex<Option<UnboundedReceiver<StateEvent<D>>>>,
}

impl<D> BluetoothStateManager<D> {
    pub fn new(is_enabled: bool) -> Self {
        let (enabled, _) = watch::channel(is_enabled);
        let (events_tx, events_rx) = unbounded();

        BluetoothStateManager {
            enabled,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    pub fn is_enabled(&self) -> watch::Receiver<bool> {
        self.enabled.subscribe()
    }

    pub fn update_bluetooth_state(&self, is_enabled: bool) {
        self.enabled.send_if_modified(|current| {
            if *current == is_enabled {
                return false;
            }
            *current = is_enabled;
            true
        });
    }

    pub fn device_bonded(&self, device: D) {
        self.send(StateEvent::DeviceBonded(device));
    }

    pub fn disconnected(&self) {
        self.send(StateEvent::Disconnected);
    }

    /// Hands out the event stream. There is a single subscriber: every later call returns `None`.
    pub fn take_events(&self) -> Option<UnboundedReceiver<StateEvent<D>>> {
        self.events_rx.lock().expect("Failed to lock BluetoothStateManager events").take()
    }

    fn send(&self, event: StateEvent<D>) {
        if self.events_tx.unbounded_send(event).is_err() {
            debug!("Bluetooth state event dropped, nobody is listening");
        }
    }
}
