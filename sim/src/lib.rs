// Copyright (c) 2019-2023 Crater Dog Technologies

//! Simulated ArmorD peripheral
//!
//! [SimTransport] wraps an [armord_core] [Engine] behind the [Transport]
//! interface, behaving like the BLE UART characteristic of a real device:
//! writes are acknowledged once the engine has consumed a block and responses
//! are delivered as notifications. Faults (failed writes, rejected or lost
//! responses, disconnects) may be injected to exercise pipeline retries.
//!
//! [SimProvider] implements [Connect] for the simulated device, advertising
//! after a configurable delay.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use armord::{Connect, Error, Notification, Transport, TransportError};
use armord_core::engine::{Engine, Output, State};
use armord_proto::{block::BLOCK_MARKER, FAILURE, KEY_SIZE};

/// Reason code for injected response failures
pub const INJECTED_FAILURE: u8 = 0x7F;

/// Default simulated device name
pub const DEVICE_NAME: &str = "ArmorD";

/// Simulated peripheral options
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize, clap::Args)]
#[serde(default)]
pub struct SimOptions {
    /// Advertised device name
    #[clap(long, default_value = DEVICE_NAME)]
    pub name: String,

    /// Maximum write length accepted by the characteristic
    #[clap(long, default_value = "512")]
    pub mtu: usize,

    /// Notify an acknowledgement for each intermediate block
    #[clap(long)]
    pub block_acks: bool,

    /// Delay before the device advertises (milliseconds)
    #[clap(long, default_value = "10")]
    pub advertise_delay_ms: u64,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            name: DEVICE_NAME.to_string(),
            mtu: 512,
            block_acks: false,
            advertise_delay_ms: 10,
        }
    }
}

/// Injected faults, each consumed as it fires
#[derive(Clone, PartialEq, Debug, Default)]
struct Faults {
    fail_writes: usize,
    reject_responses: usize,
    drop_responses: usize,
    disconnect_on_response: bool,
}

struct Inner {
    engine: Engine,
    connected: bool,
    subscribers: Vec<UnboundedSender<Notification>>,
    writes: Vec<Vec<u8>>,
    faults: Faults,
}

impl Inner {
    fn notify(&mut self, n: Notification) {
        // Drop subscribers that have gone away
        self.subscribers.retain(|tx| tx.send(n.clone()).is_ok());
    }
}

/// Simulated ArmorD [Transport], clones share the same device
#[derive(Clone)]
pub struct SimTransport {
    inner: Arc<Mutex<Inner>>,
    opts: SimOptions,
}

impl SimTransport {
    /// Create a connected simulated device with a fresh engine
    pub fn new(opts: SimOptions) -> Self {
        Self::with_engine(Engine::new(), opts)
    }

    /// Create a connected simulated device wrapping the provided engine
    pub fn with_engine(engine: Engine, opts: SimOptions) -> Self {
        let inner = Inner {
            engine,
            connected: true,
            subscribers: vec![],
            writes: vec![],
            faults: Faults::default(),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
            opts,
        }
    }

    pub fn options(&self) -> &SimOptions {
        &self.opts
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Simulator state stays usable if a test panics while holding it
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the next `n` writes
    pub fn fail_writes(&self, n: usize) -> &Self {
        self.lock().faults.fail_writes = n;
        self
    }

    /// Answer the next `n` complete requests with `[0xFF, INJECTED_FAILURE]`
    pub fn reject_responses(&self, n: usize) -> &Self {
        self.lock().faults.reject_responses = n;
        self
    }

    /// Lose the next `n` responses
    pub fn drop_responses(&self, n: usize) -> &Self {
        self.lock().faults.drop_responses = n;
        self
    }

    /// Disconnect instead of notifying the next response
    pub fn disconnect_on_response(&self) -> &Self {
        self.lock().faults.disconnect_on_response = true;
        self
    }

    /// Drop the connection, notifying subscribers
    pub fn disconnect(&self) {
        let mut i = self.lock();

        debug!("Simulated device disconnected");

        i.connected = false;
        i.notify(Notification::Disconnected);
    }

    /// Restore the connection
    pub fn reconnect(&self) {
        debug!("Simulated device reconnected");

        self.lock().connected = true;
    }

    /// Blocks written so far
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// Number of complete requests received so far
    pub fn requests(&self) -> usize {
        self.lock()
            .writes
            .iter()
            .filter(|w| w.first() != Some(&BLOCK_MARKER))
            .count()
    }

    /// Device key state
    pub fn state(&self) -> State {
        self.lock().engine.state()
    }

    /// Device public key, if generated
    pub fn public_key(&self) -> Option<[u8; KEY_SIZE]> {
        self.lock().engine.public_key()
    }
}

#[async_trait]
impl Transport for SimTransport {
    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut i = self.lock();

        if !i.connected {
            return Err(TransportError::NotConnected);
        }
        if data.len() > self.opts.mtu {
            return Err(TransportError::TooLarge(data.len()));
        }
        if i.faults.fail_writes > 0 {
            i.faults.fail_writes -= 1;
            warn!("Injected write failure");
            return Err(TransportError::Rejected("injected failure".to_string()));
        }

        i.writes.push(data.to_vec());

        trace!("Simulated write: {} bytes", data.len());

        let r = match i.engine.exchange(data) {
            o @ Output::BlockLoaded { .. } => match self.opts.block_acks {
                true => o.to_bytes(),
                false => return Ok(()),
            },
            Output::Response(r) => r,
        };

        // Faults only apply to complete responses
        let r = if data.first() == Some(&BLOCK_MARKER) {
            r
        } else if i.faults.disconnect_on_response {
            i.faults.disconnect_on_response = false;
            warn!("Injected disconnect");

            i.connected = false;
            i.notify(Notification::Disconnected);
            return Ok(());
        } else if i.faults.drop_responses > 0 {
            i.faults.drop_responses -= 1;
            warn!("Injected response loss");
            return Ok(());
        } else if i.faults.reject_responses > 0 {
            i.faults.reject_responses -= 1;
            warn!("Injected response failure");
            vec![FAILURE, INJECTED_FAILURE]
        } else {
            r
        };

        trace!("Simulated notify: {:02x?}", r);

        i.notify(Notification::Value(r));

        Ok(())
    }

    fn subscribe(&self) -> UnboundedReceiver<Notification> {
        let (tx, rx) = unbounded_channel();
        self.lock().subscribers.push(tx);
        rx
    }
}

/// [Connect] provider for a simulated device
pub struct SimProvider {
    device: SimTransport,
    advertising: bool,
}

impl SimProvider {
    /// Create a provider advertising the provided device
    pub fn new(device: SimTransport) -> Self {
        Self {
            device,
            advertising: true,
        }
    }

    /// Create a provider whose device never advertises
    pub fn silent(device: SimTransport) -> Self {
        Self {
            device,
            advertising: false,
        }
    }
}

#[async_trait]
impl Connect<SimTransport> for SimProvider {
    /// Device name to scan for
    type Options = String;

    async fn connect(&self, name: &String) -> Result<SimTransport, Error> {
        let opts = self.device.options();

        if !self.advertising || name != &opts.name {
            debug!("No matching device advertising, scanning");
            futures::future::pending::<()>().await;
        }

        tokio::time::sleep(Duration::from_millis(opts.advertise_delay_ms)).await;

        debug!("Connected to simulated device: {}", opts.name);

        self.device.reconnect();

        Ok(self.device.clone())
    }
}
