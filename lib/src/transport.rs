//! Generic transport abstraction over BLE UART-style characteristics
//!
// Copyright (c) 2019-2023 Crater Dog Technologies

use std::{fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::Error;

/// Events delivered by a [Transport] to subscribers
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Notification {
    /// Characteristic value notified by the device
    Value(Vec<u8>),
    /// Device disconnected
    Disconnected,
}

/// Transport level write errors
#[derive(Clone, PartialEq, Eq, Debug, thiserror::Error)]
pub enum TransportError {
    /// Transport is not connected
    #[error("not connected")]
    NotConnected,

    /// Write exceeds the transport MTU
    #[error("write of {0} bytes exceeds MTU")]
    TooLarge(usize),

    /// Write rejected by the peer or stack
    #[error("write rejected: {0}")]
    Rejected(String),
}

/// Narrow interface to the device transport.
///
/// `write` resolves once the underlying write has been acknowledged, and
/// device notifications (plus disconnect events) are delivered to every
/// receiver returned by `subscribe`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Check whether the transport is connected
    fn is_connected(&self) -> bool;

    /// Write a single block, resolving on write acknowledgement
    async fn write(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Subscribe to device notifications
    fn subscribe(&self) -> UnboundedReceiver<Notification>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn is_connected(&self) -> bool {
        T::is_connected(self)
    }

    async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        T::write(self, data).await
    }

    fn subscribe(&self) -> UnboundedReceiver<Notification> {
        T::subscribe(self)
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    fn is_connected(&self) -> bool {
        T::is_connected(self)
    }

    async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        T::write(self, data).await
    }

    fn subscribe(&self) -> UnboundedReceiver<Notification> {
        T::subscribe(self)
    }
}

/// Connect trait for device providers (scan, connect, subscribe)
#[async_trait]
pub trait Connect<T: Transport> {
    type Options: Debug + Send + Sync;

    /// Connect to the specified device
    async fn connect(&self, opts: &Self::Options) -> Result<T, Error>;
}

/// Connect to a device, giving up with [Error::NoConnection] if none is found
/// before the scan watchdog expires
pub async fn connect_with_watchdog<T, C>(
    provider: &C,
    opts: &C::Options,
    scan_timeout: Duration,
) -> Result<T, Error>
where
    T: Transport,
    C: Connect<T> + Sync,
{
    debug!("Scanning for device: {:?}", opts);

    match tokio::time::timeout(scan_timeout, provider.connect(opts)).await {
        Ok(r) => r,
        Err(_) => {
            warn!("No device found after {:?}", scan_timeout);
            Err(Error::NoConnection)
        }
    }
}
