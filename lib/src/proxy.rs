// Copyright (c) 2019-2023 Crater Dog Technologies

//! Proxy for connected ArmorD devices
//!
//! This drives one logical request at a time against the device
//! and is generic over [Transport] implementations

use log::{debug, trace, warn};
use tokio::sync::{
    mpsc::{error::TryRecvError, UnboundedReceiver},
    Mutex,
};

use armord_proto::{
    chunk, request::encode, Operation, ProtoError, Response, FAILURE, KEY_SIZE, SIG_SIZE,
};

use crate::{
    config::{BlockAck, ProxyConfig},
    transport::{Notification, Transport},
    Error,
};

/// Proxy for a connected ArmorD [Transport].
///
/// Responses carry no correlation id, so at most one logical request may be
/// in flight; a concurrent [HsmProxy::call] fails immediately with [Error::Busy].
pub struct HsmProxy<T: Transport> {
    /// Transport for communication
    t: T,
    /// Notification stream, held for the duration of a call
    rx: Mutex<UnboundedReceiver<Notification>>,
    /// Proxy configuration
    config: ProxyConfig,
}

/// Create an [HsmProxy] with the default configuration from a type implementing [Transport]
impl<T: Transport> From<T> for HsmProxy<T> {
    fn from(t: T) -> Self {
        Self::new(t, ProxyConfig::default())
    }
}

impl<T: Transport> HsmProxy<T> {
    /// Create a new proxy, subscribing to transport notifications
    pub fn new(t: T, config: ProxyConfig) -> Self {
        let rx = t.subscribe();

        Self {
            t,
            rx: Mutex::new(rx),
            config,
        }
    }

    /// Fetch the underlying transport
    pub fn transport(&self) -> &T {
        &self.t
    }

    /// Fetch the proxy configuration
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Issue a logical request, returning the raw success payload
    pub async fn call(&self, operation: Operation, arguments: &[&[u8]]) -> Result<Vec<u8>, Error> {
        // One logical request in flight, never queued here
        let mut rx = self.rx.try_lock().map_err(|_| Error::Busy)?;

        if operation == Operation::LoadBlocks {
            return Err(ProtoError::ReservedOperation.into());
        }

        let encoded = encode(operation, arguments)?;
        let blocks = chunk(&encoded, self.config.block_capacity)?;

        if !self.t.is_connected() {
            return Err(Error::TransportUnavailable);
        }

        // Discard anything notified outside of a call
        loop {
            match rx.try_recv() {
                Ok(n) => debug!("Discarding stale notification: {:02x?}", n),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Err(Error::TransportUnavailable),
            }
        }

        debug!(
            "Issuing {} ({} bytes, {} blocks)",
            operation,
            encoded.len(),
            blocks.total()
        );

        for block in blocks {
            let wire = block.to_bytes();

            trace!("Write block {} ({} bytes)", block.index, wire.len());

            if let Err(e) = self.t.write(&wire).await {
                warn!("Write of block {} failed: {}", block.index, e);

                return match self.t.is_connected() {
                    true => Err(Error::WriteFailed(e)),
                    false => Err(Error::TransportUnavailable),
                };
            }

            if !block.is_final() && self.config.block_ack == BlockAck::Notify {
                let ack = self.receive(&mut rx).await?;
                if ack.first() == Some(&FAILURE) {
                    return Err(Error::DeviceRejected(ack.get(1).copied()));
                }
            }
        }

        let raw = self.receive(&mut rx).await?;

        trace!("Response: {:02x?}", raw);

        let r = Response::decode(&raw, operation).map_err(|e| match e {
            ProtoError::EmptyResponse => Error::EmptyResponse,
            e => Error::Encoding(e),
        })?;

        if let Response::Failure { reason } = r {
            debug!("Device rejected {} (reason: {:?})", operation, reason);
            return Err(Error::DeviceRejected(reason));
        }

        Ok(raw)
    }

    /// Await a single notification, bounded by the response timeout
    async fn receive(&self, rx: &mut UnboundedReceiver<Notification>) -> Result<Vec<u8>, Error> {
        match tokio::time::timeout(self.config.response_timeout(), rx.recv()).await? {
            Some(Notification::Value(v)) => Ok(v),
            Some(Notification::Disconnected) | None => {
                warn!("Device disconnected during request");
                Err(Error::TransportUnavailable)
            }
        }
    }

    /// Generate a key pair bound to the provided device key, returning the public key
    pub async fn generate_keys(&self, device_key: &[u8; KEY_SIZE]) -> Result<[u8; KEY_SIZE], Error> {
        let r = self
            .call(Operation::GenerateKeys, &[&device_key[..]])
            .await?;

        sized(Operation::GenerateKeys, r)
    }

    /// Replace the key pair, returning the new public key
    pub async fn rotate_keys(
        &self,
        device_key: &[u8; KEY_SIZE],
        new_device_key: &[u8; KEY_SIZE],
    ) -> Result<[u8; KEY_SIZE], Error> {
        let r = self
            .call(Operation::RotateKeys, &[&device_key[..], &new_device_key[..]])
            .await?;

        sized(Operation::RotateKeys, r)
    }

    /// Erase device key material, returning the device status flag
    pub async fn erase_keys(&self) -> Result<bool, Error> {
        let r = self.call(Operation::EraseKeys, &[]).await?;

        check(Operation::EraseKeys, &r)?;
        Ok(r[0] != 0)
    }

    /// Digest the provided bytes
    pub async fn digest_bytes(&self, bytes: &[u8]) -> Result<Vec<u8>, Error> {
        let r = self.call(Operation::DigestBytes, &[bytes]).await?;

        check(Operation::DigestBytes, &r)?;
        Ok(r)
    }

    /// Sign the provided bytes with the key bound to `device_key`
    pub async fn sign_bytes(
        &self,
        device_key: &[u8; KEY_SIZE],
        bytes: &[u8],
    ) -> Result<[u8; SIG_SIZE], Error> {
        let r = self
            .call(Operation::SignBytes, &[&device_key[..], bytes])
            .await?;

        sized(Operation::SignBytes, r)
    }

    /// Check a signature over the provided bytes
    pub async fn valid_signature(
        &self,
        public_key: &[u8; KEY_SIZE],
        signature: &[u8; SIG_SIZE],
        bytes: &[u8],
    ) -> Result<bool, Error> {
        let r = self
            .call(
                Operation::ValidSignature,
                &[&public_key[..], &signature[..], bytes],
            )
            .await?;

        check(Operation::ValidSignature, &r)?;
        Ok(r[0] != 0)
    }
}

/// Check a success payload against the operation's response shape
fn check(operation: Operation, r: &[u8]) -> Result<(), Error> {
    let expected = operation.response_shape();

    match expected.check(r.len()) {
        true => Ok(()),
        false => Err(Error::MalformedResponse {
            operation,
            expected,
            actual: r.len(),
        }),
    }
}

fn sized<const N: usize>(operation: Operation, r: Vec<u8>) -> Result<[u8; N], Error> {
    check(operation, &r)?;

    r.as_slice()
        .try_into()
        .map_err(|_| Error::MalformedResponse {
            operation,
            expected: operation.response_shape(),
            actual: r.len(),
        })
}

#[cfg(test)]
mod test {
    use armord_proto::request::HEADER_LEN;

    use super::*;
    use crate::mock::{MockTransport, Script};

    fn proxy(t: &MockTransport) -> HsmProxy<MockTransport> {
        let config = ProxyConfig {
            response_timeout_ms: 200,
            ..Default::default()
        };
        HsmProxy::new(t.clone(), config)
    }

    #[tokio::test]
    async fn blocks_written_in_descending_order() {
        let t = MockTransport::new();
        t.respond([0x5Au8; 64]);
        let p = proxy(&t);

        let msg = [0xABu8; 1000];
        let sig = p.sign_bytes(&[0x01; 32], &msg).await.unwrap();
        assert_eq!(sig, [0x5A; 64]);

        let writes = t.writes();
        assert_eq!(writes.len(), 3);
        assert_eq!(&writes[0][..HEADER_LEN], &[0x00, 0x02]);
        assert_eq!(&writes[1][..HEADER_LEN], &[0x00, 0x01]);
        assert_eq!(&writes[2][..HEADER_LEN], &[0x05, 0x02]);

        for w in &writes {
            assert!(w.len() <= 512);
        }
    }

    #[tokio::test]
    async fn second_call_is_busy() {
        let t = MockTransport::new();
        t.push(Script::Silent);
        let p = proxy(&t);

        // The first call is polled first and parks awaiting its response
        let first = p.digest_bytes(b"first");
        let second = async {
            let r = p.digest_bytes(b"second").await;
            t.notify([0x11u8; 64]);
            r
        };

        let (a, b) = tokio::join!(first, second);
        assert!(matches!(b, Err(Error::Busy)));
        assert_eq!(a.unwrap(), vec![0x11; 64]);

        // Only the first call reached the transport
        assert_eq!(t.writes().len(), 1);
    }

    #[tokio::test]
    async fn device_rejected() {
        let t = MockTransport::new();
        t.respond([0xFF, 0x07]);
        let p = proxy(&t);

        let r = p.sign_bytes(&[0x01; 32], b"hello").await;
        assert!(matches!(r, Err(Error::DeviceRejected(Some(0x07)))));
    }

    #[tokio::test]
    async fn malformed_and_empty_responses() {
        let t = MockTransport::new();
        t.respond([0x01, 0x02, 0x03]).respond(vec![]);
        let p = proxy(&t);

        let r = p.generate_keys(&[0x01; 32]).await;
        assert!(matches!(
            r,
            Err(Error::MalformedResponse {
                operation: Operation::GenerateKeys,
                actual: 3,
                ..
            })
        ));

        let r = p.erase_keys().await;
        assert!(matches!(r, Err(Error::EmptyResponse)));
    }

    #[tokio::test]
    async fn response_timeout() {
        let t = MockTransport::new();
        t.push(Script::Silent);
        let p = proxy(&t);

        let r = p.digest_bytes(b"hello").await;
        assert!(matches!(r, Err(Error::RequestTimeout)));
    }

    #[tokio::test]
    async fn disconnect_mid_call() {
        let t = MockTransport::new();
        t.push(Script::Disconnect);
        let p = proxy(&t);

        let r = p.digest_bytes(b"hello").await;
        assert!(matches!(r, Err(Error::TransportUnavailable)));

        // Not connected, nothing written
        let r = p.digest_bytes(b"hello").await;
        assert!(matches!(r, Err(Error::TransportUnavailable)));
        assert_eq!(t.writes().len(), 1);
    }

    #[tokio::test]
    async fn unavailable_until_reconnected() {
        let t = MockTransport::new();
        t.set_connected(false);
        t.respond([0x01]);
        let p = proxy(&t);

        let r = p.erase_keys().await;
        assert!(matches!(r, Err(Error::TransportUnavailable)));
        assert!(t.writes().is_empty());

        t.set_connected(true);
        assert!(p.erase_keys().await.unwrap());
        assert_eq!(t.writes().len(), 1);
    }

    #[tokio::test]
    async fn write_failure() {
        let t = MockTransport::new();
        t.fail_writes(1).respond([0x01]);
        let p = proxy(&t);

        let r = p.erase_keys().await;
        assert!(matches!(r, Err(Error::WriteFailed(_))));

        // Whole request re-issued on the next call
        assert!(p.erase_keys().await.unwrap());
    }

    #[tokio::test]
    async fn stale_notifications_discarded() {
        let t = MockTransport::new();
        t.respond([0x01]);
        let p = proxy(&t);

        t.notify([0xFF, 0x01]);
        t.notify([0x00]);

        assert!(p.erase_keys().await.unwrap());
    }

    #[tokio::test]
    async fn reserved_and_oversized_requests() {
        let t = MockTransport::new();
        let p = proxy(&t);

        let r = p.call(Operation::LoadBlocks, &[]).await;
        assert!(matches!(
            r,
            Err(Error::Encoding(ProtoError::ReservedOperation))
        ));

        let big = vec![0u8; 65536];
        let r = p.digest_bytes(&big).await;
        assert!(matches!(
            r,
            Err(Error::Encoding(ProtoError::ArgumentTooLarge { index: 0, .. }))
        ));

        assert!(t.writes().is_empty());
    }

    #[tokio::test]
    async fn notify_block_acks() {
        let t = MockTransport::new();
        t.block_acks(true).respond([0x22u8; 64]);

        let config = ProxyConfig {
            block_ack: BlockAck::Notify,
            response_timeout_ms: 200,
            ..Default::default()
        };
        let p = HsmProxy::new(t.clone(), config);

        let d = p.digest_bytes(&[0x33u8; 1500]).await.unwrap();
        assert_eq!(d, vec![0x22; 64]);

        let indices: Vec<u8> = t
            .writes()
            .iter()
            .map(|w| match w[0] {
                0x00 => w[1],
                _ => 0,
            })
            .collect();
        assert_eq!(indices, vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn final_block_is_raw_request_prefix() {
        let t = MockTransport::new();
        t.respond([0x01]);
        let p = proxy(&t);

        let pk = [0x0Au8; 32];
        let sig = [0x0Bu8; 64];
        let msg = [0x0Cu8; 600];
        p.valid_signature(&pk, &sig, &msg).await.unwrap();

        let encoded = encode(Operation::ValidSignature, [&pk[..], &sig[..], &msg[..]]).unwrap();
        let expected: Vec<Vec<u8>> = chunk(&encoded, 510)
            .unwrap()
            .map(|b| b.to_bytes())
            .collect();

        // Two blocks, the second being the first 512 bytes of the request
        assert_eq!(expected.len(), 2);
        assert_eq!(&expected[1][..], &encoded[..512]);

        assert_eq!(t.writes(), expected);
    }
}
