// Copyright (c) 2019-2023 Crater Dog Technologies

//! The [Engine] provides functionality required by ArmorD devices.
//!
//! This handles written blocks, reassembling them into requests, and returns
//! [Output] responses to the caller, see [proto][crate::proto] for the
//! protocol / encoding specifications.

use alloc::vec::Vec;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::{CryptoRngCore, OsRng};
use sha2::{Digest, Sha512};
use strum::{Display, EnumIter, EnumString, EnumVariantNames};
use zeroize::Zeroize;

use armord_proto::{block::BLOCK_CAPACITY, Reassembler, DIG_SIZE, KEY_SIZE};

mod event;
pub use event::Event;

mod output;
pub use output::{Output, BLOCK_ACK};

mod error;
pub use error::DeviceError;

/// Engine key state
#[derive(Copy, Clone, PartialEq, Eq, Debug, EnumString, Display, EnumVariantNames, EnumIter)]
#[strum(serialize_all = "camelCase")]
pub enum State {
    /// No key pair
    Empty,
    /// Key pair bound to a device key
    Active,
    /// Key pair rotated, previous key pending its final signature
    Rotated,
}

/// Signing key bound to a device key commitment
struct KeySlot {
    commitment: [u8; DIG_SIZE],
    key: SigningKey,
}

impl KeySlot {
    fn new(device_key: &[u8; KEY_SIZE], key: SigningKey) -> Self {
        Self {
            commitment: commit(device_key),
            key,
        }
    }

    fn matches(&self, device_key: &[u8; KEY_SIZE]) -> bool {
        self.commitment == commit(device_key)
    }

    fn public_key(&self) -> [u8; KEY_SIZE] {
        self.key.verifying_key().to_bytes()
    }
}

impl Drop for KeySlot {
    fn drop(&mut self) {
        self.commitment.zeroize();
    }
}

fn commit(device_key: &[u8; KEY_SIZE]) -> [u8; DIG_SIZE] {
    let mut c = [0u8; DIG_SIZE];
    c.copy_from_slice(&Sha512::digest(device_key));
    c
}

/// [Engine] provides hardware-independent support for ArmorD operations
pub struct Engine<RNG: CryptoRngCore = OsRng> {
    reassembler: Reassembler,

    current: Option<KeySlot>,
    previous: Option<KeySlot>,

    rng: RNG,
}

impl Engine {
    /// Create a new engine instance using the default [OsRng]
    pub const fn new() -> Self {
        Self::new_with_rng(OsRng {})
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl<RNG: CryptoRngCore> Engine<RNG> {
    /// Create a new engine instance with the provided rng
    pub const fn new_with_rng(rng: RNG) -> Self {
        Self {
            reassembler: Reassembler::new(BLOCK_CAPACITY),
            current: None,
            previous: None,
            rng,
        }
    }

    /// Set the block capacity expected from the host
    pub fn with_block_capacity(mut self, capacity: usize) -> Self {
        self.reassembler = Reassembler::new(capacity);
        self
    }

    /// Fetch the engine key state
    pub fn state(&self) -> State {
        match (&self.current, &self.previous) {
            (None, _) => State::Empty,
            (Some(_), None) => State::Active,
            (Some(_), Some(_)) => State::Rotated,
        }
    }

    /// Fetch the current public key, if any
    pub fn public_key(&self) -> Option<[u8; KEY_SIZE]> {
        self.current.as_ref().map(|s| s.public_key())
    }

    /// Handle a block written by the host
    pub fn update(&mut self, wire: &[u8]) -> Result<Output, DeviceError> {
        #[cfg(feature = "log")]
        log::debug!("block: {:02x?}", &wire[..wire.len().min(2)]);

        let request = match self.reassembler.push(wire)? {
            Some(r) => r,
            None => return Ok(Output::BlockLoaded { index: wire[1] }),
        };

        let evt = Event::parse(&request)?;

        #[cfg(feature = "log")]
        log::debug!("executing {} ({} bytes)", evt.operation(), request.len());

        self.execute(&evt).map(Output::Response)
    }

    /// Handle a block written by the host, answering errors as failure responses
    pub fn exchange(&mut self, wire: &[u8]) -> Output {
        match self.update(wire) {
            Ok(o) => o,
            Err(e) => {
                #[cfg(feature = "log")]
                log::warn!("request failed: {:?}", e);

                Output::Response(e.to_response())
            }
        }
    }

    fn execute(&mut self, evt: &Event) -> Result<Vec<u8>, DeviceError> {
        match evt {
            Event::GenerateKeys { device_key } => {
                let slot = KeySlot::new(device_key, self.generate());
                let public_key = slot.public_key();

                self.current = Some(slot);
                self.previous = None;

                Ok(public_key.to_vec())
            }
            Event::RotateKeys {
                device_key,
                new_device_key,
            } => {
                match &self.current {
                    None => return Err(DeviceError::NoKeys),
                    Some(s) if !s.matches(device_key) => return Err(DeviceError::WrongDeviceKey),
                    _ => (),
                }

                let slot = KeySlot::new(new_device_key, self.generate());
                let public_key = slot.public_key();

                self.previous = self.current.replace(slot);

                Ok(public_key.to_vec())
            }
            Event::EraseKeys => {
                self.current = None;
                self.previous = None;

                Ok(alloc::vec![1])
            }
            Event::DigestBytes(bytes) => Ok(Sha512::digest(bytes).to_vec()),
            Event::SignBytes { device_key, bytes } => {
                if let Some(s) = self.current.as_ref().filter(|s| s.matches(device_key)) {
                    return Ok(s.key.sign(bytes).to_bytes().to_vec());
                }

                // The previous key signs exactly once after rotation
                if let Some(s) = self.previous.take() {
                    if s.matches(device_key) {
                        return Ok(s.key.sign(bytes).to_bytes().to_vec());
                    }
                    self.previous = Some(s);
                }

                match self.current {
                    None => Err(DeviceError::NoKeys),
                    Some(_) => Err(DeviceError::WrongDeviceKey),
                }
            }
            Event::ValidSignature {
                public_key,
                signature,
                bytes,
            } => {
                let valid = match VerifyingKey::from_bytes(public_key) {
                    Ok(k) => k.verify(bytes, &Signature::from_bytes(signature)).is_ok(),
                    Err(_) => false,
                };

                Ok(alloc::vec![valid as u8])
            }
        }
    }

    fn generate(&mut self) -> SigningKey {
        let mut secret = [0u8; KEY_SIZE];
        self.rng.fill_bytes(&mut secret);

        let key = SigningKey::from_bytes(&secret);
        secret.zeroize();

        key
    }
}
