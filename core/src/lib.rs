// Copyright (c) 2019-2023 Crater Dog Technologies

//! ArmorD hardware security module core
//!
//! This provides a hardware-independent [Engine][engine::Engine] executing the
//! ArmorD request protocol, for use in device firmware and in the simulator.
//!
//! Interactions with the [Engine][engine::Engine] are performed by passing each
//! block written by the host to [Engine::update][engine::Engine::update], which
//! returns an [Output][engine::Output] once the block has been handled,
//! see [armord_proto] for request objects and wire encodings.
//!
//! ## Operations
//!
//! ### Key lifecycle
//!
//! Keys are generated with `generateKeys(device_key)`, binding the new Ed25519
//! key pair to the mobile device key. Only a commitment (SHA-512) to the device
//! key is retained, and every signing request must present the matching key.
//!
//! `rotateKeys(device_key, new_device_key)` replaces the key pair, keeping the
//! previous key available for exactly one `signBytes` call so the new
//! certificate can be vouched for by the old key.
//!
//! `eraseKeys()` forgets all key material.
//!
//! ### Signing and digests
//!
//! `signBytes(device_key, bytes)` returns an Ed25519 signature, `digestBytes(bytes)`
//! a SHA-512 digest and `validSignature(public_key, signature, bytes)` a one byte
//! flag.
//!
//! Failures are answered with `[0xFF, reason]`, see [DeviceError][engine::DeviceError].

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub use armord_proto::{self as proto};

pub mod engine;
