// Copyright (c) 2019-2023 Crater Dog Technologies

//! Wire protocol definitions for ArmorD hardware security modules
//!
//! The HSM is reached over a BLE UART-style characteristic that accepts writes
//! of at most 512 bytes, so requests are framed in two layers:
//!
//! 1. a [Request] is encoded as a flat byte sequence
//!    (see [request] for the layout), then
//! 2. the encoded request is split into transport sized [Block]s by [chunk],
//!    which are written highest index first with block `0` written last.
//!
//! The device answers each logical request with a single notification which is
//! classified by [Response::decode]. Responses carry no correlation id, so the
//! caller must remember which [Operation] is outstanding.
//!
//! All multi-byte integers on the wire are big-endian.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

use num_enum::TryFromPrimitive;
use strum::{Display, EnumIter, EnumString, EnumVariantNames};

pub mod block;
pub use block::{chunk, Block, Blocks, Reassembler};

mod error;
pub use error::ProtoError;

pub mod request;
pub use request::{Request, RequestHeader, RequestView};

pub mod response;
pub use response::{Response, ResponseShape};

/// Protocol revision implemented by this crate
pub const PROTOCOL: &str = "v1";

/// Digest algorithm used by the device for `digestBytes`
pub const DIGEST: &str = "sha512";

/// Signature algorithm used by the device for `signBytes`
pub const SIGNATURE: &str = "ed25519";

/// Size of device (mobile) keys and public keys
pub const KEY_SIZE: usize = 32;

/// Size of digests returned by `digestBytes`
pub const DIG_SIZE: usize = 64;

/// Size of signatures returned by `signBytes`
pub const SIG_SIZE: usize = 64;

/// First response byte signalling a failed request
pub const FAILURE: u8 = 0xFF;

/// HSM operations with their fixed wire codes.
///
/// These codes are the contract with the device firmware and must never change.
#[derive(
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Debug,
    Display,
    EnumString,
    EnumVariantNames,
    EnumIter,
    TryFromPrimitive,
)]
#[strum(serialize_all = "camelCase")]
#[repr(u8)]
pub enum Operation {
    /// Intermediate block of a multi-block request (never a request in its own right)
    LoadBlocks = 0,

    /// Generate a new key pair bound to the supplied device key
    GenerateKeys = 1,

    /// Replace the current key pair, keeping the previous key for one signature
    RotateKeys = 2,

    /// Erase all key material
    EraseKeys = 3,

    /// SHA-512 digest of the supplied bytes
    DigestBytes = 4,

    /// Ed25519 signature over the supplied bytes
    SignBytes = 5,

    /// Check an Ed25519 signature
    ValidSignature = 6,
}

impl Operation {
    /// Wire code for this operation
    pub const fn code(&self) -> u8 {
        *self as u8
    }

    /// Caller-side expectation for a successful response payload
    pub const fn response_shape(&self) -> ResponseShape {
        match self {
            Operation::GenerateKeys | Operation::RotateKeys => ResponseShape::Exact(KEY_SIZE),
            Operation::SignBytes => ResponseShape::Exact(SIG_SIZE),
            Operation::EraseKeys | Operation::ValidSignature | Operation::LoadBlocks => {
                ResponseShape::AtLeast(1)
            }
            Operation::DigestBytes => ResponseShape::Any,
        }
    }
}

impl From<Operation> for u8 {
    fn from(op: Operation) -> Self {
        op as u8
    }
}
