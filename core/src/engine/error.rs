// Copyright (c) 2019-2023 Crater Dog Technologies

use alloc::vec::Vec;

use num_enum::TryFromPrimitive;

use armord_proto::{ProtoError, FAILURE};

/// [Engine][super::Engine] errors, answered to the host as `[0xFF, code]`
#[derive(Copy, Clone, PartialEq, Eq, Debug, TryFromPrimitive)]
#[cfg_attr(feature = "thiserror", derive(thiserror::Error))]
#[repr(u8)]
pub enum DeviceError {
    /// Request could not be decoded
    #[cfg_attr(feature = "thiserror", error("malformed request"))]
    Malformed = 0x01,

    /// Unknown or reserved operation
    #[cfg_attr(feature = "thiserror", error("unknown operation"))]
    UnknownOperation = 0x02,

    /// No key pair has been generated
    #[cfg_attr(feature = "thiserror", error("no keys"))]
    NoKeys = 0x03,

    /// Supplied device key does not match the stored commitment
    #[cfg_attr(feature = "thiserror", error("device key mismatch"))]
    WrongDeviceKey = 0x04,

    /// Wrong number or length of arguments
    #[cfg_attr(feature = "thiserror", error("invalid arguments"))]
    InvalidArguments = 0x05,

    /// Block received out of sequence
    #[cfg_attr(feature = "thiserror", error("block out of sequence"))]
    BlockSequence = 0x06,
}

impl DeviceError {
    /// Reason code sent on the wire
    pub const fn code(&self) -> u8 {
        *self as u8
    }

    /// Encode the failure response for this error
    pub fn to_response(&self) -> Vec<u8> {
        alloc::vec![FAILURE, self.code()]
    }
}

impl From<ProtoError> for DeviceError {
    fn from(e: ProtoError) -> Self {
        match e {
            ProtoError::UnknownOperation(_) | ProtoError::ReservedOperation => {
                DeviceError::UnknownOperation
            }
            ProtoError::BlockSequence { .. } => DeviceError::BlockSequence,
            _ => DeviceError::Malformed,
        }
    }
}
