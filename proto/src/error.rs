// Copyright (c) 2019-2023 Crater Dog Technologies

/// Protocol encoding / decoding errors
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "thiserror", derive(thiserror::Error))]
pub enum ProtoError {
    /// More arguments than fit the one byte argument count
    #[cfg_attr(feature = "thiserror", error("too many arguments ({0}, maximum 255)"))]
    TooManyArguments(usize),

    /// Argument longer than fits the two byte length field
    #[cfg_attr(
        feature = "thiserror",
        error("argument {index} too large ({len} bytes, maximum 65535)")
    )]
    ArgumentTooLarge { index: usize, len: usize },

    /// Encoded request needs more blocks than a one byte index can address
    #[cfg_attr(feature = "thiserror", error("request requires {0} blocks (maximum 256)"))]
    TooManyBlocks(usize),

    /// Block capacity of zero
    #[cfg_attr(feature = "thiserror", error("invalid block capacity"))]
    InvalidCapacity,

    /// Buffer too short (or too long) for the expected encoding
    #[cfg_attr(feature = "thiserror", error("invalid length"))]
    InvalidLength,

    /// Unknown operation code
    #[cfg_attr(feature = "thiserror", error("unknown operation code 0x{0:02x}"))]
    UnknownOperation(u8),

    /// Bytes remaining after the last declared argument
    #[cfg_attr(feature = "thiserror", error("{0} trailing bytes after request"))]
    TrailingBytes(usize),

    /// Block received out of the descending index sequence
    #[cfg_attr(
        feature = "thiserror",
        error("unexpected block index {actual} (expected {expected})")
    )]
    BlockSequence { expected: u8, actual: u8 },

    /// `loadBlocks` is reserved for intermediate blocks
    #[cfg_attr(feature = "thiserror", error("operation is reserved for block framing"))]
    ReservedOperation,

    /// Empty device response
    #[cfg_attr(feature = "thiserror", error("empty response"))]
    EmptyResponse,
}

impl From<encdec::Error> for ProtoError {
    fn from(_: encdec::Error) -> Self {
        ProtoError::InvalidLength
    }
}
