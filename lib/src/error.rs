// Copyright (c) 2019-2023 Crater Dog Technologies

use num_enum::TryFromPrimitive;
use strum::{Display, EnumIter};
use tokio::time::error::Elapsed;

use armord_proto::{Operation, ProtoError, ResponseShape};

use crate::transport::TransportError;

/// ArmorD API Error Type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Request could not be encoded
    #[error("Request encoding failed: {0}")]
    Encoding(#[from] ProtoError),

    /// Transport not connected, or disconnected mid-call
    #[error("Transport unavailable")]
    TransportUnavailable,

    /// Block write failed
    #[error("Write failed: {0}")]
    WriteFailed(TransportError),

    /// A logical request is already in flight
    #[error("Request already in flight")]
    Busy,

    /// Request timeout
    #[error("Timeout waiting for device response")]
    RequestTimeout,

    /// Device answered with a failure response
    #[error("Device rejected request (reason: {0:?})")]
    DeviceRejected(Option<u8>),

    /// Device answered with an empty response
    #[error("Empty device response")]
    EmptyResponse,

    /// Response payload does not match the operation
    #[error("Malformed {operation} response (expected {expected}, received {actual} bytes)")]
    MalformedResponse {
        operation: Operation,
        expected: ResponseShape,
        actual: usize,
    },

    /// No device found before the scan watchdog expired
    #[error("No device found")]
    NoConnection,

    /// Key store failure
    #[error("Key store error: {0}")]
    KeyStore(String),

    /// Upload failure
    #[error("Upload failed: {0}")]
    Upload(String),

    /// Document encoding failure
    #[error("Document encoding failed: {0}")]
    Document(#[from] serde_json::Error),

    /// Pipeline step prerequisite not available
    #[error("Missing {0}")]
    MissingState(&'static str),

    /// Device reported a signature as invalid
    #[error("Invalid signature")]
    InvalidSignature,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<Elapsed> for Error {
    fn from(_: Elapsed) -> Self {
        Error::RequestTimeout
    }
}

/// Stable failure reason codes, reported on pipeline abort
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, EnumIter, TryFromPrimitive)]
#[strum(serialize_all = "camelCase")]
#[repr(u8)]
pub enum ErrorKind {
    Encoding = 0x01,
    Transport = 0x02,
    Busy = 0x03,
    Timeout = 0x04,
    DeviceRejected = 0x05,
    MalformedResponse = 0x06,
    KeyStore = 0x07,
    Upload = 0x08,
    Document = 0x09,
    MissingState = 0x0a,
    InvalidSignature = 0x0b,
}

impl ErrorKind {
    /// Reason code
    pub const fn code(&self) -> u8 {
        *self as u8
    }
}

impl Error {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Encoding(_) => ErrorKind::Encoding,
            Error::TransportUnavailable | Error::WriteFailed(_) | Error::NoConnection => {
                ErrorKind::Transport
            }
            Error::Busy => ErrorKind::Busy,
            Error::RequestTimeout => ErrorKind::Timeout,
            Error::DeviceRejected(_) => ErrorKind::DeviceRejected,
            Error::EmptyResponse | Error::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            Error::KeyStore(_) | Error::Io(_) => ErrorKind::KeyStore,
            Error::Upload(_) => ErrorKind::Upload,
            Error::Document(_) => ErrorKind::Document,
            Error::MissingState(_) => ErrorKind::MissingState,
            Error::InvalidSignature => ErrorKind::InvalidSignature,
        }
    }

    /// Check whether re-running the failed step may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transport
                | ErrorKind::Busy
                | ErrorKind::Timeout
                | ErrorKind::DeviceRejected
                | ErrorKind::Upload
        )
    }

    /// Check whether the device answered outside the operation contract
    pub fn is_malformed(&self) -> bool {
        self.kind() == ErrorKind::MalformedResponse
    }
}
