// Copyright (c) 2019-2023 Crater Dog Technologies

//! Response classification
//!
//! ```text
//! success:  | PAYLOAD (operation specific)          |
//! failure:  | 0xFF | REASON (optional, opaque) | ...  |
//! ```
//!
//! Responses carry no operation tag, the codec only separates failure from
//! success framing. Payload lengths are checked by the caller against
//! [Operation::response_shape].

use crate::{Operation, ProtoError, FAILURE};

/// Caller-side expectation for a successful response payload length
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ResponseShape {
    /// Exactly `n` bytes
    Exact(usize),
    /// At least `n` bytes
    AtLeast(usize),
    /// Device specific length
    Any,
}

impl ResponseShape {
    /// Check a payload length against this shape
    pub const fn check(&self, len: usize) -> bool {
        match self {
            ResponseShape::Exact(n) => len == *n,
            ResponseShape::AtLeast(n) => len >= *n,
            ResponseShape::Any => true,
        }
    }
}

impl core::fmt::Display for ResponseShape {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ResponseShape::Exact(n) => write!(f, "{n} bytes"),
            ResponseShape::AtLeast(n) => write!(f, "at least {n} bytes"),
            ResponseShape::Any => write!(f, "any length"),
        }
    }
}

/// Decoded device response
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Response<'a> {
    /// Operation completed, the whole buffer is the payload
    Success(&'a [u8]),
    /// Device rejected the request, with the device reason byte where present
    Failure { reason: Option<u8> },
}

impl<'a> Response<'a> {
    /// Classify a raw response for the outstanding operation
    #[cfg_attr(not(feature = "log"), allow(unused_variables))]
    pub fn decode(raw: &'a [u8], expected: Operation) -> Result<Self, ProtoError> {
        #[cfg(feature = "log")]
        log::trace!("{} response: {} bytes", expected, raw.len());

        match raw.first() {
            None => Err(ProtoError::EmptyResponse),
            Some(&FAILURE) => Ok(Response::Failure {
                reason: raw.get(1).copied(),
            }),
            Some(_) => Ok(Response::Success(raw)),
        }
    }

    /// Check whether the response signals success
    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success(_))
    }
}
